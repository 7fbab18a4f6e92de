//! Tool Server Client Multiplexer.

mod client;
mod manager;
mod protocol;
mod transport;

pub use client::McpClient;
pub use manager::ToolServerManager;
