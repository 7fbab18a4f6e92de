//! Tool Server Client Multiplexer: owns one `McpClient` per connected tool
//! server and routes calls by server id.
//!
//! Grounded in the teacher's `mcp::manager::McpManager`: an
//! `RwLock<HashMap<String, Arc<McpClient>>>` registry, parallel connect via
//! `futures::future::join_all`, and a tolerant connect pass where a single
//! bad server is logged and skipped rather than aborting startup (matching
//! `original_source/app/mcp/client_manager.py::initialize`).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::ToolServerConfig;
use crate::error::Result;
use crate::model::{ToolCallOutcome, ToolInfo};

use super::client::McpClient;

pub struct ToolServerManager {
    clients: RwLock<HashMap<String, Arc<McpClient>>>,
    tools_cache: RwLock<HashMap<String, Vec<ToolInfo>>>,
}

impl ToolServerManager {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            tools_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Connects to every enabled, `stdio`-transport server. Servers that
    /// fail to start are logged and skipped — one misconfigured server
    /// must not prevent the others from coming up.
    pub async fn connect_all(&self, servers: &[ToolServerConfig]) {
        let attempts = servers.iter().map(|cfg| self.connect_one(cfg));
        futures::future::join_all(attempts).await;
    }

    async fn connect_one(&self, cfg: &ToolServerConfig) {
        match McpClient::connect(&cfg.id, &cfg.command, &cfg.args, &cfg.env).await {
            Ok(client) => {
                let tools = match client.list_tools().await {
                    Ok(tools) => tools,
                    Err(e) => {
                        tracing::warn!(server_id = %cfg.id, error = %e, "failed to list tools");
                        Vec::new()
                    }
                };
                self.tools_cache.write().await.insert(cfg.id.clone(), tools);
                self.clients.write().await.insert(cfg.id.clone(), Arc::new(client));
                tracing::info!(server_id = %cfg.id, "tool server connected");
            }
            Err(e) => {
                tracing::warn!(server_id = %cfg.id, error = %e, "tool server failed to connect; skipping");
            }
        }
    }

    pub async fn is_connected(&self, server_id: Option<&str>) -> bool {
        let clients = self.clients.read().await;
        match server_id {
            Some(id) => clients.contains_key(id),
            None => !clients.is_empty(),
        }
    }

    pub async fn list_servers(&self) -> Vec<String> {
        let clients = self.clients.read().await;
        let mut alive = Vec::new();
        for (id, client) in clients.iter() {
            if client.is_alive().await {
                alive.push(id.clone());
            }
        }
        alive
    }

    /// Per-server snapshot for the `/tool-servers` diagnostic endpoint:
    /// every server that was connected at startup, whether it is still
    /// alive, and its cached tool catalog.
    pub async fn server_snapshots(&self) -> Vec<(String, bool, Vec<ToolInfo>)> {
        let clients = self.clients.read().await;
        let cache = self.tools_cache.read().await;
        let mut out = Vec::with_capacity(clients.len());
        for (id, client) in clients.iter() {
            let alive = client.is_alive().await;
            let tools = cache.get(id).cloned().unwrap_or_default();
            out.push((id.clone(), alive, tools));
        }
        out
    }

    /// All tools across every connected server, flattened.
    pub async fn all_tools(&self) -> Vec<ToolInfo> {
        self.tools_cache
            .read()
            .await
            .values()
            .flat_map(|v| v.clone())
            .collect()
    }

    /// Tools visible to a profile, honoring its `allowed_mcp_servers`
    /// allow-list — `["*"]` grants everything, an empty list grants
    /// nothing, matching `get_tools_for_profile`'s semantics.
    pub async fn tools_for_profile(&self, profile: &crate::config::AgentProfileConfig) -> Vec<ToolInfo> {
        if profile.allowed_mcp_servers.is_empty() {
            return Vec::new();
        }
        if profile.allowed_mcp_servers.iter().any(|s| s == "*") {
            return self.all_tools().await;
        }
        self.tools_cache
            .read()
            .await
            .iter()
            .filter(|(server_id, _)| profile.allows_server(server_id))
            .flat_map(|(_, tools)| tools.clone())
            .collect()
    }

    /// Closes every connected tool server and clears the registry, used
    /// during graceful shutdown so subprocesses don't outlive the server.
    /// Idempotent: calling it again (or with nothing connected) is a no-op —
    /// dropping the last `Arc<McpClient>` ends its receive loop and, via
    /// `kill_on_drop` on the spawned child, tears down the subprocess.
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<McpClient>> = self.clients.write().await.drain().map(|(_, c)| c).collect();
        drop(clients);
        self.tools_cache.write().await.clear();
    }

    /// Calls a tool, always returning a normalized outcome rather than
    /// propagating transport errors — a failing or timing-out call becomes
    /// an `is_error` result the planner can reflect on, never a panic or a
    /// bubbled-up `EngineError`.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
        timeout: std::time::Duration,
    ) -> ToolCallOutcome {
        let client = {
            let clients = self.clients.read().await;
            clients.get(server_id).cloned()
        };
        let Some(client) = client else {
            return ToolCallOutcome::error(format!("unknown or disconnected tool server: {server_id}"));
        };

        match tokio::time::timeout(timeout, client.call_tool(tool_name, arguments)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => ToolCallOutcome::error(format!("{e}")),
            Err(_) => ToolCallOutcome::error(format!("[TIMEOUT] tool {tool_name} on {server_id}")),
        }
    }
}

impl Default for ToolServerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentProfileConfig;
    use crate::model::ToolInfo;

    fn profile(allowed: &[&str]) -> AgentProfileConfig {
        AgentProfileConfig {
            id: "p".into(),
            enabled: None,
            name: None,
            description: None,
            role_prompt: String::new(),
            allowed_mcp_servers: allowed.iter().map(|s| s.to_string()).collect(),
            approval_required_tools: Vec::new(),
        }
    }

    fn tool(server_id: &str, name: &str) -> ToolInfo {
        ToolInfo {
            server_id: server_id.into(),
            name: name.into(),
            description: String::new(),
            input_schema: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn empty_allow_list_grants_no_tools() {
        let manager = ToolServerManager::new();
        manager
            .tools_cache
            .write()
            .await
            .insert("alpha".into(), vec![tool("alpha", "search")]);

        let tools = manager.tools_for_profile(&profile(&[])).await;
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn wildcard_allow_list_grants_every_connected_servers_tools() {
        let manager = ToolServerManager::new();
        manager
            .tools_cache
            .write()
            .await
            .insert("alpha".into(), vec![tool("alpha", "search")]);
        manager
            .tools_cache
            .write()
            .await
            .insert("beta".into(), vec![tool("beta", "fetch")]);

        let tools = manager.tools_for_profile(&profile(&["*"])).await;
        assert_eq!(tools.len(), 2);
    }

    #[tokio::test]
    async fn named_allow_list_filters_to_matching_servers_only() {
        let manager = ToolServerManager::new();
        manager
            .tools_cache
            .write()
            .await
            .insert("alpha".into(), vec![tool("alpha", "search")]);
        manager
            .tools_cache
            .write()
            .await
            .insert("beta".into(), vec![tool("beta", "fetch")]);

        let tools = manager.tools_for_profile(&profile(&["beta"])).await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].server_id, "beta");
    }
}
