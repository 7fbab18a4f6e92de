//! A single tool-server connection: handshake, request/response
//! demultiplexing, and tool invocation.
//!
//! Grounded in the teacher's `mcp::client::McpClient`: a background receive
//! task drains the transport and resolves pending requests by numeric id
//! through a `oneshot` channel map, giving per-connection single-flight
//! tolerance for concurrent callers without an explicit per-call mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{oneshot, RwLock};

use crate::error::{EngineError, Result};
use crate::model::{ToolCallOutcome, ToolContent, ToolInfo};

use super::protocol::{ClientInfo, RpcNotification, RpcRequest, RpcResponse, PROTOCOL_VERSION};
use super::transport::StdioTransport;

const REQUEST_TIMEOUT_SECS: u64 = 30;

type PendingMap = Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

pub struct McpClient {
    server_id: String,
    transport: Arc<StdioTransport>,
    pending: PendingMap,
    next_id: AtomicI64,
    shutdown: Option<oneshot::Sender<()>>,
}

impl McpClient {
    pub async fn connect(
        server_id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let transport = Arc::new(StdioTransport::spawn(command, args, env)?);
        let pending: PendingMap = Arc::new(RwLock::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        spawn_receive_loop(transport.clone(), pending.clone(), shutdown_rx);

        let client = Self {
            server_id: server_id.to_string(),
            transport,
            pending,
            next_id: AtomicI64::new(1),
            shutdown: Some(shutdown_tx),
        };

        client.initialize().await?;
        Ok(client)
    }

    async fn initialize(&self) -> Result<()> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "clientInfo": ClientInfo::default(),
                "capabilities": {},
            }),
        )
        .await?;

        let notification = RpcNotification::new("notifications/initialized", json!({}));
        let line = serde_json::to_string(&notification)
            .map_err(|e| EngineError::Transport(format!("encoding notification: {e}")))?;
        self.transport.send(&line).await?;
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let result = self.request("tools/list", json!({})).await?;
        let raw_tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(raw_tools
            .into_iter()
            .map(|t| ToolInfo {
                server_id: self.server_id.clone(),
                name: t.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                description: t
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                input_schema: t.get("inputSchema").cloned().unwrap_or(Value::Null),
            })
            .collect())
    }

    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolCallOutcome> {
        let result = self
            .request(
                "tools/call",
                json!({ "name": tool_name, "arguments": arguments }),
            )
            .await?;

        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let content = result
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|c| match c.get("text").and_then(Value::as_str) {
                Some(text) => ToolContent::Text { text: text.to_string() },
                None => ToolContent::Other { value: c },
            })
            .collect();

        Ok(ToolCallOutcome { content, is_error })
    }

    pub async fn is_alive(&self) -> bool {
        self.transport.is_alive().await
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        let req = RpcRequest::new(id, method, params);
        let line = serde_json::to_string(&req)
            .map_err(|e| EngineError::Transport(format!("encoding request: {e}")))?;

        if let Err(e) = self.transport.send(&line).await {
            self.pending.write().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::Transport(format!(
                "tool server closed connection while awaiting {method}"
            ))),
            Err(_) => {
                self.pending.write().await.remove(&id);
                Err(EngineError::Transport(format!(
                    "timed out waiting for tool server response to {method}"
                )))
            }
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn spawn_receive_loop(
    transport: Arc<StdioTransport>,
    pending: PendingMap,
    mut shutdown: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    break;
                }
                line = transport.receive() => {
                    match line {
                        Ok(Some(line)) => handle_message(&pending, &line).await,
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "tool server transport error");
                            break;
                        }
                    }
                }
            }
        }
    });
}

async fn handle_message(pending: &PendingMap, line: &str) {
    let response: RpcResponse = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, line, "malformed tool server response");
            return;
        }
    };
    let Some(id) = response.id else {
        return;
    };
    let Some(tx) = pending.write().await.remove(&id) else {
        return;
    };
    let result = match (response.result, response.error) {
        (Some(value), _) => Ok(value),
        (None, Some(err)) => Err(EngineError::Transport(format!(
            "tool server error {}: {}",
            err.code, err.message
        ))),
        (None, None) => Ok(Value::Null),
    };
    let _ = tx.send(result);
}
