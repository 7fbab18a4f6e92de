//! `/tool-servers` — connected tool server ids and their discovered tools.

use axum::extract::State;
use axum::Json;
use conduit_core::model::ToolInfo;
use serde::Serialize;

use crate::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/", axum::routing::get(list_tool_servers))
}

#[derive(Debug, Serialize)]
struct ToolServerStatus {
    server_id: String,
    name: String,
    connected: bool,
    tools: Vec<ToolInfo>,
}

#[derive(Debug, Serialize)]
struct ToolServersResponse {
    connected: bool,
    servers: Vec<ToolServerStatus>,
}

async fn list_tool_servers(State(state): State<AppState>) -> Json<ToolServersResponse> {
    let snapshots = state.container.tools.server_snapshots().await;
    let connected = snapshots.iter().any(|(_, alive, _)| *alive);
    let servers = snapshots
        .into_iter()
        .map(|(server_id, alive, tools)| ToolServerStatus {
            name: server_id.clone(),
            server_id,
            connected: alive,
            tools,
        })
        .collect();
    Json(ToolServersResponse { connected, servers })
}
