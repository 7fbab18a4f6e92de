//! Route composition, grounded in the teacher's `routes::mod`
//! `Router::new().nest(...)` chain.

mod profiles;
mod runs;
mod stream;
mod tool_servers;
pub mod webhooks;

use crate::AppState;

/// Routes gated behind the `X-API-Key` middleware.
pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .nest("/run", runs::create_router())
        .nest("/runs", runs::router())
        .route("/runs/:run_id/stream", axum::routing::get(stream::stream_run_events))
        .nest("/agent-profiles", profiles::router())
        .nest("/tool-servers", tool_servers::router())
}
