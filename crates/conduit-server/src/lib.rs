//! HTTP API Adapter over the run execution engine.
//!
//! Grounded in the teacher's `krusty-server::lib`: an `AppState` of
//! `Arc`-wrapped services, `build_router()` nesting route modules under
//! `/api` behind the auth middleware, and `start_server()` binding a
//! `TcpListener` and driving `axum::serve` to completion with graceful
//! shutdown wired in.

pub mod auth;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod shutdown;
pub mod webhook_dedup;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::{middleware as axum_middleware, Router};
use conduit_core::config::Settings;
use conduit_core::Container;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use shutdown::ShutdownState;
use webhook_dedup::WebhookDedupCache;

#[derive(Clone)]
pub struct AppState {
    pub container: Arc<Container>,
    pub settings: Arc<Settings>,
    pub shutdown: Arc<ShutdownState>,
    pub webhook_dedup: Arc<WebhookDedupCache>,
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub port: u16,
}

pub fn build_router(container: Arc<Container>) -> (Router, AppState) {
    let settings = Arc::new(container.settings.clone());
    let state = AppState {
        webhook_dedup: Arc::new(WebhookDedupCache::new(Duration::from_secs(
            settings.webhook_dedup_ttl_seconds,
        ))),
        settings,
        shutdown: ShutdownState::new(),
        container,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    let api = routes::router()
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth::auth_middleware));

    // Webhook intake authenticates itself via HMAC (`X-Webhook-Token`) and
    // is never gated by the internal `X-API-Key` middleware.
    let webhooks = routes::webhooks::router();

    let router = Router::new()
        .nest("/api", api)
        .nest("/api/webhooks", webhooks)
        .route("/health", axum::routing::get(health))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            shutdown::graceful_shutdown_middleware,
        ))
        .layer(axum_middleware::from_fn(middleware::request_id::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state.clone());

    (router, state)
}

async fn health() -> &'static str {
    "ok"
}

/// Binds and serves the API, draining in-flight requests for up to
/// `graceful_shutdown_timeout_seconds` after a SIGTERM/Ctrl+C before the
/// listener actually stops.
pub async fn start_server(container: Arc<Container>, config: ServerConfig) -> anyhow::Result<()> {
    let drain_timeout = Duration::from_secs(container.settings.graceful_shutdown_timeout_seconds);
    let (router, state) = build_router(container);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "conduit-server listening");

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        shutdown::shutdown_signal().await;
        tracing::info!("shutdown signal received; draining in-flight requests");
        state.shutdown.wait_for_drain(drain_timeout).await;
        state.container.tools.shutdown().await;
        let _ = done_tx.send(());
    });

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async {
            let _ = done_rx.await;
        })
        .await?;
    Ok(())
}
