//! Graceful shutdown: an in-flight request counter plus a SIGTERM-triggered
//! drain window, after which any remaining request is still served but new
//! requests are turned away with a 503.
//!
//! Grounded in `original_source/app/middleware/graceful_shutdown.py`: the
//! 503 body shape (`SERVICE_SHUTTING_DOWN` with a `recovery_hint` and
//! `Retry-After` header) and the poll-based drain wait. Generalized from the
//! teacher CLI's `ctrl_c`-only handling to full SIGTERM, matching container
//! orchestrator shutdown signals.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::sync::Notify;

use crate::AppState;

pub struct ShutdownState {
    in_flight: AtomicI64,
    shutting_down: std::sync::atomic::AtomicBool,
    notify: Notify,
}

impl ShutdownState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicI64::new(0),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn begin_request(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn end_request(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    fn in_flight_count(&self) -> i64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until either every in-flight request drains or `timeout`
    /// elapses, whichever comes first — logging progress every second, the
    /// way the original's `_wait_and_exit` does.
    pub async fn wait_for_drain(&self, timeout: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = self.in_flight_count();
            if remaining <= 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(remaining, "graceful shutdown timed out with requests still in flight");
                return;
            }
            tracing::info!(remaining, "waiting for in-flight requests to drain");
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
    }
}

pub async fn graceful_shutdown_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if state.shutdown.is_shutting_down() {
        let body = Json(json!({
            "error": {
                "code": "SERVICE_SHUTTING_DOWN",
                "message": "the server is shutting down",
                "recovery_hint": "Wait a few seconds and retry against another instance.",
            }
        }));
        let mut response = (StatusCode::SERVICE_UNAVAILABLE, body).into_response();
        response
            .headers_mut()
            .insert("Retry-After", HeaderValue::from_static("10"));
        return response;
    }

    state.shutdown.begin_request();
    let response = next.run(req).await;
    state.shutdown.end_request();
    response
}

/// Resolves once a SIGTERM or Ctrl+C is received.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sigterm) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            std::future::pending::<()>().await;
            return;
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
