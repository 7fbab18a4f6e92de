//! HTTP error mapping: every non-2xx response carries the same envelope,
//! `{"error": {"code", "message", "recovery_hint"}}`.
//!
//! Grounded in the teacher's `error.rs::AppError`/`ApiError`/`IntoResponse`
//! pattern, extended with `recovery_hint` per the engine's error design and
//! the graceful-shutdown middleware's matching 503 body shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use conduit_core::EngineError;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    code: &'static str,
    message: String,
    recovery_hint: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("too many concurrent runs")]
    TooManyRequests,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, recovery_hint): (StatusCode, &'static str, String, &'static str) =
            match &self {
                AppError::Engine(e) => (engine_status(e), e.code(), e.to_string(), e.recovery_hint()),
                AppError::BadRequest(msg) => (
                    StatusCode::BAD_REQUEST,
                    "BAD_REQUEST",
                    msg.clone(),
                    "Fix the request payload and retry.",
                ),
                AppError::Unauthorized => (
                    StatusCode::UNAUTHORIZED,
                    "UNAUTHORIZED",
                    "missing or invalid API key".to_string(),
                    "Provide a valid X-API-Key header.",
                ),
                AppError::TooManyRequests => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "TOO_MANY_RUNS",
                    "the maximum number of concurrently running runs is already in flight".to_string(),
                    "Wait for an in-flight run to finish and retry.",
                ),
                AppError::Internal(e) => {
                    tracing::error!(error = ?e, "internal error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "an internal error occurred".to_string(),
                        "Retry; if the problem persists, contact the operator.",
                    )
                }
            };

        let body = Json(ApiError {
            error: ApiErrorBody {
                code,
                message,
                recovery_hint,
            },
        });
        (status, body).into_response()
    }
}

fn engine_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidState(_) => StatusCode::CONFLICT,
        EngineError::Llm(_) | EngineError::Transport(_) | EngineError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
