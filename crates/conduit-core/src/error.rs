//! Engine-level error taxonomy.
//!
//! One variant per error kind in the design's error handling section.
//! Each carries a stable `code()` and `recovery_hint()` so the HTTP layer
//! can surface both without re-deriving them from the message text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("tool-server transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("run not found: {0}")]
    NotFound(String),

    #[error("invalid run state: {0}")]
    InvalidState(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Llm(_) => "LLM_ERROR",
            EngineError::Transport(_) => "TOOL_TRANSPORT_ERROR",
            EngineError::Store(_) => "STORE_ERROR",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::InvalidState(_) => "INVALID_STATE",
        }
    }

    pub fn recovery_hint(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "Fix the request payload and retry.",
            EngineError::Llm(_) => "The run has failed; inspect `error` and start a new run.",
            EngineError::Transport(_) => "The tool server may be unreachable; retry the call.",
            EngineError::Store(_) => "Transient storage failure; retry the request.",
            EngineError::NotFound(_) => "Check the run id and retry.",
            EngineError::InvalidState(_) => "The run is not in a state that allows this operation.",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
