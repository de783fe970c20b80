// Engine error taxonomy
//
// Errors local to a single watch expression or breakpoint condition are
// `EvaluationError`s and get stored on that entity. Everything else is an
// `EngineError` returned to the caller.

use crate::types::ExecutionState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Execution already in progress")]
    AlreadyRunning,

    #[error("Execution timed out after {0}ms")]
    Timeout(u64),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("Invalid session state: {operation} requires {required} (current state: {state})")]
    InvalidSessionState {
        operation: &'static str,
        required: &'static str,
        state: ExecutionState,
    },

    #[error("Script error: {0}")]
    Script(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("No call frame at index {0}")]
    FrameNotFound(usize),

    #[error("Runtime initialization failed: {0}")]
    Init(String),

    #[error("Engine has been disposed")]
    Disposed,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl EngineError {
    pub(crate) fn invalid_state(
        operation: &'static str,
        required: &'static str,
        state: ExecutionState,
    ) -> Self {
        EngineError::InvalidSessionState {
            operation,
            required,
            state,
        }
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, EngineError::InvalidSessionState { .. })
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Task(err.to_string())
    }
}

/// A watch expression or breakpoint condition that failed to evaluate.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("Failed to evaluate `{expression}`: {message}")]
pub struct EvaluationError {
    pub expression: String,
    pub message: String,
}

impl EvaluationError {
    pub fn new(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            message: message.into(),
        }
    }
}
