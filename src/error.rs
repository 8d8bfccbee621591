use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure that aborts a single task. These never escape the run loop;
/// the engine records them on the task's result and moves on (or halts,
/// when stop-on-error is set).
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("unresolved placeholder '{placeholder}' in {field}")]
    VariableResolution { placeholder: String, field: String },

    #[error("configuration '{name}' not found")]
    ConfigNotFound { name: String },

    #[error("file '{path}': {reason}")]
    File { path: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Classified transport failure, surfaced after the client's own retries
/// are exhausted.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Request(String),
}

/// Failure of a single `extractVars` entry. Recorded as a warning on an
/// otherwise-successful result, never as a task failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("empty extraction path")]
    EmptyPath,

    #[error("header '{0}' not present")]
    MissingHeader(String),

    #[error("response body is not valid JSON")]
    NonJsonBody,

    #[error("segment '{segment}' not found in path '{path}'")]
    PathNotFound { path: String, segment: String },

    #[error("index {index} out of bounds in path '{path}'")]
    IndexOutOfBounds { path: String, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    VariableResolution,
    ConfigNotFound,
    File,
    Transport,
}

/// Serializable error record attached to a failed `TaskResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&TaskError> for ErrorInfo {
    fn from(err: &TaskError) -> Self {
        let kind = match err {
            TaskError::VariableResolution { .. } => ErrorKind::VariableResolution,
            TaskError::ConfigNotFound { .. } => ErrorKind::ConfigNotFound,
            TaskError::File { .. } => ErrorKind::File,
            TaskError::Transport(_) => ErrorKind::Transport,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}
