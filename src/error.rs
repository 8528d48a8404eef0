use std::path::PathBuf;
use std::process::ExitCode;

use crate::queue::{TaskId, TaskKind, TaskStatus};

/// Errors that cause coding-agent to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} failed (exit {code}): {message}")]
    ToolFailed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("invalid webhook signature")]
    BadSignature,

    #[error("{0}")]
    Other(String),
}

impl ExitError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExitError::Config(_) => ExitCode::from(2),
            ExitError::ToolNotFound { .. } => ExitCode::from(3),
            ExitError::ToolFailed { .. } => ExitCode::from(4),
            ExitError::Timeout { .. } => ExitCode::from(5),
            ExitError::BadSignature => ExitCode::from(6),
            ExitError::Other(_) => ExitCode::from(1),
        }
    }
}

/// Failures of the task store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {id} is a {actual} task, transition requires {expected}")]
    KindMismatch {
        id: TaskId,
        expected: TaskKind,
        actual: TaskKind,
    },

    #[error("task store {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("task {id} cannot be reset: task {active} is already active for the same item")]
    DuplicateActive { id: TaskId, active: TaskId },

    #[error("timed out waiting for store lock {0}")]
    LockTimeout(PathBuf),

    #[error("task store i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
