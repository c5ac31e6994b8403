//! Runtime error types

use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────────────
// Resolution Error
// ─────────────────────────────────────────────────────────────────────────────

/// A script source could not be located or compiled
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("Script not found: {0}")]
    NotFound(String),

    #[error("Failed to compile script: {0}")]
    CompileFailed(String),

    #[error("Failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Script Error
// ─────────────────────────────────────────────────────────────────────────────

/// Failure raised inside an execution body
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// The execution observed a stop request at a checkpoint
    #[error("Script stopped")]
    Stopped,

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("{0}")]
    Failed(String),

    #[error("Script panicked: {0}")]
    Panicked(String),
}

impl ScriptError {
    pub fn failed(message: impl Into<String>) -> Self {
        ScriptError::Failed(message.into())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Failed to spawn thread for {thread_name}: {message}")]
    Spawn { thread_name: String, message: String },
}

/// Result type for registry operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
