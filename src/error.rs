//! Error taxonomy for the configuration engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::schema::ValidationError;

/// Errors that can occur while loading, mutating, or persisting configuration.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The backing file exists but is not a well-formed document.
    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The candidate tree violated the schema. Always the complete list.
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    /// Another mutation is already running through the pipeline.
    #[error("Configuration pipeline is busy")]
    Busy,

    /// The in-memory commit succeeded but the durable write did not.
    #[error("Failed to persist configuration to {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backup index out of range.
    #[error("Backup {index} not found ({available} available)")]
    NotFound { index: usize, available: usize },

    /// File watching could not be set up.
    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Reading the backing file failed.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A dot-path could not be applied to the tree.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The tree cannot be rendered in the requested format.
    #[error("Export to {format} failed: {message}")]
    Export { format: &'static str, message: String },

    /// Engine settings were unreadable or inconsistent.
    #[error("Settings error: {0}")]
    Settings(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Violations carried by a validation failure, empty for any other error.
    pub fn violations(&self) -> &[ValidationError] {
        match self {
            EngineError::Validation(errors) => errors,
            _ => &[],
        }
    }

    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
