//! Unified error hierarchy for pd-diary
//!
//! Errors are local-then-surfaced: the analytics core never retries, it
//! converts failures into a typed error and a human-readable message that the
//! caller decides how to present.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all pd-diary operations
#[derive(Debug, Error)]
pub enum DiaryError {
    /// Record repository failures (transport or payload)
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Record file loading errors
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by a [`crate::repository::RecordRepository`]
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RepositoryError {
    /// The remote API could not be reached
    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    /// The remote API answered with a payload that could not be decoded
    #[error("Malformed payload: {reason}")]
    Parse { reason: String },

    /// The remote API rejected the request
    #[error("Request rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },
}

/// Errors raised while loading record files
#[derive(Debug, Error)]
pub enum ImportError {
    /// Unsupported file extension
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    /// Format-specific parsing error
    #[error("Parse error in {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    /// A row is missing a required column
    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

/// Result type alias for pd-diary operations
pub type Result<T> = std::result::Result<T, DiaryError>;

impl DiaryError {
    /// Check if a new refresh could reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DiaryError::Repository(RepositoryError::Transport { .. }) | DiaryError::Io(_)
        ) || matches!(
            self,
            DiaryError::Repository(RepositoryError::Rejected { status, .. }) if *status >= 500
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DiaryError::Repository(RepositoryError::Transport { .. }) => ErrorSeverity::Warning,
            DiaryError::Repository(_) => ErrorSeverity::Error,
            DiaryError::Import(_) | DiaryError::Io(_) => ErrorSeverity::Error,
            DiaryError::Internal(_) => ErrorSeverity::Critical,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            DiaryError::Repository(RepositoryError::Transport { .. }) => {
                "Unable to reach the diary service. Please check your connection and try again."
                    .to_string()
            }
            DiaryError::Repository(RepositoryError::Parse { .. }) => {
                "The diary service returned data that could not be read.".to_string()
            }
            DiaryError::Import(ImportError::ParseError { path, .. }) => {
                format!("Could not read records from {}", path.display())
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
        }
    }
}
