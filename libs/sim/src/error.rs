//! Error types for the single-instance-mode engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the merge engine and surfaced from its collaborators.
///
/// `Error` is `Clone` because a bulk match session stores the first worker
/// fault once and hands the same value to every later caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A background matching worker failed and halted its session.
    #[error("Background matching halted: {0}")]
    WorkerFault(Box<Error>),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Matching error: {0}")]
    Matching(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Business rule violation: {0}")]
    BusinessRule(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(resource_type: &str, key: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("{}/{}", resource_type, key))
    }

    /// Unwraps a `WorkerFault` down to the fault the worker originally raised.
    pub fn root_fault(&self) -> &Error {
        match self {
            Error::WorkerFault(inner) => inner.root_fault(),
            other => other,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Configuration(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::Internal(format!("Lock poisoned: {}", e))
    }
}
