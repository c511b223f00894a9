//! Session error types.

use hedgeline_domain::DomainError;
use hedgeline_exec::ExecError;
use thiserror::Error;

/// Session-level errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Stream message could not be routed
    #[error("Malformed stream message: {0}")]
    MalformedMessage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
