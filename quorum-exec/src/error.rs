//! Execution layer error types.

use quorum_domain::DomainError;
use thiserror::Error;

/// Errors that can occur talking to the order gateway.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// Gateway did not answer in time
    #[error("Gateway timeout: {0}")]
    Timeout(String),

    /// Connection dropped or refused
    #[error("Gateway connection error: {0}")]
    Connection(String),

    /// Gateway answered with an error
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Order was rejected by the gateway
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Gateway does not know the order id
    #[error("Unknown order: {0}")]
    UnknownOrder(String),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl ExecError {
    /// Timeouts and connection resets are worth retrying; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecError::Timeout(_) | ExecError::Connection(_))
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
