//! Engine error types.

use quorum_domain::DomainError;
use thiserror::Error;

/// Errors raised while configuring or running the consensus engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Scorer weights are negative or do not sum to 1.0
    #[error("Invalid scorer weights: {0}")]
    InvalidWeights(String),

    /// Engine configuration is inconsistent
    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),

    /// Two scorers registered under one id
    #[error("Duplicate scorer id: {0}")]
    DuplicateScorer(String),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

/// Failure reported by a single scorer.
///
/// Never aborts a decision cycle; the engine degrades the scorer to Hold.
#[derive(Debug, Clone, Error)]
pub enum ScorerError {
    /// Snapshot does not carry what the scorer needs
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Scorer failed internally
    #[error("Scorer failed: {0}")]
    Failed(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
