//! Scorer capability interface and the timeout-guarded scorer set.
//!
//! Every scorer runs in its own task under an individual deadline. A scorer
//! that errors, panics or misses the deadline contributes `Hold` with zero
//! confidence; the cycle itself never fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use quorum_domain::{FeatureSnapshot, ScorerOutput};

use crate::error::ScorerError;

// =============================================================================
// Scorer trait
// =============================================================================

/// Role a scorer plays in the agreement filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScorerRole {
    /// Statistical predictor
    Statistical,
    /// Heuristic multi-agent consensus
    Heuristic,
    /// Contributes to the weighted vote only
    Auxiliary,
}

/// A source of trading opinions.
///
/// Implementations:
/// - `LinearScorer` - statistical stand-in (weighted features through tanh)
/// - `AgentPanel` - heuristic confidence-weighted agent vote
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Stable identifier, used to look up the scorer's weight
    fn source_id(&self) -> &str;

    /// Role in the agreement filter
    fn role(&self) -> ScorerRole;

    /// Score one snapshot.
    async fn score(&self, snapshot: &FeatureSnapshot) -> Result<ScorerOutput, ScorerError>;
}

/// A scorer together with its vote weight.
#[derive(Clone)]
pub struct WeightedScorer {
    pub scorer: Arc<dyn Scorer>,
    pub weight: f64,
}

impl WeightedScorer {
    /// Attach `weight` to `scorer`.
    pub fn new(scorer: Arc<dyn Scorer>, weight: f64) -> Self {
        Self { scorer, weight }
    }
}

// =============================================================================
// Scorer set
// =============================================================================

/// Registered scorers plus the per-scorer deadline.
pub struct ScorerSet {
    entries: Vec<WeightedScorer>,
    timeout: Duration,
}

impl ScorerSet {
    /// Scorers evaluated concurrently, each bounded by `timeout`.
    pub fn new(entries: Vec<WeightedScorer>, timeout: Duration) -> Self {
        Self { entries, timeout }
    }

    /// Registered scorers in evaluation order.
    pub fn entries(&self) -> &[WeightedScorer] {
        &self.entries
    }

    /// Per-scorer deadline for one evaluation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run every scorer concurrently and gather one output per scorer,
    /// in registration order.
    pub async fn collect(&self, snapshot: &FeatureSnapshot) -> Vec<ScorerOutput> {
        let snapshot = Arc::new(snapshot.clone());

        let handles: Vec<_> = self
            .entries
            .iter()
            .map(|entry| {
                let scorer = entry.scorer.clone();
                let snapshot = snapshot.clone();
                let deadline = self.timeout;
                tokio::spawn(async move {
                    tokio::time::timeout(deadline, async move { scorer.score(&snapshot).await })
                        .await
                })
            })
            .collect();

        let mut outputs = Vec::with_capacity(handles.len());
        for (entry, handle) in self.entries.iter().zip(handles) {
            let source_id = entry.scorer.source_id();
            let output = match handle.await {
                Ok(Ok(Ok(mut output))) => {
                    if output.source_id != source_id {
                        debug!(
                            expected = source_id,
                            reported = %output.source_id,
                            "Scorer reported foreign source id, normalizing"
                        );
                        output.source_id = source_id.to_string();
                    }
                    output
                }
                Ok(Ok(Err(e))) => {
                    warn!(source_id, error = %e, "Scorer failed, treating as Hold");
                    ScorerOutput::hold(source_id)
                }
                Ok(Err(_elapsed)) => {
                    warn!(
                        source_id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Scorer timed out, treating as Hold"
                    );
                    ScorerOutput::hold(source_id)
                }
                Err(join_error) => {
                    warn!(source_id, error = %join_error, "Scorer task aborted, treating as Hold");
                    ScorerOutput::hold(source_id)
                }
            };
            outputs.push(output);
        }

        outputs
    }
}

// =============================================================================
// Tests
// =============================================================================
