//! Built-in scorers.
//!
//! - `LinearScorer`: weighted feature sum squashed through tanh. Stands in
//!   for a trained statistical model behind the same interface.
//! - `AgentPanel`: several single-feature agents vote; the panel signal is
//!   the confidence-weighted mean of their votes.

use async_trait::async_trait;

use quorum_domain::{Confidence, FeatureSnapshot, ScorerOutput, Signal};

use crate::error::ScorerError;
use crate::scorer::{Scorer, ScorerRole};

/// |signal| at or below this is treated as Hold.
const DEAD_BAND: f64 = 0.1;

fn read_feature(snapshot: &FeatureSnapshot, index: usize, source: &str) -> Result<f64, ScorerError> {
    let value = snapshot.features.get(index).copied().ok_or_else(|| {
        ScorerError::InvalidInput(format!(
            "{} needs feature #{}, snapshot has {}",
            source,
            index,
            snapshot.features.len()
        ))
    })?;
    if !value.is_finite() {
        return Err(ScorerError::InvalidInput(format!(
            "{}: feature #{} is not finite",
            source, index
        )));
    }
    Ok(value)
}

fn signal_of(value: f64) -> Signal {
    if value > DEAD_BAND {
        Signal::Buy
    } else if value < -DEAD_BAND {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

// =============================================================================
// LinearScorer
// =============================================================================

/// `tanh(bias + Σ wᵢ·xᵢ)`; sign gives direction, magnitude gives confidence.
#[derive(Debug, Clone)]
pub struct LinearScorer {
    id: String,
    weights: Vec<f64>,
    bias: f64,
}

impl LinearScorer {
    /// Scorer `id` with one weight per leading feature.
    pub fn new(id: impl Into<String>, weights: Vec<f64>, bias: f64) -> Self {
        Self {
            id: id.into(),
            weights,
            bias,
        }
    }

    fn raw(&self, snapshot: &FeatureSnapshot) -> Result<f64, ScorerError> {
        let mut z = self.bias;
        for (i, w) in self.weights.iter().enumerate() {
            z += w * read_feature(snapshot, i, &self.id)?;
        }
        Ok(z.tanh())
    }
}

#[async_trait]
impl Scorer for LinearScorer {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> ScorerRole {
        ScorerRole::Statistical
    }

    async fn score(&self, snapshot: &FeatureSnapshot) -> Result<ScorerOutput, ScorerError> {
        let p = self.raw(snapshot)?;
        let direction = signal_of(p);
        let confidence = match direction {
            Signal::Hold => Confidence::ZERO,
            _ => Confidence::clamped(p.abs()),
        };
        Ok(ScorerOutput::new(self.id.clone(), direction, confidence))
    }
}

// =============================================================================
// AgentPanel
// =============================================================================

/// One heuristic agent reading a single feature.
#[derive(Debug, Clone)]
pub struct Agent {
    pub name: String,
    pub feature_index: usize,
    /// Multiplier applied before tanh; negative inverts the reading
    pub scale: f64,
}

impl Agent {
    /// Agent voting on the sign of `feature_index` scaled by `scale`.
    pub fn new(name: impl Into<String>, feature_index: usize, scale: f64) -> Self {
        Self {
            name: name.into(),
            feature_index,
            scale,
        }
    }
}

/// An agent's individual vote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentVote {
    pub signal: Signal,
    pub confidence: f64,
}

/// Majority vote of simple single-feature agents.
#[derive(Debug, Clone)]
pub struct AgentPanel {
    id: String,
    agents: Vec<Agent>,
}

impl AgentPanel {
    /// Panel `id` voting with `agents`.
    pub fn new(id: impl Into<String>, agents: Vec<Agent>) -> Self {
        Self {
            id: id.into(),
            agents,
        }
    }

    /// Order flow, liquidity, tape reading and footprint agents on features 0..4.
    pub fn standard(id: impl Into<String>) -> Self {
        Self::new(
            id,
            vec![
                Agent::new("order_flow", 0, 1.0),
                Agent::new("liquidity", 1, 1.0),
                Agent::new("tape_reading", 2, 1.0),
                Agent::new("footprint", 3, 1.0),
            ],
        )
    }

    fn votes(&self, snapshot: &FeatureSnapshot) -> Result<Vec<AgentVote>, ScorerError> {
        self.agents
            .iter()
            .map(|agent| {
                let x = read_feature(snapshot, agent.feature_index, &agent.name)? * agent.scale;
                let s = x.tanh();
                Ok(AgentVote {
                    signal: signal_of(s),
                    confidence: s.abs(),
                })
            })
            .collect()
    }

    /// Combine votes: signal = Σ(sign·conf)/Σconf, confidence = mean conf of agreeing agents.
    pub fn combine(votes: &[AgentVote]) -> (Signal, Confidence) {
        let total: f64 = votes.iter().map(|v| v.confidence).sum();
        if total <= f64::EPSILON {
            return (Signal::Hold, Confidence::ZERO);
        }
        let weighted: f64 = votes.iter().map(|v| v.signal.sign() * v.confidence).sum::<f64>() / total;

        let signal = signal_of(weighted);
        if signal == Signal::Hold {
            return (Signal::Hold, Confidence::ZERO);
        }

        let agreeing: Vec<f64> = votes
            .iter()
            .filter(|v| v.signal == signal)
            .map(|v| v.confidence)
            .collect();
        let mean = agreeing.iter().sum::<f64>() / agreeing.len() as f64;
        (signal, Confidence::clamped(mean))
    }
}

#[async_trait]
impl Scorer for AgentPanel {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> ScorerRole {
        ScorerRole::Heuristic
    }

    async fn score(&self, snapshot: &FeatureSnapshot) -> Result<ScorerOutput, ScorerError> {
        if self.agents.is_empty() {
            return Err(ScorerError::Failed("Agent panel has no agents".to_string()));
        }
        let votes = self.votes(snapshot)?;
        let (signal, confidence) = Self::combine(&votes);
        Ok(ScorerOutput::new(self.id.clone(), signal, confidence))
    }
}
