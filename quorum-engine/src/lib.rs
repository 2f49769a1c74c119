//! Quorum Decision Engine
//!
//! Combines independent scorers into at most one trading intent per
//! feature snapshot.
//!
//! # Architecture
//!
//! ```text
//! FeatureSnapshot → [Scorer × N, timeout each] → ConsensusEngine → TradingIntent?
//!                                                     │
//!                                        RiskPolicy + RegimeGate
//! ```
//!
//! The engine is side-effect free: it never mutates position state or the
//! trading lock. Callers decide whether an emitted intent is acted upon.

#![warn(clippy::all)]

pub mod consensus;
pub mod error;
pub mod gate;
pub mod pricing;
pub mod risk;
pub mod scorer;
pub mod scorers;
pub mod staleness;

pub use consensus::{
    ConsensusConfig, ConsensusEngine, ConsensusOutcome, ConsensusStats, Decision, EntryReference,
    SkipReason,
};
pub use error::{EngineError, EngineResult, ScorerError};
pub use gate::{GateBlock, RegimeGate, RegimeRule};
pub use pricing::{build_intent, correct_prices, BracketPrices};
pub use risk::{RegimeTargets, RiskPolicy, RiskTargets, TickDistances};
pub use scorer::{Scorer, ScorerRole, ScorerSet, WeightedScorer};
pub use scorers::{Agent, AgentPanel, AgentVote, LinearScorer};
pub use staleness::{SnapshotCheck, StaleFeatureGuard, StaticFeatureWarning};
