//! Multi-source consensus decision engine.
//!
//! Turns one `ScorerOutput` per registered scorer into zero or one
//! `TradingIntent`.
//!
//! ```text
//! snapshot ─► stale guard ─► scorers (timeout each) ─► agreement filter
//!          ─► weighted vote / thresholds ─► regime gate ─► priced intent
//! ```
//!
//! The engine never touches position state or the trading lock; it only
//! returns a value.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use quorum_domain::{
    Confidence, FeatureSnapshot, OrderSide, Regime, ScorerOutput, Signal, TickSize, TradingIntent,
};

use crate::error::{EngineError, EngineResult};
use crate::gate::{GateBlock, RegimeGate};
use crate::pricing::build_intent;
use crate::risk::RiskPolicy;
use crate::scorer::{ScorerRole, ScorerSet, WeightedScorer};
use crate::staleness::{SnapshotCheck, StaleFeatureGuard, StaticFeatureWarning};

const WEIGHT_TOLERANCE: f64 = 1e-6;

// =============================================================================
// Configuration
// =============================================================================

/// Which book price becomes the intent's entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryReference {
    Last,
    Mid,
}

/// Consensus engine configuration.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Combined score above which a Buy is emitted
    pub buy_threshold: f64,
    /// Combined score below the negation of which a Sell is emitted
    pub sell_threshold: f64,
    /// Statistical and heuristic scorers must point the same way
    pub require_agreement: bool,
    /// Floor for statistical scorers under the agreement filter
    pub min_statistical_confidence: f64,
    /// Floor for heuristic scorers under the agreement filter
    pub min_heuristic_confidence: f64,
    /// Identical snapshots in a row that count as a frozen feed
    pub stale_snapshot_limit: usize,
    /// Per-scorer deadline
    pub scorer_timeout: Duration,
    pub tick_size: TickSize,
    pub entry_reference: EntryReference,
    pub regime_gate: RegimeGate,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            buy_threshold: 0.3,
            sell_threshold: 0.3,
            require_agreement: true,
            min_statistical_confidence: 0.6,
            min_heuristic_confidence: 0.55,
            stale_snapshot_limit: 5,
            scorer_timeout: Duration::from_millis(200),
            tick_size: TickSize::default(),
            entry_reference: EntryReference::Last,
            regime_gate: RegimeGate::default(),
        }
    }
}

// =============================================================================
// Outcome types
// =============================================================================

/// Why no intent was produced
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Combined score inside the dead zone
    BelowThreshold,
    /// Statistical and heuristic scorers disagree
    Disagreement,
    /// A filtered scorer is below its confidence floor
    ConfidenceTooLow {
        source_id: String,
        confidence: f64,
        required: f64,
    },
    /// Price fields frozen
    StaleFeatures,
    /// Snapshot timestamp did not advance
    NonMonotonicSnapshot,
    /// Regime gate refused the direction or strength
    RegimeBlocked { regime: Regime, block: GateBlock },
    /// Prices could not be made valid
    InvalidPrices(String),
}

/// Emit an intent or record why not.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Emit(TradingIntent),
    Skip(SkipReason),
}

/// Result of one decision cycle.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub decision: Decision,
    /// Σ weight × signed confidence (0 when not computed)
    pub combined_score: f64,
    pub outputs: Vec<ScorerOutput>,
    pub warning: Option<StaticFeatureWarning>,
}

impl ConsensusOutcome {
    /// The emitted intent, if any.
    pub fn intent(&self) -> Option<&TradingIntent> {
        match &self.decision {
            Decision::Emit(intent) => Some(intent),
            Decision::Skip(_) => None,
        }
    }

    /// Why no intent was emitted, if skipped.
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match &self.decision {
            Decision::Emit(_) => None,
            Decision::Skip(reason) => Some(reason),
        }
    }
}

/// Decision counters since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsensusStats {
    pub evaluated: u64,
    pub emitted: u64,
    pub below_threshold: u64,
    pub disagreement: u64,
    pub confidence_too_low: u64,
    pub stale: u64,
    pub non_monotonic: u64,
    pub regime_blocked: u64,
    pub invalid_prices: u64,
}

impl ConsensusStats {
    fn record(&mut self, decision: &Decision) {
        self.evaluated += 1;
        let counter = match decision {
            Decision::Emit(_) => &mut self.emitted,
            Decision::Skip(SkipReason::BelowThreshold) => &mut self.below_threshold,
            Decision::Skip(SkipReason::Disagreement) => &mut self.disagreement,
            Decision::Skip(SkipReason::ConfidenceTooLow { .. }) => &mut self.confidence_too_low,
            Decision::Skip(SkipReason::StaleFeatures) => &mut self.stale,
            Decision::Skip(SkipReason::NonMonotonicSnapshot) => &mut self.non_monotonic,
            Decision::Skip(SkipReason::RegimeBlocked { .. }) => &mut self.regime_blocked,
            Decision::Skip(SkipReason::InvalidPrices(_)) => &mut self.invalid_prices,
        };
        *counter += 1;
    }
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Registration {
    role: ScorerRole,
    weight: f64,
}

/// Weighted scorer consensus turning feature snapshots into intents.
pub struct ConsensusEngine {
    config: ConsensusConfig,
    scorers: ScorerSet,
    registry: Vec<(String, Registration)>,
    risk: Arc<dyn RiskPolicy>,
    guard: StaleFeatureGuard,
    stats: ConsensusStats,
}

impl ConsensusEngine {
    /// Create an engine.
    ///
    /// # Errors
    /// - weights negative, non-finite, or not summing to 1.0
    /// - duplicate scorer ids
    /// - thresholds outside [0, 1]
    /// - agreement filter without both a statistical and a heuristic scorer
    pub fn new(
        config: ConsensusConfig,
        scorers: Vec<WeightedScorer>,
        risk: Arc<dyn RiskPolicy>,
    ) -> EngineResult<Self> {
        for (name, value) in [
            ("buy_threshold", config.buy_threshold),
            ("sell_threshold", config.sell_threshold),
            ("min_statistical_confidence", config.min_statistical_confidence),
            ("min_heuristic_confidence", config.min_heuristic_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if scorers.is_empty() {
            return Err(EngineError::InvalidConfig("No scorers registered".to_string()));
        }

        let mut seen = HashSet::new();
        let mut registry = Vec::with_capacity(scorers.len());
        let mut total = 0.0;
        for entry in &scorers {
            let id = entry.scorer.source_id().to_string();
            if !seen.insert(id.clone()) {
                return Err(EngineError::DuplicateScorer(id));
            }
            if !entry.weight.is_finite() || entry.weight < 0.0 {
                return Err(EngineError::InvalidWeights(format!(
                    "Weight for {} must be a non-negative number, got {}",
                    id, entry.weight
                )));
            }
            total += entry.weight;
            registry.push((
                id,
                Registration {
                    role: entry.scorer.role(),
                    weight: entry.weight,
                },
            ));
        }
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(EngineError::InvalidWeights(format!(
                "Weights must sum to 1.0, got {}",
                total
            )));
        }

        if config.require_agreement {
            let has = |role| registry.iter().any(|(_, r)| r.role == role);
            if !has(ScorerRole::Statistical) || !has(ScorerRole::Heuristic) {
                return Err(EngineError::InvalidConfig(
                    "Agreement filter needs a statistical and a heuristic scorer".to_string(),
                ));
            }
        }

        let guard = StaleFeatureGuard::new(config.stale_snapshot_limit);
        let scorers = ScorerSet::new(scorers, config.scorer_timeout);

        Ok(Self {
            config,
            scorers,
            registry,
            risk,
            guard,
            stats: ConsensusStats::default(),
        })
    }

    /// Thresholds and limits in use.
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Running decision counters since start.
    pub fn stats(&self) -> &ConsensusStats {
        &self.stats
    }

    /// Score the snapshot with every registered scorer and decide.
    pub async fn evaluate(&mut self, snapshot: &FeatureSnapshot) -> ConsensusOutcome {
        if let Some(outcome) = self.screen(snapshot) {
            return outcome;
        }
        let outputs = self.scorers.collect(snapshot).await;
        self.decide_fresh(snapshot, outputs)
    }

    /// Decide from already collected outputs.
    ///
    /// Scorers without an output are treated as Hold.
    pub fn decide(&mut self, snapshot: &FeatureSnapshot, outputs: Vec<ScorerOutput>) -> ConsensusOutcome {
        if let Some(outcome) = self.screen(snapshot) {
            return outcome;
        }
        self.decide_fresh(snapshot, outputs)
    }

    /// Stale and ordering checks. Returns an outcome when the snapshot must not be scored.
    fn screen(&mut self, snapshot: &FeatureSnapshot) -> Option<ConsensusOutcome> {
        match self.guard.observe(snapshot) {
            SnapshotCheck::Fresh => None,
            SnapshotCheck::Stale(warning) => {
                warn!(
                    repeated = warning.repeated,
                    last_price = %warning.last_price,
                    "Static features detected, refusing to decide"
                );
                Some(self.finish(Decision::Skip(SkipReason::StaleFeatures), 0.0, Vec::new(), Some(warning)))
            }
            SnapshotCheck::NonMonotonic { previous, received } => {
                warn!(%previous, %received, "Snapshot timestamp did not advance, ignored");
                Some(self.finish(Decision::Skip(SkipReason::NonMonotonicSnapshot), 0.0, Vec::new(), None))
            }
        }
    }

    fn decide_fresh(&mut self, snapshot: &FeatureSnapshot, outputs: Vec<ScorerOutput>) -> ConsensusOutcome {
        let by_source: HashMap<&str, &ScorerOutput> =
            outputs.iter().map(|o| (o.source_id.as_str(), o)).collect();

        for output in &outputs {
            if !self.registry.iter().any(|(id, _)| *id == output.source_id) {
                debug!(source_id = %output.source_id, "Output from unregistered scorer ignored");
            }
        }

        let combined: f64 = self
            .registry
            .iter()
            .map(|(id, reg)| {
                let signed = by_source.get(id.as_str()).map(|o| o.signed_confidence()).unwrap_or(0.0);
                reg.weight * signed
            })
            .sum();

        let decision = self.choose(snapshot, &by_source, combined);
        self.finish(decision, combined, outputs, None)
    }

    fn choose(
        &self,
        snapshot: &FeatureSnapshot,
        by_source: &HashMap<&str, &ScorerOutput>,
        combined: f64,
    ) -> Decision {
        let agreed = if self.config.require_agreement {
            match self.agreement(by_source) {
                Ok(direction) => Some(direction),
                Err(reason) => return Decision::Skip(reason),
            }
        } else {
            None
        };

        let direction = if combined > self.config.buy_threshold {
            OrderSide::Buy
        } else if combined < -self.config.sell_threshold {
            OrderSide::Sell
        } else {
            return Decision::Skip(SkipReason::BelowThreshold);
        };

        if let Some(agreed) = agreed {
            if agreed != direction {
                return Decision::Skip(SkipReason::Disagreement);
            }
        }

        let strength = combined.abs().min(1.0);
        if let Err(block) = self.config.regime_gate.check(direction, strength, snapshot.regime) {
            return Decision::Skip(SkipReason::RegimeBlocked {
                regime: snapshot.regime,
                block,
            });
        }

        let reference = match self.config.entry_reference {
            EntryReference::Last => snapshot.last_price.as_decimal(),
            EntryReference::Mid => snapshot.mid(),
        };

        match self.price(direction, strength, reference, snapshot) {
            Ok(intent) => Decision::Emit(intent),
            Err(e) => Decision::Skip(SkipReason::InvalidPrices(e.to_string())),
        }
    }

    /// All role-tagged scorers must share one direction and clear their floors.
    fn agreement(&self, by_source: &HashMap<&str, &ScorerOutput>) -> Result<OrderSide, SkipReason> {
        let mut agreed: Option<OrderSide> = None;

        for (id, reg) in &self.registry {
            let required = match reg.role {
                ScorerRole::Statistical => self.config.min_statistical_confidence,
                ScorerRole::Heuristic => self.config.min_heuristic_confidence,
                ScorerRole::Auxiliary => continue,
            };

            let (direction, confidence) = by_source
                .get(id.as_str())
                .map(|o| (o.direction, o.confidence.value()))
                .unwrap_or((Signal::Hold, 0.0));

            let side = match direction.order_side() {
                Some(side) => side,
                None => return Err(SkipReason::Disagreement),
            };
            match agreed {
                Some(prev) if prev != side => return Err(SkipReason::Disagreement),
                _ => agreed = Some(side),
            }

            if confidence < required {
                return Err(SkipReason::ConfidenceTooLow {
                    source_id: id.clone(),
                    confidence,
                    required,
                });
            }
        }

        agreed.ok_or(SkipReason::Disagreement)
    }

    fn price(
        &self,
        direction: OrderSide,
        strength: f64,
        reference: Decimal,
        snapshot: &FeatureSnapshot,
    ) -> EngineResult<TradingIntent> {
        build_intent(
            direction,
            Confidence::clamped(strength),
            reference,
            snapshot.regime,
            self.risk.as_ref(),
            self.config.tick_size,
            snapshot.timestamp,
        )
    }

    fn finish(
        &mut self,
        decision: Decision,
        combined_score: f64,
        outputs: Vec<ScorerOutput>,
        warning: Option<StaticFeatureWarning>,
    ) -> ConsensusOutcome {
        self.stats.record(&decision);
        match &decision {
            Decision::Emit(intent) => info!(
                direction = %intent.direction(),
                confidence = %intent.confidence(),
                entry = %intent.entry_price(),
                stop = %intent.stop_price(),
                take = %intent.take_profit_price(),
                combined_score,
                "Consensus emitted intent"
            ),
            Decision::Skip(reason) => debug!(?reason, combined_score, "No intent"),
        }
        ConsensusOutcome {
            decision,
            combined_score,
            outputs,
            warning,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScorerError;
    use crate::risk::RegimeTargets;
    use crate::scorer::Scorer;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use quorum_domain::Price;
    use rust_decimal_macros::dec;

    struct FixedScorer {
        id: &'static str,
        role: ScorerRole,
        signal: Signal,
        confidence: f64,
    }

    #[async_trait]
    impl Scorer for FixedScorer {
        fn source_id(&self) -> &str {
            self.id
        }

        fn role(&self) -> ScorerRole {
            self.role
        }

        async fn score(&self, _snapshot: &FeatureSnapshot) -> Result<ScorerOutput, ScorerError> {
            Ok(ScorerOutput::new(
                self.id,
                self.signal,
                Confidence::new(self.confidence).unwrap(),
            ))
        }
    }

    fn fixed(id: &'static str, role: ScorerRole, signal: Signal, confidence: f64, weight: f64) -> WeightedScorer {
        WeightedScorer::new(
            Arc::new(FixedScorer {
                id,
                role,
                signal,
                confidence,
            }),
            weight,
        )
    }

    fn engine_with(config: ConsensusConfig, scorers: Vec<WeightedScorer>) -> ConsensusEngine {
        let risk = Arc::new(RegimeTargets::new(config.tick_size));
        ConsensusEngine::new(config, scorers, risk).unwrap()
    }

    fn default_engine() -> ConsensusEngine {
        engine_with(
            ConsensusConfig::default(),
            vec![
                fixed("stat", ScorerRole::Statistical, Signal::Hold, 0.0, 0.6),
                fixed("heur", ScorerRole::Heuristic, Signal::Hold, 0.0, 0.4),
            ],
        )
    }

    fn snapshot_at(at: DateTime<Utc>, last: Decimal, regime: Regime) -> FeatureSnapshot {
        FeatureSnapshot {
            timestamp: at,
            features: vec![0.0; 4],
            best_bid: Price::new(last - dec!(0.5)).unwrap(),
            best_ask: Price::new(last).unwrap(),
            last_price: Price::new(last).unwrap(),
            regime,
        }
    }

    fn out(id: &str, signal: Signal, confidence: f64) -> ScorerOutput {
        ScorerOutput::new(id, signal, Confidence::new(confidence).unwrap())
    }

    #[test]
    fn test_agreeing_buy_emits_intent() {
        let mut engine = default_engine();
        let snap = snapshot_at(Utc::now(), dec!(5000), Regime::Undefined);

        let outcome = engine.decide(
            &snap,
            vec![out("stat", Signal::Buy, 0.8), out("heur", Signal::Buy, 0.7)],
        );

        assert!((outcome.combined_score - 0.76).abs() < 1e-9);
        let intent = outcome.intent().expect("intent emitted");
        assert_eq!(intent.direction(), OrderSide::Buy);
        assert!(intent.validate().is_ok());
        assert!((intent.confidence().value() - 0.76).abs() < 1e-9);
        assert_eq!(intent.entry_price().as_decimal(), dec!(5000));
    }

    #[test]
    fn test_disagreement_blocks_intent() {
        let mut engine = default_engine();
        let snap = snapshot_at(Utc::now(), dec!(5000), Regime::Undefined);

        let outcome = engine.decide(
            &snap,
            vec![out("stat", Signal::Buy, 0.9), out("heur", Signal::Sell, 0.9)],
        );

        assert_eq!(outcome.skip_reason(), Some(&SkipReason::Disagreement));
        assert_eq!(engine.stats().disagreement, 1);
    }

    #[test]
    fn test_without_agreement_filter_combined_score_rules() {
        let config = ConsensusConfig {
            require_agreement: false,
            ..ConsensusConfig::default()
        };
        let mut engine = engine_with(
            config,
            vec![
                fixed("stat", ScorerRole::Statistical, Signal::Hold, 0.0, 0.6),
                fixed("heur", ScorerRole::Heuristic, Signal::Hold, 0.0, 0.4),
            ],
        );
        let snap = snapshot_at(Utc::now(), dec!(5000), Regime::Undefined);

        // -0.6*0.9 + 0.4*0.3 = -0.42
        let outcome = engine.decide(
            &snap,
            vec![out("stat", Signal::Sell, 0.9), out("heur", Signal::Buy, 0.3)],
        );
        let intent = outcome.intent().expect("sell emitted");
        assert_eq!(intent.direction(), OrderSide::Sell);
        assert!(intent.stop_price() > intent.entry_price());
        assert!(intent.take_profit_price() < intent.entry_price());
    }

    #[test]
    fn test_missing_outputs_count_as_hold() {
        let mut engine = default_engine();
        let snap = snapshot_at(Utc::now(), dec!(5000), Regime::Undefined);

        let outcome = engine.decide(&snap, vec![]);
        assert_eq!(outcome.skip_reason(), Some(&SkipReason::Disagreement));
        assert_eq!(outcome.combined_score, 0.0);
    }

    #[test]
    fn test_below_threshold() {
        let snap = snapshot_at(Utc::now(), dec!(5000), Regime::Undefined);
        let config = ConsensusConfig {
            require_agreement: false,
            ..ConsensusConfig::default()
        };
        let mut open = engine_with(
            config,
            vec![
                fixed("stat", ScorerRole::Statistical, Signal::Hold, 0.0, 0.6),
                fixed("heur", ScorerRole::Heuristic, Signal::Hold, 0.0, 0.4),
            ],
        );
        // 0.6*0.4 + 0.4*0.1 = 0.28
        let outcome = open.decide(
            &snap,
            vec![out("stat", Signal::Buy, 0.4), out("heur", Signal::Buy, 0.1)],
        );
        assert_eq!(outcome.skip_reason(), Some(&SkipReason::BelowThreshold));
    }

    #[test]
    fn test_confidence_floor_under_agreement() {
        let mut engine = default_engine();
        let snap = snapshot_at(Utc::now(), dec!(5000), Regime::Undefined);

        let outcome = engine.decide(
            &snap,
            vec![out("stat", Signal::Buy, 0.95), out("heur", Signal::Buy, 0.5)],
        );
        match outcome.skip_reason() {
            Some(SkipReason::ConfidenceTooLow { source_id, .. }) => assert_eq!(source_id, "heur"),
            other => panic!("Expected ConfidenceTooLow, got {:?}", other),
        }
    }

    #[test]
    fn test_regime_gate_blocks_counter_trend() {
        let mut engine = default_engine();
        let snap = snapshot_at(Utc::now(), dec!(5000), Regime::TrendingUp);

        let outcome = engine.decide(
            &snap,
            vec![out("stat", Signal::Sell, 0.9), out("heur", Signal::Sell, 0.9)],
        );
        assert!(matches!(
            outcome.skip_reason(),
            Some(SkipReason::RegimeBlocked {
                regime: Regime::TrendingUp,
                block: GateBlock::DirectionBlocked
            })
        ));
        assert_eq!(engine.stats().regime_blocked, 1);
    }

    #[test]
    fn test_stale_snapshots_yield_warning() {
        let mut engine = default_engine();
        let start = Utc::now();
        let strong = || vec![out("stat", Signal::Buy, 0.9), out("heur", Signal::Buy, 0.9)];

        let mut last = None;
        for i in 0..6 {
            let snap = snapshot_at(start + ChronoDuration::seconds(i), dec!(5000), Regime::Undefined);
            last = Some(engine.decide(&snap, strong()));
            if i < 4 {
                assert!(last.as_ref().unwrap().intent().is_some());
            }
        }

        let outcome = last.unwrap();
        assert_eq!(outcome.skip_reason(), Some(&SkipReason::StaleFeatures));
        assert!(outcome.warning.is_some());
        assert_eq!(engine.stats().stale, 2);
    }

    #[test]
    fn test_non_monotonic_snapshot_skipped() {
        let mut engine = default_engine();
        let at = Utc::now();
        let strong = || vec![out("stat", Signal::Buy, 0.9), out("heur", Signal::Buy, 0.9)];

        assert!(engine.decide(&snapshot_at(at, dec!(5000), Regime::Undefined), strong()).intent().is_some());
        let outcome = engine.decide(&snapshot_at(at, dec!(5001), Regime::Undefined), strong());
        assert_eq!(outcome.skip_reason(), Some(&SkipReason::NonMonotonicSnapshot));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let risk = Arc::new(RegimeTargets::new(TickSize::default()));
        let result = ConsensusEngine::new(
            ConsensusConfig::default(),
            vec![
                fixed("stat", ScorerRole::Statistical, Signal::Hold, 0.0, 0.6),
                fixed("heur", ScorerRole::Heuristic, Signal::Hold, 0.0, 0.6),
            ],
            risk,
        );
        assert!(matches!(result, Err(EngineError::InvalidWeights(_))));
    }

    #[test]
    fn test_agreement_requires_both_roles() {
        let risk = Arc::new(RegimeTargets::new(TickSize::default()));
        let result = ConsensusEngine::new(
            ConsensusConfig::default(),
            vec![fixed("stat", ScorerRole::Statistical, Signal::Hold, 0.0, 1.0)],
            risk,
        );
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_duplicate_scorer_rejected() {
        let risk = Arc::new(RegimeTargets::new(TickSize::default()));
        let result = ConsensusEngine::new(
            ConsensusConfig::default(),
            vec![
                fixed("stat", ScorerRole::Statistical, Signal::Hold, 0.0, 0.5),
                fixed("stat", ScorerRole::Heuristic, Signal::Hold, 0.0, 0.5),
            ],
            risk,
        );
        assert!(matches!(result, Err(EngineError::DuplicateScorer(_))));
    }

    #[tokio::test]
    async fn test_evaluate_runs_scorers() {
        let mut engine = engine_with(
            ConsensusConfig::default(),
            vec![
                fixed("stat", ScorerRole::Statistical, Signal::Buy, 0.8, 0.6),
                fixed("heur", ScorerRole::Heuristic, Signal::Buy, 0.7, 0.4),
            ],
        );
        let snap = snapshot_at(Utc::now(), dec!(5000.5), Regime::Undefined);

        let outcome = engine.evaluate(&snap).await;

        assert_eq!(outcome.outputs.len(), 2);
        assert_eq!(outcome.intent().map(|i| i.direction()), Some(OrderSide::Buy));
        assert_eq!(engine.stats().emitted, 1);
    }
}
