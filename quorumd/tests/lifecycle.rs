//! Integration tests for the order lifecycle and reconciliation.
//!
//! Drives the consensus engine, bracket controller and position reconciler
//! against `StubGateway` with an explicit clock, so minimum hold, cooldown
//! and settle windows are exercised without sleeping.
//!
//! Run with: `cargo test -p quorumd --test lifecycle`

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use quorum_domain::{
    BracketLeg, BracketStatus, Confidence, FeatureSnapshot, Instrument, LockRelease, OrderSide, OrderStatus,
    Price, Quantity, Regime, ScorerOutput, Side, Signal, TickSize, TradingIntent,
};
use quorum_engine::{
    AgentPanel, ConsensusConfig, ConsensusEngine, Decision, LinearScorer, RegimeTargets,
    SkipReason, WeightedScorer,
};
use quorum_exec::{
    BracketController, BrokerPosition, CoreConfig, EventEffect, RejectReason, RetryPolicy,
    StubGateway, TradingCore,
};
use quorumd::{
    ConsistencyViolation, DaemonEvent, Environment, EventBus, EventReceiver, PositionReconciler,
    ReconcileError, ReconcileOutcome, ReconcileSettings, StatusBoard, StatusWriter,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    gateway: Arc<StubGateway>,
    controller: Arc<BracketController>,
    reconciler: PositionReconciler,
    status: Arc<StatusBoard>,
    events: EventReceiver,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    fn with_config(config: CoreConfig) -> Self {
        let core = TradingCore::new(config);
        let gateway = Arc::new(StubGateway::new());
        let instrument = Instrument::new("WDOFUT").unwrap();
        let controller = Arc::new(
            BracketController::new(
                core.clone(),
                gateway.clone(),
                instrument.clone(),
                Quantity::new(1).unwrap(),
            )
            .with_retry_policy(RetryPolicy::none()),
        );
        let event_bus = Arc::new(EventBus::new(64));
        let events = event_bus.subscribe();
        let status = Arc::new(StatusBoard::new(
            core,
            Environment::Test,
            instrument,
            StatusWriter::disabled(),
        ));
        let reconciler = PositionReconciler::new(
            controller.clone(),
            event_bus,
            status.clone(),
            ReconcileSettings::default(),
        );

        Self {
            gateway,
            controller,
            reconciler,
            status,
            events,
        }
    }

    fn core(&self) -> &TradingCore {
        self.controller.core()
    }

    fn drain_events(&mut self) -> Vec<DaemonEvent> {
        let mut drained = Vec::new();
        while let Some(Ok(event)) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

fn price(value: Decimal) -> Price {
    Price::new(value).unwrap()
}

fn secs(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

fn buy_intent(at: DateTime<Utc>) -> TradingIntent {
    TradingIntent::new(
        OrderSide::Buy,
        Confidence::new(0.76).unwrap(),
        price(dec!(5000)),
        price(dec!(4995)),
        price(dec!(5010)),
        at,
    )
    .unwrap()
}

fn engine() -> ConsensusEngine {
    let scorers = vec![
        WeightedScorer::new(Arc::new(LinearScorer::new("a", vec![1.0], 0.0)), 0.6),
        WeightedScorer::new(Arc::new(AgentPanel::standard("b")), 0.4),
    ];
    ConsensusEngine::new(
        ConsensusConfig::default(),
        scorers,
        Arc::new(RegimeTargets::new(TickSize::default())),
    )
    .unwrap()
}

fn snapshot(at: DateTime<Utc>) -> FeatureSnapshot {
    FeatureSnapshot {
        timestamp: at,
        features: vec![0.0; 4],
        best_bid: price(dec!(4999.5)),
        best_ask: price(dec!(5000)),
        last_price: price(dec!(5000)),
        regime: Regime::Undefined,
    }
}

fn output(source: &str, signal: Signal, confidence: f64) -> ScorerOutput {
    ScorerOutput::new(source, signal, Confidence::new(confidence).unwrap())
}

// =============================================================================
// Consensus scenarios
// =============================================================================

#[tokio::test]
async fn test_agreeing_scorers_emit_buy_and_open_bracket() {
    let mut engine = engine();
    let harness = Harness::new();
    let now = Utc::now();

    let outcome = engine.decide(
        &snapshot(now),
        vec![output("a", Signal::Buy, 0.8), output("b", Signal::Buy, 0.7)],
    );

    assert!((outcome.combined_score - 0.76).abs() < 1e-9);
    let intent = match outcome.decision {
        Decision::Emit(intent) => intent,
        other => panic!("Expected Emit, got {:?}", other),
    };
    assert_eq!(intent.direction(), OrderSide::Buy);
    assert!(intent.stop_price() < intent.entry_price());
    assert!(intent.entry_price() < intent.take_profit_price());

    let group = harness.controller.submit_at(&intent, now).await.unwrap();
    assert_eq!(group.status(), BracketStatus::Pending);
    assert_eq!(harness.gateway.working_order_count(), 3);
}

#[tokio::test]
async fn test_disagreeing_scorers_emit_nothing() {
    let mut engine = engine();

    let outcome = engine.decide(
        &snapshot(Utc::now()),
        vec![output("a", Signal::Buy, 0.9), output("b", Signal::Sell, 0.9)],
    );

    assert_eq!(outcome.decision, Decision::Skip(SkipReason::Disagreement));
    assert_eq!(engine.stats().disagreement, 1);
}

// =============================================================================
// Lifecycle scenarios
// =============================================================================

#[tokio::test]
async fn test_stop_fill_cancels_take_profit_once_and_defers_release() {
    let mut h = Harness::new();
    let t0 = Utc::now();

    let group = h.controller.submit_at(&buy_intent(t0), t0).await.unwrap();
    let entry = h
        .gateway
        .fill_order_at(group.entry_order_id(), price(dec!(5000)), t0)
        .unwrap();
    h.controller.on_order_event_at(&entry, t0 + secs(1)).await;

    let stop = h
        .gateway
        .fill_order_at(group.stop_order_id(), price(dec!(4995)), t0 + secs(10))
        .unwrap();
    let effect = h.controller.on_order_event_at(&stop, t0 + secs(10)).await;

    match effect {
        EventEffect::ExitFilled { cancel, release, .. } => {
            assert_eq!(cancel, group.take_profit_order_id());
            assert_eq!(release, LockRelease::Deferred);
        }
        other => panic!("Expected ExitFilled, got {:?}", other),
    }
    assert_eq!(h.gateway.cancel_count(group.take_profit_order_id()), 1);
    assert_eq!(
        h.gateway.order_status(group.take_profit_order_id()),
        Some(OrderStatus::Cancelled)
    );

    let snap = h.core().snapshot().await;
    assert!(snap.position.is_flat());
    assert!(snap.lock_held);
    assert!(snap.release_pending);

    // Repeated callback changes nothing
    let again = h.controller.on_order_event_at(&stop, t0 + secs(11)).await;
    assert_eq!(again, EventEffect::Duplicate);
    assert_eq!(h.gateway.cancel_count(group.take_profit_order_id()), 1);

    // Minimum hold not yet over
    assert!(!h.core().release_deferred_at(t0 + secs(20)).await);

    let report = h.reconciler.reconcile_at(t0 + secs(31)).await.unwrap();
    assert!(report.lock_released);
    assert!(report.violations.is_empty());
    assert!(!h.core().snapshot().await.lock_held);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, DaemonEvent::LockReleased { .. })));
}

#[tokio::test]
async fn test_phantom_position_cleared_within_one_tick() {
    let mut h = Harness::new();
    let t0 = Utc::now();

    let group = h.controller.submit_at(&buy_intent(t0), t0).await.unwrap();
    let entry = h
        .gateway
        .fill_order_at(group.entry_order_id(), price(dec!(5000)), t0)
        .unwrap();
    h.controller.on_order_event_at(&entry, t0).await;

    // Broker flattens the position behind our back, exits die silently
    h.gateway.set_position(BrokerPosition::Flat);
    h.gateway
        .set_order_status_silently(group.stop_order_id(), OrderStatus::Cancelled);
    h.gateway
        .set_order_status_silently(group.take_profit_order_id(), OrderStatus::Cancelled);

    // Inside the settle window nothing is touched
    let early = h.reconciler.reconcile_at(t0 + secs(10)).await.unwrap();
    assert!(early.is_consistent());
    assert!(h.core().snapshot().await.position.is_open());

    let report = h.reconciler.reconcile_at(t0 + secs(31)).await.unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::Corrected);
    assert_eq!(
        report.violations,
        vec![ConsistencyViolation::PhantomPosition {
            side: Side::Long,
            quantity: 1
        }]
    );
    assert!(report.lock_released);

    let snap = h.core().snapshot().await;
    assert!(snap.position.is_flat());
    assert!(snap.active_group().is_none());
    assert!(!snap.lock_held);

    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        DaemonEvent::ConsistencyViolation(ConsistencyViolation::PhantomPosition { .. })
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, DaemonEvent::LockReleased { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_submissions_one_wins() {
    let h = Harness::new();
    h.gateway.set_latency(Duration::from_millis(50));
    let now = Utc::now();

    let first = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.submit_at(&buy_intent(now), now).await })
    };
    let second = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.submit_at(&buy_intent(now), now).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(RejectReason::LockHeld))));
    assert_eq!(h.gateway.submit_count(), 1);
}

#[tokio::test]
async fn test_at_most_one_active_group_over_many_intents() {
    let h = Harness::new();
    let t0 = Utc::now();

    let mut accepted = Vec::new();
    for i in 0..20 {
        let at = t0 + secs(i);
        if let Ok(group) = h.controller.submit_at(&buy_intent(at), at).await {
            accepted.push(group);
        }
        let snap = h.core().snapshot().await;
        assert!(snap.lock_consistent());
    }
    assert_eq!(accepted.len(), 1);
    let group = &accepted[0];

    // Full cycle: entry then take-profit, past the minimum hold
    let entry = h
        .gateway
        .fill_order_at(group.entry_order_id(), price(dec!(5000)), t0 + secs(20))
        .unwrap();
    h.controller.on_order_event_at(&entry, t0 + secs(20)).await;
    let take = h
        .gateway
        .fill_order_at(group.take_profit_order_id(), price(dec!(5010)), t0 + secs(40))
        .unwrap();
    let effect = h.controller.on_order_event_at(&take, t0 + secs(40)).await;
    assert!(matches!(
        effect,
        EventEffect::ExitFilled {
            release: LockRelease::Released,
            ..
        }
    ));

    // Cooldown runs from the close
    let early = h
        .controller
        .submit_at(&buy_intent(t0 + secs(60)), t0 + secs(60))
        .await;
    assert_eq!(early.unwrap_err(), RejectReason::CooldownActive);

    let next = h
        .controller
        .submit_at(&buy_intent(t0 + secs(101)), t0 + secs(101))
        .await;
    assert!(next.is_ok());
    assert_eq!(h.gateway.submit_count(), 2);
}

// =============================================================================
// Reconciliation convergence
// =============================================================================

#[tokio::test]
async fn test_untracked_position_adopted_then_released() {
    let h = Harness::new();
    let t0 = Utc::now();
    h.gateway.set_position(BrokerPosition::Open {
        side: Side::Short,
        quantity: Quantity::new(2).unwrap(),
        avg_price: Some(price(dec!(5002))),
    });

    let report = h.reconciler.reconcile_at(t0).await.unwrap();
    assert_eq!(
        report.violations,
        vec![
            ConsistencyViolation::UntrackedPosition {
                side: Side::Short,
                quantity: 2
            },
            ConsistencyViolation::UnprotectedPosition {
                group_id: None,
                missing: vec![BracketLeg::Stop, BracketLeg::TakeProfit],
            },
        ]
    );
    let snap = h.core().snapshot().await;
    assert_eq!(snap.position.side(), Some(Side::Short));
    assert!(snap.lock_held);

    // Naked position gets a stop and take-profit around its average price
    assert!(report.protection_placed);
    assert_eq!(h.gateway.protection_count(), 1);
    assert_eq!(h.gateway.working_order_count(), 2);
    let adopted = snap.active_group().cloned().unwrap();
    assert_eq!(adopted.status(), BracketStatus::EntryFilled);
    let exits = adopted.exit_prices().unwrap();
    assert_eq!(exits.stop, price(dec!(5007)));
    assert_eq!(exits.take_profit, price(dec!(4992)));

    let protected = h.reconciler.reconcile_at(t0 + secs(5)).await.unwrap();
    assert!(protected.is_consistent());
    assert_eq!(h.gateway.protection_count(), 1);

    // No new exposure while the adopted position lives
    let refused = h.controller.submit_at(&buy_intent(t0), t0 + secs(1)).await;
    assert_eq!(refused.unwrap_err(), RejectReason::LockHeld);

    // Broker goes flat; adopted position clears once settled
    h.gateway.set_position(BrokerPosition::Flat);
    assert!(h
        .reconciler
        .reconcile_at(t0 + secs(10))
        .await
        .unwrap()
        .is_consistent());
    let cleared = h.reconciler.reconcile_at(t0 + secs(31)).await.unwrap();
    assert!(cleared.lock_released);
    // Protective pair left behind by the vanished position is cancelled
    assert_eq!(cleared.cancelled_orders, 2);

    let converged = h.reconciler.reconcile_at(t0 + secs(36)).await.unwrap();
    assert!(converged.is_consistent());
    let snap = h.core().snapshot().await;
    assert!(snap.position.is_flat());
    assert!(!snap.lock_held);
}

#[tokio::test]
async fn test_lost_bracket_closed_and_trading_resumes() {
    let mut h = Harness::new();
    let t0 = Utc::now();
    let group = h.controller.submit_at(&buy_intent(t0), t0).await.unwrap();

    // Broker purges its session: flat, nothing working, ids unknown
    h.gateway.forget_orders();

    let early = h.reconciler.reconcile_at(t0 + secs(10)).await.unwrap();
    assert!(early.is_consistent());
    assert!(h.core().snapshot().await.lock_held);

    let report = h.reconciler.reconcile_at(t0 + secs(31)).await.unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::Corrected);
    assert_eq!(
        report.violations,
        vec![ConsistencyViolation::MissedCallback {
            order_id: group.entry_order_id().to_string(),
            status: OrderStatus::Cancelled,
        }]
    );
    assert!(report.lock_released);

    let snap = h.core().snapshot().await;
    assert!(snap.active_group().is_none());
    assert!(!snap.lock_held);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, DaemonEvent::LockReleased { .. })));

    let settled = h.reconciler.reconcile_at(t0 + secs(36)).await.unwrap();
    assert!(settled.is_consistent());

    // Admission reopens once the cooldown from the close has run
    let next = h
        .controller
        .submit_at(&buy_intent(t0 + secs(92)), t0 + secs(92))
        .await;
    assert!(next.is_ok());
}

#[tokio::test]
async fn test_rejected_stop_replaced_by_reconciliation() {
    let h = Harness::new();
    let t0 = Utc::now();
    let group = h.controller.submit_at(&buy_intent(t0), t0).await.unwrap();
    let entry = h
        .gateway
        .fill_order_at(group.entry_order_id(), price(dec!(5000)), t0)
        .unwrap();
    h.controller.on_order_event_at(&entry, t0).await;

    let rejected = h.gateway.reject_order(group.stop_order_id()).unwrap();
    let effect = h.controller.on_order_event_at(&rejected, t0 + secs(1)).await;
    assert!(matches!(
        effect,
        EventEffect::ProtectionLost {
            leg: BracketLeg::Stop,
            ..
        }
    ));

    let report = h.reconciler.reconcile_at(t0 + secs(300)).await.unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::Corrected);
    assert_eq!(
        report.violations,
        vec![ConsistencyViolation::UnprotectedPosition {
            group_id: Some(group.group_id()),
            missing: vec![BracketLeg::Stop],
        }]
    );
    assert!(report.protection_placed);

    // Surviving take-profit is swapped for a fresh pair at the bracket prices
    assert_eq!(h.gateway.cancel_count(group.take_profit_order_id()), 1);
    assert_eq!(h.gateway.protection_count(), 1);
    assert_eq!(h.gateway.working_order_count(), 2);

    let snap = h.core().snapshot().await;
    let protected = snap.active_group().cloned().unwrap();
    assert_eq!(protected.group_id(), group.group_id());
    assert_ne!(protected.stop_order_id(), group.stop_order_id());
    assert!(snap.lock_held);

    let again = h.reconciler.reconcile_at(t0 + secs(305)).await.unwrap();
    assert!(again.is_consistent());

    // The new stop closes the position like the original would have
    let stop = h
        .gateway
        .fill_order_at(protected.stop_order_id(), price(dec!(4995)), t0 + secs(400))
        .unwrap();
    let effect = h.controller.on_order_event_at(&stop, t0 + secs(400)).await;
    match effect {
        EventEffect::ExitFilled { cancel, release, .. } => {
            assert_eq!(cancel, protected.take_profit_order_id());
            assert_eq!(release, LockRelease::Released);
        }
        other => panic!("Expected ExitFilled, got {:?}", other),
    }
    assert_eq!(h.gateway.working_order_count(), 0);
}

#[tokio::test]
async fn test_unfilled_entry_cancelled_after_ttl() {
    let mut h = Harness::new();
    let t0 = Utc::now();
    let group = h.controller.submit_at(&buy_intent(t0), t0).await.unwrap();

    let waiting = h.reconciler.reconcile_at(t0 + secs(120)).await.unwrap();
    assert!(waiting.is_consistent());
    assert_eq!(h.gateway.working_order_count(), 3);

    let report = h.reconciler.reconcile_at(t0 + secs(300)).await.unwrap();
    assert_eq!(
        report.violations,
        vec![ConsistencyViolation::EntryExpired {
            group_id: group.group_id(),
            age_secs: 300,
        }]
    );
    assert!(report.lock_released);
    assert_eq!(h.gateway.cancel_count(group.entry_order_id()), 1);
    assert_eq!(h.gateway.working_order_count(), 0);

    let snap = h.core().snapshot().await;
    assert!(snap.active_group().is_none());
    assert!(!snap.lock_held);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, DaemonEvent::LockReleased { .. })));

    let next = h
        .controller
        .submit_at(&buy_intent(t0 + secs(361)), t0 + secs(361))
        .await;
    assert!(next.is_ok());
}

#[tokio::test]
async fn test_orphan_orders_cancelled() {
    let h = Harness::new();
    let quantity = Quantity::new(1).unwrap();
    h.gateway.place_untracked_order("X-1", OrderSide::Sell, quantity);
    h.gateway.place_untracked_order("X-2", OrderSide::Buy, quantity);

    let report = h.reconciler.reconcile_at(Utc::now()).await.unwrap();

    assert_eq!(
        report.violations,
        vec![ConsistencyViolation::OrphanOrders {
            count: 2,
            group_id: None
        }]
    );
    assert_eq!(report.cancelled_orders, 2);
    assert_eq!(h.gateway.cancel_all_count(), 1);
    assert_eq!(h.gateway.working_order_count(), 0);
    // Fence taken for the cancel is dropped again
    assert!(!h.core().snapshot().await.lock_held);

    let again = h.reconciler.reconcile_at(Utc::now()).await.unwrap();
    assert!(again.is_consistent());
}

#[tokio::test]
async fn test_stuck_lock_released_after_grace() {
    let h = Harness::new();
    let t0 = Utc::now();
    h.core().with_state(|s| s.reassert_lock_at(t0)).await;

    let within = h.reconciler.reconcile_at(t0 + secs(45)).await.unwrap();
    assert!(within.is_consistent());
    assert!(h.core().snapshot().await.lock_held);

    let report = h.reconciler.reconcile_at(t0 + secs(61)).await.unwrap();
    assert!(matches!(
        report.violations.as_slice(),
        [ConsistencyViolation::StuckLock { held_secs: 61 }]
    ));
    assert!(report.lock_released);
    assert!(!h.core().snapshot().await.lock_held);
}

#[tokio::test]
async fn test_missed_fills_applied_by_reconciliation() {
    let h = Harness::new();
    let t0 = Utc::now();
    let group = h.controller.submit_at(&buy_intent(t0), t0).await.unwrap();

    // Entry fills but the callback never arrives
    h.gateway
        .fill_order_at(group.entry_order_id(), price(dec!(5000)), t0)
        .unwrap();

    let report = h.reconciler.reconcile_at(t0 + secs(5)).await.unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::Corrected);
    assert_eq!(
        report.violations,
        vec![ConsistencyViolation::MissedCallback {
            order_id: group.entry_order_id().to_string(),
            status: OrderStatus::Filled,
        }]
    );
    let snap = h.core().snapshot().await;
    assert!(snap.position.is_open());
    assert_eq!(snap.position.entry_price(), Some(price(dec!(5000))));
    assert_eq!(snap.active_group().map(|g| g.status()), Some(BracketStatus::EntryFilled));

    // Stop fills silently too
    h.gateway
        .fill_order_at(group.stop_order_id(), price(dec!(4995)), t0 + secs(40))
        .unwrap();

    let report = h.reconciler.reconcile_at(t0 + secs(41)).await.unwrap();
    assert_eq!(
        report.violations,
        vec![ConsistencyViolation::MissedCallback {
            order_id: group.stop_order_id().to_string(),
            status: OrderStatus::Filled,
        }]
    );
    assert_eq!(h.gateway.cancel_count(group.take_profit_order_id()), 1);
    assert_eq!(h.gateway.working_order_count(), 0);

    let snap = h.core().snapshot().await;
    assert!(snap.position.is_flat());
    assert!(snap.active_group().is_none());
    assert!(!snap.lock_held);
}

#[tokio::test]
async fn test_gateway_outage_recovered_by_reconciliation() {
    let h = Harness::with_config(CoreConfig {
        gateway_failure_limit: 3,
        ..CoreConfig::default()
    });
    let t0 = Utc::now();
    h.gateway.fail_times(3);

    for i in 0..3 {
        let at = t0 + secs(i);
        let result = h.controller.submit_at(&buy_intent(at), at).await;
        assert_eq!(result.unwrap_err(), RejectReason::GatewayUnavailable);
        // Failed submission never leaves the lock behind
        assert!(!h.core().snapshot().await.lock_held);
    }
    assert!(h.core().snapshot().await.gateway.unavailable);

    // Refused without touching the gateway
    let refused = h.controller.submit_at(&buy_intent(t0), t0 + secs(4)).await;
    assert_eq!(refused.unwrap_err(), RejectReason::GatewayUnavailable);
    assert_eq!(h.gateway.submit_count(), 3);

    let report = h.reconciler.reconcile_at(t0 + secs(5)).await.unwrap();
    assert!(report.is_consistent());
    assert!(!h.core().snapshot().await.gateway.unavailable);

    assert!(h
        .controller
        .submit_at(&buy_intent(t0), t0 + secs(6))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_failed_query_reported_on_status() {
    let h = Harness::new();
    h.gateway.fail_times(1);

    let result = h.reconciler.reconcile_at(Utc::now()).await;

    assert!(matches!(result, Err(ReconcileError::Gateway(_))));
    let last = h.status.last_reconcile().await.unwrap();
    assert_eq!(last.outcome, ReconcileOutcome::Failed);
    assert!(last.error.is_some());
    assert_eq!(h.core().snapshot().await.gateway.consecutive_failures, 1);
}
