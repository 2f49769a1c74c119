//! Position Reconciler: safety net for state drift.
//!
//! Runs on a fixed interval, independent of broker callbacks. Each tick
//! re-queries the gateway (never trusting the previous tick) and corrects
//! the in-memory trading state towards the broker's view:
//!
//! - missed order callbacks are replayed through the bracket controller
//! - phantom positions (local open, broker flat) are cleared
//! - brackets the broker no longer knows are closed
//! - entries left unfilled past their time-to-live are cancelled
//! - orphan orders (broker working orders with nothing tracked) are cancelled
//! - untracked broker positions are adopted and the lock re-asserted
//! - open positions missing a stop or take-profit are re-protected
//! - stuck locks are force-released, deferred releases completed
//!
//! ```text
//! tick: query gateway (no mutex) → replay missed callbacks
//!       → plan + apply (mutex)
//!       → cancel orphans, expire entry, re-protect (no mutex) → status
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use quorum_domain::{
    BracketGroup, BracketLeg, BracketStatus, ExitPrices, GroupId, LockRelease, OrderStatus,
    PositionState, Price, Side, TickSize,
};
use quorum_engine::{correct_prices, TickDistances};
use quorum_exec::{
    with_retry, BracketController, BrokerPosition, EventEffect, ExecError, OpenOrder, OrderEvent,
    Reprotection, TradingState,
};

use crate::event_bus::{DaemonEvent, EventBus};
use crate::status::StatusBoard;

// =============================================================================
// Configuration
// =============================================================================

/// Reconciler timing and recovery rules.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Time between ticks
    pub interval: Duration,
    /// Grace beyond `min_hold` before a lock without exposure counts as stuck
    pub lock_grace: chrono::Duration,
    /// How long local state may contradict the broker before it is corrected
    pub settle_window: chrono::Duration,
    /// Unfilled entries older than this are cancelled (None leaves them working)
    pub entry_ttl: Option<chrono::Duration>,
    /// Exit placement for positions without known bracket prices
    pub protection: ProtectionSettings,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            lock_grace: chrono::Duration::seconds(30),
            settle_window: chrono::Duration::seconds(30),
            entry_ttl: Some(chrono::Duration::seconds(300)),
            protection: ProtectionSettings::default(),
        }
    }
}

/// Stop and take-profit distances from the position's average price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionSettings {
    pub tick_size: TickSize,
    /// Stop and take-profit distances in ticks
    pub distances: TickDistances,
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        Self {
            tick_size: TickSize::default(),
            distances: TickDistances::new(10, 20),
        }
    }
}

impl ProtectionSettings {
    /// Exit prices around `reference` for a position on `side`.
    pub fn prices(&self, side: Side, reference: Price) -> Option<ExitPrices> {
        let direction = side.entry_order_side();
        let entry = reference.as_decimal();
        let stop_distance = self.tick_size.ticks(self.distances.stop_ticks);
        let take_distance = self.tick_size.ticks(self.distances.take_ticks);
        let (stop, take_profit) = match side {
            Side::Long => (entry - stop_distance, entry + take_distance),
            Side::Short => (entry + stop_distance, entry - take_distance),
        };

        let corrected = correct_prices(direction, entry, stop, take_profit, self.tick_size);
        Some(ExitPrices {
            stop: Price::new(corrected.stop).ok()?,
            take_profit: Price::new(corrected.take_profit).ok()?,
        })
    }
}

// =============================================================================
// Violations and reports
// =============================================================================

/// A detected disagreement between local state and the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyViolation {
    /// Local position open, broker flat with no working orders
    PhantomPosition { side: Side, quantity: u32 },
    /// Broker has working orders nothing local accounts for
    OrphanOrders {
        count: usize,
        group_id: Option<GroupId>,
    },
    /// Lock held without exposure beyond `min_hold + grace`
    StuckLock { held_secs: i64 },
    /// Broker position with no local position or group
    UntrackedPosition { side: Side, quantity: u32 },
    /// Both sides open but disagreeing on side or size
    PositionMismatch {
        local_side: Option<Side>,
        local_quantity: u32,
        broker_side: Side,
        broker_quantity: u32,
    },
    /// Position or active group without the lock
    ExposureWithoutLock,
    /// Order reached a terminal state without a callback
    MissedCallback { order_id: String, status: OrderStatus },
    /// Broker flat with none of the tracked bracket's orders working
    LostBracket { group_id: GroupId },
    /// Entry still unfilled after its time-to-live
    EntryExpired { group_id: GroupId, age_secs: i64 },
    /// Open position without a working stop or take-profit
    UnprotectedPosition {
        group_id: Option<GroupId>,
        missing: Vec<BracketLeg>,
    },
}

/// How a tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Consistent,
    Corrected,
    /// State moved underneath the tick (new submission); retried next tick
    Skipped,
    /// Gateway could not be queried
    Failed,
}

/// Result of one reconciliation tick.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub at: DateTime<Utc>,
    pub outcome: ReconcileOutcome,
    pub broker_position: Option<BrokerPosition>,
    pub open_orders: usize,
    pub violations: Vec<ConsistencyViolation>,
    pub cancelled_orders: usize,
    pub lock_released: bool,
    /// A protective stop / take-profit pair was placed this tick
    pub protection_placed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconcileReport {
    fn new(at: DateTime<Utc>, outcome: ReconcileOutcome) -> Self {
        Self {
            at,
            outcome,
            broker_position: None,
            open_orders: 0,
            violations: Vec::new(),
            cancelled_orders: 0,
            lock_released: false,
            protection_placed: false,
            error: None,
        }
    }

    fn failed(at: DateTime<Utc>, error: &ExecError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(at, ReconcileOutcome::Failed)
        }
    }

    fn observed(at: DateTime<Utc>, outcome: ReconcileOutcome, view: &BrokerView) -> Self {
        Self {
            broker_position: Some(view.position),
            open_orders: view.open_orders.len(),
            ..Self::new(at, outcome)
        }
    }

    /// No drift found this tick
    pub fn is_consistent(&self) -> bool {
        self.outcome == ReconcileOutcome::Consistent
    }
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Gateway query failed after retries
    #[error("Gateway error: {0}")]
    Gateway(#[from] ExecError),
}

// =============================================================================
// Planning (pure)
// =============================================================================

/// Broker state as queried this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerView {
    pub position: BrokerPosition,
    pub open_orders: Vec<OpenOrder>,
}

impl BrokerView {
    /// Whether the order is among the broker's working orders
    pub fn is_working(&self, order_id: &str) -> bool {
        self.open_orders.iter().any(|o| o.order_id == order_id)
    }
}

/// One corrective action on the trading state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correction {
    /// Clear position, close group, release lock
    ClearPhantom,
    /// Close a bracket the broker lost, release lock
    CloseGroup,
    /// Cancel every working order for the instrument
    CancelOrphans,
    /// Replace the local position with the broker's
    Adopt(PositionState),
    /// Cancel an unfilled entry; the group closes once the cancel is confirmed
    ExpireEntry(BracketGroup),
    /// Place a fresh stop / take-profit pair for the open position
    Reprotect(Reprotection),
    ForceReleaseLock,
    CompleteDeferredRelease,
    ReassertLock,
}

/// Corrections for one tick with the violations that caused them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub corrections: Vec<Correction>,
    pub violations: Vec<ConsistencyViolation>,
}

impl Plan {
    /// Nothing to correct.
    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty() && self.violations.is_empty()
    }

    fn has(&self, f: impl Fn(&Correction) -> bool) -> bool {
        self.corrections.iter().any(f)
    }
}

/// Decide corrections from local state and the broker view.
///
/// Pure: reads the state, never mutates it.
pub fn plan(
    state: &TradingState,
    broker: &BrokerView,
    settings: &ReconcileSettings,
    now: DateTime<Utc>,
) -> Plan {
    let mut plan = Plan::default();

    // Broker view is in motion while a bracket is being placed
    if state.submission_in_flight() {
        return plan;
    }

    let position = state.position();
    let group = state.active_group();
    let group_id = group.map(|g| g.group_id());
    let open_orders = broker.open_orders.len();
    let settled = |since: Option<DateTime<Utc>>| {
        since
            .map(|at| now - at >= settings.settle_window)
            .unwrap_or(true)
    };

    match broker.position {
        BrokerPosition::Flat => {
            if let Some(side) = position.side() {
                if settled(position.opened_at()) {
                    plan.violations.push(ConsistencyViolation::PhantomPosition {
                        side,
                        quantity: position.quantity().contracts(),
                    });
                    if open_orders > 0 {
                        plan.violations.push(ConsistencyViolation::OrphanOrders {
                            count: open_orders,
                            group_id,
                        });
                        plan.corrections.push(Correction::CancelOrphans);
                    }
                    plan.corrections.push(Correction::ClearPhantom);
                    return plan;
                }
            } else if let Some(group) = group {
                let working = group.order_ids().iter().any(|id| broker.is_working(id));
                if !working && settled(Some(group.created_at())) {
                    plan.violations.push(ConsistencyViolation::LostBracket {
                        group_id: group.group_id(),
                    });
                    if open_orders > 0 {
                        plan.violations.push(ConsistencyViolation::OrphanOrders {
                            count: open_orders,
                            group_id,
                        });
                        plan.corrections.push(Correction::CancelOrphans);
                    }
                    plan.corrections.push(Correction::CloseGroup);
                    return plan;
                }

                let age = now - group.created_at();
                let expired = settings.entry_ttl.is_some_and(|ttl| age >= ttl);
                if expired
                    && group.status() == BracketStatus::Pending
                    && broker.is_working(group.entry_order_id())
                {
                    plan.violations.push(ConsistencyViolation::EntryExpired {
                        group_id: group.group_id(),
                        age_secs: age.num_seconds(),
                    });
                    plan.corrections.push(Correction::ExpireEntry(group.clone()));
                }
            } else if open_orders > 0 {
                plan.violations.push(ConsistencyViolation::OrphanOrders {
                    count: open_orders,
                    group_id: None,
                });
                plan.corrections.push(Correction::CancelOrphans);
            }
        }
        BrokerPosition::Open {
            side,
            quantity,
            avg_price,
        } => {
            if position.is_flat() && group_id.is_none() {
                if let Ok(adopted) = PositionState::open(side, quantity, avg_price, now) {
                    plan.violations.push(ConsistencyViolation::UntrackedPosition {
                        side,
                        quantity: quantity.contracts(),
                    });
                    check_protection(&mut plan, &adopted, None, broker, settings, now);
                    plan.corrections.insert(0, Correction::Adopt(adopted));
                }
            } else if position.is_open()
                && (position.side() != Some(side) || position.quantity() != quantity)
            {
                let opened_at = position.opened_at().unwrap_or(now);
                if let Ok(adopted) = PositionState::open(side, quantity, avg_price, opened_at) {
                    plan.violations.push(ConsistencyViolation::PositionMismatch {
                        local_side: position.side(),
                        local_quantity: position.quantity().contracts(),
                        broker_side: side,
                        broker_quantity: quantity.contracts(),
                    });
                    plan.corrections.push(Correction::Adopt(adopted));
                }
            } else if position.is_open() {
                check_protection(&mut plan, position, group, broker, settings, now);
            }
        }
        BrokerPosition::Unknown => {
            debug!("Broker position unknown, position checks skipped");
        }
    }

    let adopting = plan.has(|c| matches!(c, Correction::Adopt(_)));
    let exposed = position.is_open() || group_id.is_some() || adopting;
    let lock = state.lock();

    if lock.is_locked() && !exposed {
        if state.release_pending() && lock.hold_elapsed(now) {
            plan.corrections.push(Correction::CompleteDeferredRelease);
        } else if lock.is_stuck(now, settings.lock_grace) {
            let held_secs = lock.held_for(now).map(|d| d.num_seconds()).unwrap_or(0);
            plan.violations.push(ConsistencyViolation::StuckLock { held_secs });
            plan.corrections.push(Correction::ForceReleaseLock);
        }
    } else if !lock.is_locked() && exposed && !adopting {
        plan.violations.push(ConsistencyViolation::ExposureWithoutLock);
        plan.corrections.push(Correction::ReassertLock);
    }

    plan
}

/// Record an unprotected open position and plan a fresh exit pair for it.
///
/// A tracked bracket is protected while both its exits are working. A
/// position with no tracked bracket counts as protected by any working
/// order on its exit side, since those may be the operator's own.
fn check_protection(
    plan: &mut Plan,
    position: &PositionState,
    group: Option<&BracketGroup>,
    broker: &BrokerView,
    settings: &ReconcileSettings,
    now: DateTime<Utc>,
) {
    let Some(side) = position.side() else {
        return;
    };
    let exit_side = side.exit_order_side();
    let reference = position.entry_price();

    let (missing, cancel, prices) = match group {
        Some(group) => {
            if group.status() != BracketStatus::EntryFilled {
                return;
            }
            let settled = position
                .opened_at()
                .map(|at| now - at >= settings.settle_window)
                .unwrap_or(true);
            if !settled {
                return;
            }
            let (working, missing): (Vec<_>, Vec<_>) = [BracketLeg::Stop, BracketLeg::TakeProfit]
                .into_iter()
                .partition(|leg| broker.is_working(group.order_id(*leg)));
            if missing.is_empty() {
                return;
            }
            let cancel: Vec<String> = working
                .into_iter()
                .map(|leg| group.order_id(leg).to_string())
                .collect();
            let prices = group
                .exit_prices()
                .or_else(|| reference.and_then(|r| settings.protection.prices(side, r)));
            (missing, cancel, prices)
        }
        None => {
            if broker.open_orders.iter().any(|o| o.side == exit_side) {
                return;
            }
            let prices = reference.and_then(|r| settings.protection.prices(side, r));
            (vec![BracketLeg::Stop, BracketLeg::TakeProfit], Vec::new(), prices)
        }
    };

    plan.violations.push(ConsistencyViolation::UnprotectedPosition {
        group_id: group.map(|g| g.group_id()),
        missing,
    });
    match prices {
        Some(prices) => plan.corrections.push(Correction::Reprotect(Reprotection {
            group_id: group.map(|g| g.group_id()),
            cancel,
            exit_side,
            quantity: position.quantity(),
            prices,
        })),
        None => warn!("Open position has no reference price, protection cannot be priced"),
    }
}

/// What applying a plan did.
#[derive(Debug, Clone, Default)]
struct Applied {
    cancel_orphans: bool,
    /// Lock taken by the reconciler to fence the orphan cancel
    orphan_hold: bool,
    lock_released: bool,
    expire: Option<BracketGroup>,
    reprotect: Option<Reprotection>,
}

fn apply(state: &mut TradingState, plan: &Plan, now: DateTime<Utc>) -> Applied {
    let mut applied = Applied::default();
    let was_locked = state.lock().is_locked();

    for correction in &plan.corrections {
        match correction {
            Correction::ClearPhantom | Correction::CloseGroup => {
                if let Some(group_id) = state.force_flat_at(now) {
                    debug!(%group_id, "Group closed by reconciliation");
                }
            }
            Correction::Adopt(position) => state.adopt_position_at(position.clone(), now),
            Correction::ForceReleaseLock => {
                state.force_release_lock();
            }
            Correction::CompleteDeferredRelease => {
                state.release_deferred_at(now);
            }
            Correction::ReassertLock => {
                state.reassert_lock_at(now);
            }
            Correction::CancelOrphans => applied.cancel_orphans = true,
            Correction::ExpireEntry(group) => applied.expire = Some(group.clone()),
            Correction::Reprotect(reprotection) => applied.reprotect = Some(reprotection.clone()),
        }
    }

    applied.lock_released = was_locked && !state.lock().is_locked();

    // Hold the lock while orphans are cancelled so no new bracket slips in
    if applied.cancel_orphans {
        applied.orphan_hold = state.reassert_lock_at(now);
    }

    applied
}

fn describe(state: &TradingState) -> String {
    let position = match state.position().side() {
        Some(side) => format!("{:?} x{}", side, state.position().quantity().contracts()),
        None => "flat".to_string(),
    };
    let group = match state.active_group() {
        Some(g) => format!("{:?}", g.status()),
        None => "none".to_string(),
    };
    let lock = if state.lock().is_locked() { "held" } else { "free" };
    format!("position={} group={} lock={}", position, group, lock)
}

// =============================================================================
// Position Reconciler
// =============================================================================

/// Periodic reconciliation against the broker gateway.
pub struct PositionReconciler {
    controller: Arc<BracketController>,
    event_bus: Arc<EventBus>,
    status: Arc<StatusBoard>,
    settings: ReconcileSettings,
}

impl PositionReconciler {
    /// Reconciler correcting state through `controller`.
    pub fn new(
        controller: Arc<BracketController>,
        event_bus: Arc<EventBus>,
        status: Arc<StatusBoard>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            controller,
            event_bus,
            status,
            settings,
        }
    }

    /// Timing and recovery rules in use
    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Start the reconciler in the background.
    ///
    /// Returns a JoinHandle that finishes once `shutdown` is cancelled.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.settings.interval.as_secs(),
                "Position reconciler started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Position reconciler received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(self.settings.interval) => {
                        if let Err(e) = self.reconcile().await {
                            error!(error = %e, "Reconciliation tick failed");
                        }
                    }
                }
            }

            info!("Position reconciler stopped");
        })
    }

    /// Run one reconciliation tick now.
    pub async fn reconcile(&self) -> Result<ReconcileReport, ReconcileError> {
        self.reconcile_at(Utc::now()).await
    }

    /// Run one reconciliation tick with an explicit clock.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Result<ReconcileReport, ReconcileError> {
        let result = self.tick(now).await;

        let report = match &result {
            Ok(report) => report.clone(),
            Err(ReconcileError::Gateway(e)) => ReconcileReport::failed(now, e),
        };
        self.status.record_reconcile(report).await;
        self.status.publish().await;

        result
    }

    async fn tick(&self, now: DateTime<Utc>) -> Result<ReconcileReport, ReconcileError> {
        let core = self.controller.core();
        let tracked = core.with_state(|s| s.active_group().cloned()).await;

        // 1. Query the broker (no mutex held)
        let mut view = self.fetch_view(now).await?;

        // 2. Replay callbacks the controller never received
        let (mut violations, replay_released) = match &tracked {
            Some(group) => self.replay_missed(group, &view, now).await?,
            None => (Vec::new(), false),
        };
        if !violations.is_empty() {
            view = self.fetch_view(now).await?;
        }

        // 3. Plan and apply under the mutex
        let expected = tracked.as_ref().map(|g| g.group_id());
        let settings = self.settings.clone();
        let planned = core
            .with_state(|s| {
                let current = s.active_group().map(|g| g.group_id());
                if current.is_some() && current != expected {
                    return None;
                }
                let before = describe(s);
                let plan = plan(s, &view, &settings, now);
                let applied = apply(s, &plan, now);
                Some((plan, applied, before, describe(s)))
            })
            .await;

        let Some((plan, applied, before, after)) = planned else {
            debug!("Active group changed during reconciliation, tick skipped");
            let mut report = ReconcileReport::observed(now, ReconcileOutcome::Skipped, &view);
            report.violations = violations;
            report.lock_released = replay_released;
            return Ok(report);
        };

        for violation in &plan.violations {
            warn!(?violation, %before, %after, "Consistency violation corrected");
            self.event_bus
                .send(DaemonEvent::ConsistencyViolation(violation.clone()));
        }

        // 4. Gateway-side corrections outside the mutex
        let mut cancelled = 0;
        if applied.cancel_orphans {
            cancelled = self.cancel_orphans().await;
            if applied.orphan_hold {
                core.with_state(|s| {
                    if !s.has_exposure() && !s.submission_in_flight() {
                        s.force_release_lock();
                    }
                })
                .await;
            }
        }

        let mut lock_released = applied.lock_released || replay_released;
        if let Some(group) = &applied.expire {
            match self.controller.expire_entry_at(group, now).await {
                Ok(Some(EventEffect::EntryFailed { release, .. })) => {
                    lock_released |= release == LockRelease::Released;
                }
                Ok(Some(effect)) => debug!(?effect, "Expired entry resolved by broker status"),
                Ok(None) => warn!(
                    group_id = %group.group_id(),
                    "Entry still working after cancel, retrying next tick"
                ),
                Err(e) => error!(error = %e, "Entry expiry failed, retrying next tick"),
            }
        }

        let mut protection_placed = false;
        if let Some(reprotection) = &applied.reprotect {
            match self.controller.reprotect_at(reprotection, now).await {
                Ok(_) => protection_placed = true,
                Err(e) => error!(error = %e, "Protection not placed, retrying next tick"),
            }
        }

        if lock_released {
            info!("Trading lock released by reconciliation");
            self.event_bus.send(DaemonEvent::LockReleased { timestamp: now });
        }

        let corrected = !plan.is_empty() || !violations.is_empty();
        violations.extend(plan.violations);
        let outcome = if corrected {
            ReconcileOutcome::Corrected
        } else {
            ReconcileOutcome::Consistent
        };

        let mut report = ReconcileReport::observed(now, outcome, &view);
        report.violations = violations;
        report.cancelled_orders = cancelled;
        report.lock_released = lock_released;
        report.protection_placed = protection_placed;
        Ok(report)
    }

    /// Query position and working orders; a success ends any gateway outage.
    async fn fetch_view(&self, now: DateTime<Utc>) -> Result<BrokerView, ReconcileError> {
        let gateway = self.controller.gateway();
        let instrument = self.controller.instrument();
        let retry = self.controller.retry_policy();

        let queried = async {
            let position =
                with_retry(retry, "get_position", || gateway.get_position(instrument)).await?;
            let open_orders =
                with_retry(retry, "list_open_orders", || gateway.list_open_orders(instrument))
                    .await?;
            Ok::<_, ExecError>(BrokerView {
                position,
                open_orders,
            })
        }
        .await;

        match queried {
            Ok(view) => {
                let recovered = self
                    .controller
                    .core()
                    .with_state(|s| s.record_gateway_success(now))
                    .await;
                if recovered {
                    info!("Gateway reachable again, accepting intents");
                }
                Ok(view)
            }
            Err(e) => {
                self.record_failure(&e).await;
                Err(e.into())
            }
        }
    }

    async fn record_failure(&self, error: &ExecError) {
        let message = error.to_string();
        let unavailable = self
            .controller
            .core()
            .with_state(|s| s.record_gateway_failure(&message))
            .await;
        warn!(error = %error, "Reconciliation query failed");
        if unavailable {
            error!("Gateway marked unavailable, refusing new intents");
        }
    }

    /// Apply terminal leg states the controller never heard about.
    ///
    /// An entry the gateway no longer knows is resolved from the broker
    /// position once the group has settled: open means it filled, flat means
    /// it is gone. Returns the violations and whether the lock was released.
    async fn replay_missed(
        &self,
        group: &BracketGroup,
        view: &BrokerView,
        now: DateTime<Utc>,
    ) -> Result<(Vec<ConsistencyViolation>, bool), ReconcileError> {
        let gateway = self.controller.gateway();
        let retry = self.controller.retry_policy();
        let fill_price = match view.position {
            BrokerPosition::Open { avg_price, .. } => avg_price,
            _ => None,
        };

        let pending = group.status() == BracketStatus::Pending;
        let settled = now - group.created_at() >= self.settings.settle_window;

        let mut violations = Vec::new();
        let mut released = false;
        for leg in [BracketLeg::Entry, BracketLeg::Stop, BracketLeg::TakeProfit] {
            // A filled entry has nothing left to report
            if leg == BracketLeg::Entry && !pending {
                continue;
            }
            let order_id = group.order_id(leg);
            let status = match with_retry(retry, "get_order_status", || {
                gateway.get_order_status(order_id)
            })
            .await
            {
                Ok(status) => status,
                Err(ExecError::UnknownOrder(_)) => {
                    let resolved = match (leg, view.position) {
                        (BracketLeg::Entry, BrokerPosition::Open { .. }) if settled => {
                            Some(OrderStatus::Filled)
                        }
                        (BracketLeg::Entry, BrokerPosition::Flat) if settled => {
                            Some(OrderStatus::Cancelled)
                        }
                        _ => None,
                    };
                    match resolved {
                        Some(status) => {
                            warn!(
                                order_id,
                                ?status,
                                "Tracked entry unknown to gateway, resolved from position"
                            );
                            status
                        }
                        None => {
                            warn!(order_id, ?leg, "Tracked order unknown to gateway");
                            continue;
                        }
                    }
                }
                Err(e) => {
                    self.record_failure(&e).await;
                    return Err(e.into());
                }
            };
            if !status.is_terminal() {
                continue;
            }

            let filled = status == OrderStatus::Filled;
            let event = OrderEvent {
                order_id: order_id.to_string(),
                status,
                filled_qty: if filled { group.quantity().contracts() } else { 0 },
                avg_price: if filled && leg == BracketLeg::Entry {
                    fill_price
                } else {
                    None
                },
                at: now,
            };

            let effect = self.controller.on_order_event_at(&event, now).await;
            released |= matches!(
                effect,
                EventEffect::EntryFailed { release: LockRelease::Released, .. }
                    | EventEffect::ExitFilled { release: LockRelease::Released, .. }
            );
            if matches!(
                effect,
                EventEffect::EntryFilled { .. }
                    | EventEffect::EntryFailed { .. }
                    | EventEffect::ExitFilled { .. }
            ) {
                warn!(order_id, ?status, "Missed order callback applied by reconciliation");
                violations.push(ConsistencyViolation::MissedCallback {
                    order_id: order_id.to_string(),
                    status,
                });
            }
        }

        Ok((violations, released))
    }

    async fn cancel_orphans(&self) -> usize {
        let gateway = self.controller.gateway();
        let instrument = self.controller.instrument();
        let retry = self.controller.retry_policy();

        match with_retry(retry, "cancel_all_orders", || gateway.cancel_all_orders(instrument)).await {
            Ok(count) => {
                info!(count, "Orphan orders cancelled");
                count
            }
            Err(e) => {
                self.record_failure(&e).await;
                error!(error = %e, "Orphan cancel failed, retrying next tick");
                0
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
