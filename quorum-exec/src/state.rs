//! Shared trading state.
//!
//! `TradingState` owns the position belief, the active bracket group and the
//! global trading lock. It is only reachable through `TradingCore`, which
//! wraps it in a single async mutex. Critical sections are synchronous
//! closures, so no gateway call can ever run while the mutex is held.
//!
//! ```text
//! broker events ─┐
//! reconciler ────┼─► TradingCore (Mutex) ─► TradingState { position, group, lock }
//! controller ────┘
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use quorum_domain::{
    BracketGroup, BracketLeg, BracketOrderIds, BracketStatus, CloseReason, DomainError,
    ExitOrderIds, ExitPrices, GlobalTradingLock, GroupId, LockRelease, OrderSide, OrderStatus,
    PositionState, Quantity, TradingIntent,
};

use crate::ports::OrderEvent;

// =============================================================================
// Configuration
// =============================================================================

/// Business rules enforced by the trading state.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Minimum time the lock stays held after acquisition
    pub min_hold: Duration,
    /// Minimum time between a closed group and the next submission
    pub min_cooldown: Duration,
    /// Consecutive failed gateway operations before refusing new intents
    pub gateway_failure_limit: u32,
    /// Submissions allowed per UTC day
    pub max_daily_trades: u32,
    /// When false every intent is refused with `TradingDisabled`
    pub trading_enabled: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            min_hold: Duration::seconds(30),
            min_cooldown: Duration::seconds(60),
            gateway_failure_limit: 3,
            max_daily_trades: 10,
            trading_enabled: true,
        }
    }
}

// =============================================================================
// Rejections and effects
// =============================================================================

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// Lock held, group active or submission in flight
    LockHeld,
    /// Previous group closed too recently
    CooldownActive,
    /// Intent prices violate the direction ordering
    InvalidPriceInvariant,
    /// Gateway failing or unreachable
    GatewayUnavailable,
    /// Simulation mode
    TradingDisabled,
    /// Daily submission budget spent
    DailyLimitReached,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::LockHeld => "lock held",
            RejectReason::CooldownActive => "cooldown active",
            RejectReason::InvalidPriceInvariant => "invalid price invariant",
            RejectReason::GatewayUnavailable => "gateway unavailable",
            RejectReason::TradingDisabled => "trading disabled",
            RejectReason::DailyLimitReached => "daily trade limit reached",
        };
        f.write_str(s)
    }
}

/// What an order event did to the state. Side effects that need the
/// gateway (cancels) are returned to the caller and run outside the mutex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventEffect {
    /// Order unknown to the active group
    Ignored,
    /// Held until the in-flight submission is recorded
    Buffered,
    /// Terminal event repeated or arriving after closure
    Duplicate,
    EntryFilled {
        group_id: GroupId,
    },
    /// Entry rejected or cancelled; exit legs must be cancelled
    EntryFailed {
        group_id: GroupId,
        cancel: Vec<String>,
        release: LockRelease,
    },
    /// Stop or take-profit filled; the sibling must be cancelled
    ExitFilled {
        group_id: GroupId,
        leg: BracketLeg,
        cancel: String,
        release: LockRelease,
    },
    /// An exit leg died while the group is still active
    ProtectionLost {
        group_id: GroupId,
        leg: BracketLeg,
    },
}

// =============================================================================
// Gateway health
// =============================================================================

/// Consecutive failure tracking for the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayHealth {
    pub consecutive_failures: u32,
    pub unavailable: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    direction: OrderSide,
    quantity: Quantity,
    exits: ExitPrices,
    reserved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct DailyCounter {
    day: Option<NaiveDate>,
    count: u32,
}

impl DailyCounter {
    fn count_on(&self, day: NaiveDate) -> u32 {
        if self.day == Some(day) {
            self.count
        } else {
            0
        }
    }

    fn record(&mut self, day: NaiveDate) {
        if self.day != Some(day) {
            self.day = Some(day);
            self.count = 0;
        }
        self.count += 1;
    }
}

// =============================================================================
// Trading state
// =============================================================================

/// Position, bracket group and lock, mutated only through these methods.
#[derive(Debug)]
pub struct TradingState {
    config: CoreConfig,
    position: PositionState,
    group: Option<BracketGroup>,
    lock: GlobalTradingLock,
    last_closed_at: Option<DateTime<Utc>>,
    release_pending: bool,
    in_flight: Option<InFlight>,
    early_events: Vec<OrderEvent>,
    gateway: GatewayHealth,
    last_intent: Option<TradingIntent>,
    daily: DailyCounter,
}

impl TradingState {
    /// Flat state, lock free.
    pub fn new(config: CoreConfig) -> Self {
        let lock = GlobalTradingLock::new(config.min_hold, config.min_cooldown);
        Self {
            config,
            position: PositionState::flat(),
            group: None,
            lock,
            last_closed_at: None,
            release_pending: false,
            in_flight: None,
            early_events: Vec::new(),
            gateway: GatewayHealth::default(),
            last_intent: None,
            daily: DailyCounter::default(),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Rules this state enforces
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Current position belief
    pub fn position(&self) -> &PositionState {
        &self.position
    }

    /// Most recent group, active or closed
    pub fn group(&self) -> Option<&BracketGroup> {
        self.group.as_ref()
    }

    /// Group that is Pending or EntryFilled
    pub fn active_group(&self) -> Option<&BracketGroup> {
        self.group.as_ref().filter(|g| g.is_active())
    }

    /// The global trading lock
    pub fn lock(&self) -> &GlobalTradingLock {
        &self.lock
    }

    /// When the last group closed (cooldown start)
    pub fn last_closed_at(&self) -> Option<DateTime<Utc>> {
        self.last_closed_at
    }

    /// A group closed inside `min_hold` and the lock awaits release
    pub fn release_pending(&self) -> bool {
        self.release_pending
    }

    /// Lock reserved, bracket not yet acknowledged by the gateway
    pub fn submission_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Gateway failure counters
    pub fn gateway_health(&self) -> &GatewayHealth {
        &self.gateway
    }

    /// False once consecutive failures reach the limit
    pub fn gateway_available(&self) -> bool {
        !self.gateway.unavailable
    }

    /// Last intent offered for submission, accepted or not
    pub fn last_intent(&self) -> Option<&TradingIntent> {
        self.last_intent.as_ref()
    }

    /// Submissions recorded on the UTC day of `now`
    pub fn trades_on(&self, now: DateTime<Utc>) -> u32 {
        self.daily.count_on(now.date_naive())
    }

    /// Open position or active group
    pub fn has_exposure(&self) -> bool {
        self.position.is_open() || self.active_group().is_some()
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Whether a new intent would be accepted right now.
    pub fn check_admission(&self, now: DateTime<Utc>) -> Result<(), RejectReason> {
        if self.gateway.unavailable {
            return Err(RejectReason::GatewayUnavailable);
        }
        if self.lock.is_locked() || self.has_exposure() || self.in_flight.is_some() {
            return Err(RejectReason::LockHeld);
        }
        if !self.lock.cooldown_elapsed(self.last_closed_at, now) {
            return Err(RejectReason::CooldownActive);
        }
        if self.trades_on(now) >= self.config.max_daily_trades {
            return Err(RejectReason::DailyLimitReached);
        }
        if !self.config.trading_enabled {
            return Err(RejectReason::TradingDisabled);
        }
        Ok(())
    }

    /// Check admission and take the lock in one step.
    pub fn reserve_at(
        &mut self,
        intent: &TradingIntent,
        quantity: Quantity,
        now: DateTime<Utc>,
    ) -> Result<(), RejectReason> {
        self.last_intent = Some(intent.clone());
        self.check_admission(now)?;

        self.lock.acquire_at(now);
        self.release_pending = false;
        self.in_flight = Some(InFlight {
            direction: intent.direction(),
            quantity,
            exits: ExitPrices {
                stop: intent.stop_price(),
                take_profit: intent.take_profit_price(),
            },
            reserved_at: now,
        });
        self.early_events.clear();
        Ok(())
    }

    /// Turn the in-flight reservation into a Pending group.
    ///
    /// Returns the group and any events for its orders that arrived early.
    pub fn record_submission(
        &mut self,
        ids: BracketOrderIds,
        now: DateTime<Utc>,
    ) -> Result<(BracketGroup, Vec<OrderEvent>), DomainError> {
        let in_flight = self.in_flight.ok_or_else(|| {
            DomainError::InvalidStateTransition("No submission in flight".to_string())
        })?;

        let group = BracketGroup::new(ids, in_flight.direction, in_flight.quantity, now)?
            .with_exit_prices(in_flight.exits);
        self.in_flight = None;
        self.daily.record(now.date_naive());
        self.group = Some(group.clone());

        let (early, stray): (Vec<_>, Vec<_>) = std::mem::take(&mut self.early_events)
            .into_iter()
            .partition(|e| group.leg_of(&e.order_id).is_some());
        for event in stray {
            debug!(order_id = %event.order_id, "Dropping buffered event for unrelated order");
        }

        debug!(
            group_id = %group.group_id(),
            waited_ms = (now - in_flight.reserved_at).num_milliseconds(),
            "Bracket group recorded"
        );
        Ok((group, early))
    }

    /// Undo a reservation whose submission failed.
    pub fn abort_reservation(&mut self) {
        if self.in_flight.take().is_some() {
            self.lock.force_release();
            self.release_pending = false;
        }
        self.early_events.clear();
    }

    // -------------------------------------------------------------------------
    // Order events
    // -------------------------------------------------------------------------

    /// Apply one broker notification.
    pub fn apply_order_event(&mut self, event: &OrderEvent, now: DateTime<Utc>) -> EventEffect {
        let known = self.group.as_ref().and_then(|g| {
            g.leg_of(&event.order_id)
                .map(|leg| (leg, g.group_id(), g.status()))
        });
        let Some((leg, group_id, group_status)) = known else {
            if self.in_flight.is_some() {
                self.early_events.push(event.clone());
                return EventEffect::Buffered;
            }
            return EventEffect::Ignored;
        };

        match (leg, event.status, group_status) {
            (_, OrderStatus::Pending, _) => EventEffect::Ignored,

            (BracketLeg::Entry, OrderStatus::Filled, BracketStatus::Pending) => {
                self.open_from_entry(event);
                EventEffect::EntryFilled { group_id }
            }
            (BracketLeg::Entry, OrderStatus::Filled, _) => EventEffect::Duplicate,

            (BracketLeg::Entry, status, BracketStatus::Pending) => {
                let reason = if status == OrderStatus::Rejected {
                    CloseReason::EntryRejected
                } else {
                    CloseReason::EntryCancelled
                };
                let cancel = self
                    .group
                    .as_ref()
                    .map(|g| vec![g.stop_order_id().to_string(), g.take_profit_order_id().to_string()])
                    .unwrap_or_default();
                self.close_active_group(reason, now);
                let release = self.release_lock_at(now);
                EventEffect::EntryFailed {
                    group_id,
                    cancel,
                    release,
                }
            }
            (BracketLeg::Entry, _, _) => EventEffect::Duplicate,

            (exit, OrderStatus::Filled, BracketStatus::Pending | BracketStatus::EntryFilled) => {
                let cancel = self
                    .group
                    .as_ref()
                    .and_then(|g| g.sibling_exit(exit))
                    .map(str::to_string)
                    .unwrap_or_default();
                let reason = if exit == BracketLeg::Stop {
                    CloseReason::StopFilled
                } else {
                    CloseReason::TakeProfitFilled
                };
                if group_status == BracketStatus::Pending {
                    warn!(%group_id, ?exit, "Exit filled before entry fill was reported");
                }
                self.close_active_group(reason, now);
                self.position = PositionState::flat();
                let release = self.release_lock_at(now);
                EventEffect::ExitFilled {
                    group_id,
                    leg: exit,
                    cancel,
                    release,
                }
            }
            (_, _, BracketStatus::Closed) => EventEffect::Duplicate,

            (exit, _, _) => EventEffect::ProtectionLost { group_id, leg: exit },
        }
    }

    fn open_from_entry(&mut self, event: &OrderEvent) {
        let Some(group) = self.group.as_mut() else {
            return;
        };
        if let Err(e) = group.mark_entry_filled() {
            warn!(error = %e, "Entry fill on group in unexpected status");
            return;
        }
        let quantity = Quantity::new(event.filled_qty).unwrap_or(group.quantity());
        let side = group.position_side();
        match PositionState::open(side, quantity, event.avg_price, event.at) {
            Ok(position) => self.position = position,
            Err(e) => warn!(error = %e, "Could not open position from entry fill"),
        }
    }

    fn close_active_group(&mut self, reason: CloseReason, now: DateTime<Utc>) -> bool {
        let closed = self
            .group
            .as_mut()
            .map(|g| g.close(reason, now))
            .unwrap_or(false);
        if closed {
            self.last_closed_at = Some(now);
        }
        closed
    }

    fn release_lock_at(&mut self, now: DateTime<Utc>) -> LockRelease {
        let release = self.lock.release_at(now);
        self.release_pending = release == LockRelease::Deferred;
        release
    }

    /// Complete a release deferred by the minimum hold. Returns true if the lock was freed.
    pub fn release_deferred_at(&mut self, now: DateTime<Utc>) -> bool {
        if !self.release_pending {
            return false;
        }
        if self.has_exposure() || self.in_flight.is_some() {
            self.release_pending = false;
            return false;
        }
        match self.lock.release_at(now) {
            LockRelease::Released | LockRelease::NotHeld => {
                self.release_pending = false;
                true
            }
            LockRelease::Deferred => false,
        }
    }

    // -------------------------------------------------------------------------
    // Corrections (reconciler)
    // -------------------------------------------------------------------------

    /// Clear position, close any active group and free the lock.
    /// Returns the id of the group closed, if any.
    pub fn force_flat_at(&mut self, now: DateTime<Utc>) -> Option<GroupId> {
        self.position = PositionState::flat();
        let closed = self.close_group_at(now);
        self.lock.force_release();
        self.release_pending = false;
        closed
    }

    /// Close the active group without touching the position.
    pub fn close_group_at(&mut self, now: DateTime<Utc>) -> Option<GroupId> {
        let id = self.active_group().map(|g| g.group_id())?;
        self.close_active_group(CloseReason::Reconciled, now).then_some(id)
    }

    /// Replace the position belief with the broker's and hold the lock.
    pub fn adopt_position_at(&mut self, position: PositionState, now: DateTime<Utc>) {
        let exposed = position.is_open();
        self.position = position;
        if exposed {
            self.lock.reassert_at(now);
            self.release_pending = false;
        }
    }

    /// Track a freshly placed protective pair for the open position.
    ///
    /// With `expected` set, the exits of that EntryFilled group are replaced.
    /// Without it, the position was adopted and a new EntryFilled group is
    /// created around the pair.
    ///
    /// # Errors
    /// Fails when the position closed or the tracked group changed while the
    /// pair was being placed. The caller must cancel the new orders.
    pub fn attach_protection_at(
        &mut self,
        expected: Option<GroupId>,
        exits: ExitOrderIds,
        prices: ExitPrices,
        now: DateTime<Utc>,
    ) -> Result<BracketGroup, DomainError> {
        let Some(side) = self.position.side() else {
            return Err(DomainError::InvalidStateTransition(
                "Position closed before protection was attached".to_string(),
            ));
        };
        let current = self.active_group().map(|g| g.group_id());
        if current != expected {
            return Err(DomainError::InvalidStateTransition(format!(
                "Tracked group changed during protection: expected {:?}, found {:?}",
                expected, current
            )));
        }

        let group = match self.group.as_mut().filter(|g| g.is_active()) {
            Some(group) => {
                group.replace_exits(exits, prices)?;
                group.clone()
            }
            None => {
                let group = BracketGroup::adopted(
                    exits,
                    side.entry_order_side(),
                    self.position.quantity(),
                    now,
                )?
                .with_exit_prices(prices);
                self.group = Some(group.clone());
                group
            }
        };

        self.lock.reassert_at(now);
        self.release_pending = false;
        Ok(group)
    }

    /// Take the lock if it is free. Returns true if it was taken.
    pub fn reassert_lock_at(&mut self, now: DateTime<Utc>) -> bool {
        let taken = self.lock.reassert_at(now);
        if taken {
            self.release_pending = false;
        }
        taken
    }

    /// Free the lock regardless of hold time. Returns whether it was held.
    pub fn force_release_lock(&mut self) -> bool {
        self.release_pending = false;
        self.lock.force_release()
    }

    // -------------------------------------------------------------------------
    // Gateway health
    // -------------------------------------------------------------------------

    /// Count a failed gateway operation. Returns true when this failure
    /// crossed the unavailability limit.
    pub fn record_gateway_failure(&mut self, error: &str) -> bool {
        self.gateway.consecutive_failures += 1;
        self.gateway.last_error = Some(error.to_string());
        if !self.gateway.unavailable
            && self.gateway.consecutive_failures >= self.config.gateway_failure_limit
        {
            self.gateway.unavailable = true;
            return true;
        }
        false
    }

    /// Count a successful gateway operation. Returns true if this ended an outage.
    pub fn record_gateway_success(&mut self, now: DateTime<Utc>) -> bool {
        let recovered = self.gateway.unavailable;
        self.gateway.consecutive_failures = 0;
        self.gateway.unavailable = false;
        self.gateway.last_success_at = Some(now);
        recovered
    }

    /// Point-in-time copy for status reporting.
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot_at(Utc::now())
    }

    /// Snapshot with an explicit clock (the daily count depends on the day).
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> StateSnapshot {
        StateSnapshot {
            position: self.position.clone(),
            group: self.group.clone(),
            lock_held: self.lock.is_locked(),
            locked_at: self.lock.locked_at(),
            release_pending: self.release_pending,
            last_closed_at: self.last_closed_at,
            submission_in_flight: self.in_flight.is_some(),
            gateway: self.gateway.clone(),
            last_intent: self.last_intent.clone(),
            trades_today: self.trades_on(now),
        }
    }
}

/// Point-in-time copy of the trading state.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub position: PositionState,
    pub group: Option<BracketGroup>,
    pub lock_held: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub release_pending: bool,
    pub last_closed_at: Option<DateTime<Utc>>,
    pub submission_in_flight: bool,
    pub gateway: GatewayHealth,
    pub last_intent: Option<TradingIntent>,
    pub trades_today: u32,
}

impl StateSnapshot {
    /// Group that is Pending or EntryFilled
    pub fn active_group(&self) -> Option<&BracketGroup> {
        self.group.as_ref().filter(|g| g.is_active())
    }

    /// The lock matches exposure: held when a position or group exists.
    pub fn lock_consistent(&self) -> bool {
        let exposed = self.position.is_open() || self.active_group().is_some();
        !exposed || self.lock_held
    }
}

// =============================================================================
// Trading core
// =============================================================================

/// Cloneable handle to the mutex-guarded trading state.
#[derive(Clone)]
pub struct TradingCore {
    inner: Arc<Mutex<TradingState>>,
}

impl TradingCore {
    /// Flat state, lock free.
    pub fn new(config: CoreConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TradingState::new(config))),
        }
    }

    /// Run a bounded, synchronous critical section on the state.
    pub async fn with_state<R>(&self, f: impl FnOnce(&mut TradingState) -> R) -> R {
        let mut state = self.inner.lock().await;
        f(&mut state)
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> StateSnapshot {
        self.with_state(|s| s.snapshot()).await
    }

    /// Whether a new intent would pass admission at `now`.
    pub async fn accepts_intents_at(&self, now: DateTime<Utc>) -> Result<(), RejectReason> {
        self.with_state(|s| s.check_admission(now)).await
    }

    /// Complete a deferred lock release once `min_hold` has elapsed.
    pub async fn release_deferred_at(&self, now: DateTime<Utc>) -> bool {
        self.with_state(|s| s.release_deferred_at(now)).await
    }
}

// =============================================================================
// Tests
// =============================================================================
