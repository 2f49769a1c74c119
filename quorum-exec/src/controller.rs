//! Bracket order controller.
//!
//! Turns an accepted `TradingIntent` into exactly one bracket group at the
//! gateway and drives the group through its lifecycle from order events.
//!
//! # Flow
//!
//! ```text
//! submit:   reserve (mutex) → submit_bracket (no mutex) → record group (mutex)
//! event:    apply (mutex) → cancels (no mutex)
//! protect:  cancel stale exits → submit_protection (no mutex) → attach (mutex)
//! expire:   cancel entry → confirm status (no mutex) → apply (mutex)
//! ```
//!
//! The reservation takes the lock before the gateway call, so a second
//! intent arriving while the first submission is in flight is refused with
//! `LockHeld`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use quorum_domain::{
    BracketGroup, ExitPrices, GroupId, Instrument, LockRelease, OrderSide, OrderStatus, Quantity,
    TradingIntent,
};

use crate::error::ExecError;
use crate::ports::{
    BracketRequest, CancelAck, EntryOrderType, GatewayPort, OrderEvent, ProtectionRequest,
};
use crate::retry::{with_retry, RetryPolicy};
use crate::state::{EventEffect, RejectReason, TradingCore};

/// Protective pair to place for an open position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reprotection {
    /// Group whose exits are replaced; None for an adopted position
    pub group_id: Option<GroupId>,
    /// Surviving exit orders to cancel before the new pair goes in
    pub cancel: Vec<String>,
    pub exit_side: OrderSide,
    pub quantity: Quantity,
    pub prices: ExitPrices,
}

/// Places brackets and reacts to their order events.
pub struct BracketController {
    core: TradingCore,
    gateway: Arc<dyn GatewayPort>,
    instrument: Instrument,
    quantity: Quantity,
    entry_type: EntryOrderType,
    retry: RetryPolicy,
}

impl BracketController {
    /// Controller placing brackets of `quantity` on `instrument`.
    pub fn new(
        core: TradingCore,
        gateway: Arc<dyn GatewayPort>,
        instrument: Instrument,
        quantity: Quantity,
    ) -> Self {
        Self {
            core,
            gateway,
            instrument,
            quantity,
            entry_type: EntryOrderType::Limit,
            retry: RetryPolicy::default(),
        }
    }

    /// Use `entry_type` for entry orders.
    pub fn with_entry_type(mut self, entry_type: EntryOrderType) -> Self {
        self.entry_type = entry_type;
        self
    }

    /// Retry transient gateway failures with `retry`.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Shared trading state
    pub fn core(&self) -> &TradingCore {
        &self.core
    }

    /// Order gateway
    pub fn gateway(&self) -> &Arc<dyn GatewayPort> {
        &self.gateway
    }

    /// Traded instrument
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Backoff applied to gateway calls
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Submit a bracket for the intent.
    pub async fn submit(&self, intent: &TradingIntent) -> Result<BracketGroup, RejectReason> {
        self.submit_at(intent, Utc::now()).await
    }

    /// Submit with an explicit clock.
    pub async fn submit_at(
        &self,
        intent: &TradingIntent,
        now: DateTime<Utc>,
    ) -> Result<BracketGroup, RejectReason> {
        if let Err(e) = intent.validate() {
            warn!(error = %e, "Intent violates price ordering");
            return Err(RejectReason::InvalidPriceInvariant);
        }

        let quantity = self.quantity;
        self.core
            .with_state(|s| s.reserve_at(intent, quantity, now))
            .await
            .inspect_err(|reason| info!(%reason, direction = %intent.direction(), "Intent rejected"))?;

        let request =
            BracketRequest::from_intent(intent, self.instrument.clone(), quantity, self.entry_type);

        info!(
            client_tag = %request.client_tag,
            direction = %request.direction,
            entry = %request.entry_price.as_decimal(),
            stop = %request.stop_price.as_decimal(),
            take_profit = %request.take_profit_price.as_decimal(),
            "Submitting bracket"
        );

        let submitted = with_retry(&self.retry, "submit_bracket", || {
            self.gateway.submit_bracket(&request)
        })
        .await;

        let ids = match submitted {
            Ok(ids) => ids,
            Err(e) => {
                self.abort_submission(&e).await;
                return Err(RejectReason::GatewayUnavailable);
            }
        };

        let recorded = self
            .core
            .with_state(|s| {
                s.record_gateway_success(now);
                s.record_submission(ids, now)
            })
            .await;

        let (group, early) = match recorded {
            Ok(recorded) => recorded,
            Err(e) => {
                error!(error = %e, "Gateway returned unusable order ids");
                self.core.with_state(|s| s.abort_reservation()).await;
                return Err(RejectReason::GatewayUnavailable);
            }
        };

        info!(
            group_id = %group.group_id(),
            entry = group.entry_order_id(),
            stop = group.stop_order_id(),
            take_profit = group.take_profit_order_id(),
            "Bracket group pending"
        );

        for event in early {
            debug!(order_id = %event.order_id, "Replaying early order event");
            self.on_order_event_at(&event, now).await;
        }

        Ok(group)
    }

    async fn abort_submission(&self, error: &ExecError) {
        let message = error.to_string();
        let became_unavailable = self
            .core
            .with_state(|s| {
                s.abort_reservation();
                s.record_gateway_failure(&message)
            })
            .await;

        warn!(error = %error, "Bracket submission failed, reservation released");
        if became_unavailable {
            error!("Gateway marked unavailable, refusing new intents until reconciliation succeeds");
        }
    }

    // =========================================================================
    // Order events
    // =========================================================================

    /// Apply a broker order event.
    pub async fn on_order_event(&self, event: &OrderEvent) -> EventEffect {
        self.on_order_event_at(event, Utc::now()).await
    }

    /// Apply a broker order event with an explicit clock.
    pub async fn on_order_event_at(&self, event: &OrderEvent, now: DateTime<Utc>) -> EventEffect {
        let effect = self
            .core
            .with_state(|s| s.apply_order_event(event, now))
            .await;

        match &effect {
            EventEffect::EntryFilled { group_id } => {
                info!(
                    %group_id,
                    order_id = %event.order_id,
                    filled = event.filled_qty,
                    price = ?event.avg_price.map(|p| p.as_decimal()),
                    "Entry filled, position open"
                );
            }
            EventEffect::EntryFailed {
                group_id,
                cancel,
                release,
            } => {
                warn!(%group_id, status = ?event.status, "Entry did not fill, closing group");
                log_release(*release);
                for order_id in cancel {
                    self.cancel_leg(order_id).await;
                }
            }
            EventEffect::ExitFilled {
                group_id,
                leg,
                cancel,
                release,
            } => {
                info!(%group_id, ?leg, order_id = %event.order_id, "Exit filled, position flat");
                log_release(*release);
                if !cancel.is_empty() {
                    self.cancel_leg(cancel).await;
                }
            }
            EventEffect::ProtectionLost { group_id, leg } => {
                warn!(
                    %group_id,
                    ?leg,
                    status = ?event.status,
                    "Exit leg terminated while group active"
                );
            }
            EventEffect::Duplicate => {
                debug!(order_id = %event.order_id, status = ?event.status, "Duplicate order event ignored");
            }
            EventEffect::Buffered => {
                debug!(order_id = %event.order_id, "Order event buffered until submission is recorded");
            }
            EventEffect::Ignored => {
                debug!(order_id = %event.order_id, "Order event for untracked order");
            }
        }

        effect
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Replace missing protection on the open position.
    ///
    /// Surviving exits are cancelled first so the position never carries two
    /// stop orders. If the position or group changed while the pair was being
    /// placed, the new orders are cancelled again and an error returned.
    pub async fn reprotect_at(
        &self,
        plan: &Reprotection,
        now: DateTime<Utc>,
    ) -> Result<BracketGroup, ExecError> {
        for order_id in &plan.cancel {
            if !self.cancel_leg(order_id).await {
                return Err(ExecError::Gateway(format!(
                    "Exit {} may still be working, protection not placed",
                    order_id
                )));
            }
        }

        let request = ProtectionRequest::new(
            self.instrument.clone(),
            plan.exit_side,
            plan.quantity,
            plan.prices,
        );
        info!(
            client_tag = %request.client_tag,
            exit_side = %request.exit_side,
            stop = %request.prices.stop.as_decimal(),
            take_profit = %request.prices.take_profit.as_decimal(),
            "Placing protection for open position"
        );

        let exits = match with_retry(&self.retry, "submit_protection", || {
            self.gateway.submit_protection(&request)
        })
        .await
        {
            Ok(exits) => exits,
            Err(e) => {
                self.core
                    .with_state(|s| s.record_gateway_failure(&e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let attached = self
            .core
            .with_state(|s| {
                s.record_gateway_success(now);
                s.attach_protection_at(plan.group_id, exits.clone(), plan.prices, now)
            })
            .await;

        match attached {
            Ok(group) => {
                info!(
                    group_id = %group.group_id(),
                    stop = group.stop_order_id(),
                    take_profit = group.take_profit_order_id(),
                    "Position protected"
                );
                Ok(group)
            }
            Err(e) => {
                warn!(error = %e, "State moved while protecting, withdrawing new exits");
                self.cancel_leg(&exits.stop).await;
                self.cancel_leg(&exits.take_profit).await;
                Err(e.into())
            }
        }
    }

    /// Cancel the entry of a bracket that never filled.
    ///
    /// The group is only closed once the broker confirms the entry is
    /// terminal; the confirmed status is applied like a regular callback,
    /// so an entry that filled in the meantime opens the position instead.
    /// Returns `None` while the entry is still working.
    pub async fn expire_entry_at(
        &self,
        group: &BracketGroup,
        now: DateTime<Utc>,
    ) -> Result<Option<EventEffect>, ExecError> {
        let order_id = group.entry_order_id();
        info!(group_id = %group.group_id(), order_id, "Entry expired unfilled, cancelling");

        match with_retry(&self.retry, "cancel_order", || self.gateway.cancel_order(order_id)).await {
            Ok(ack) => log_cancel(order_id, ack),
            Err(ExecError::UnknownOrder(_)) => {}
            Err(e) => {
                self.core
                    .with_state(|s| s.record_gateway_failure(&e.to_string()))
                    .await;
                return Err(e);
            }
        }

        let status = match with_retry(&self.retry, "get_order_status", || {
            self.gateway.get_order_status(order_id)
        })
        .await
        {
            Ok(status) => status,
            Err(ExecError::UnknownOrder(_)) => OrderStatus::Cancelled,
            Err(e) => return Err(e),
        };

        let event = match status {
            OrderStatus::Pending => return Ok(None),
            OrderStatus::Filled => OrderEvent {
                order_id: order_id.to_string(),
                status,
                filled_qty: group.quantity().contracts(),
                avg_price: None,
                at: now,
            },
            terminal => OrderEvent::terminal(order_id, terminal, now),
        };

        Ok(Some(self.on_order_event_at(&event, now).await))
    }

    /// Cancel one order. A failed cancel is confirmed with a status query and
    /// repeated once only if the order is still working.
    ///
    /// Returns false when the order may still be working.
    async fn cancel_leg(&self, order_id: &str) -> bool {
        let first = with_retry(&self.retry, "cancel_order", || {
            self.gateway.cancel_order(order_id)
        })
        .await;

        match first {
            Ok(ack) => {
                log_cancel(order_id, ack);
                return true;
            }
            Err(ExecError::UnknownOrder(_)) => {
                warn!(order_id, "Cancel for order unknown to gateway");
                return true;
            }
            Err(e) => {
                warn!(order_id, error = %e, "Cancel failed, confirming order status");
                self.core
                    .with_state(|s| s.record_gateway_failure(&e.to_string()))
                    .await;
            }
        }

        match self.gateway.get_order_status(order_id).await {
            Ok(status) if status.is_terminal() => {
                debug!(order_id, ?status, "Order already terminal");
                true
            }
            Ok(_) => match self.gateway.cancel_order(order_id).await {
                Ok(ack) => {
                    log_cancel(order_id, ack);
                    true
                }
                Err(e) => {
                    error!(order_id, error = %e, "Cancel retry failed, left for reconciliation");
                    false
                }
            },
            Err(e) => {
                error!(order_id, error = %e, "Order status unknown, left for reconciliation");
                false
            }
        }
    }
}

fn log_cancel(order_id: &str, ack: CancelAck) {
    match ack {
        CancelAck::Cancelled => info!(order_id, "Order cancelled"),
        CancelAck::AlreadyTerminal => debug!(order_id, "Order already terminal"),
    }
}

fn log_release(release: LockRelease) {
    match release {
        LockRelease::Released => info!("Trading lock released"),
        LockRelease::Deferred => info!("Trading lock release deferred until minimum hold elapses"),
        LockRelease::NotHeld => warn!("Group closed without holding the trading lock"),
    }
}

// =============================================================================
// Tests
// =============================================================================
