//! Stub implementations for testing.
//!
//! These implementations simulate a broker gateway and a feature feed
//! without a real connection. Every broker-side effect (fills, rejects,
//! position changes, failures) is scripted by the caller.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use quorum_domain::{
    BracketLeg, BracketOrderIds, ExitOrderIds, FeatureSnapshot, Instrument, OrderSide, OrderStatus,
    Price, Quantity, Regime,
};

use crate::error::ExecError;
use crate::ports::{
    BracketRequest, BrokerPosition, CancelAck, FeatureFeedPort, GatewayPort, OpenOrder, OrderEvent,
    ProtectionRequest,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Stub Gateway
// =============================================================================

#[derive(Debug, Clone)]
struct StubOrder {
    side: OrderSide,
    quantity: Quantity,
    status: OrderStatus,
    leg: Option<BracketLeg>,
}

#[derive(Debug)]
struct StubBook {
    orders: HashMap<String, StubOrder>,
    submitted: HashMap<Uuid, BracketOrderIds>,
    protections: HashMap<Uuid, ExitOrderIds>,
    position: BrokerPosition,
    order_counter: u64,
    fail_remaining: u32,
    submit_calls: u32,
    protection_calls: u32,
    cancel_calls: HashMap<String, u32>,
    cancel_all_calls: u32,
    events: Option<mpsc::Sender<OrderEvent>>,
}

/// Stub order gateway.
///
/// Orders stay Pending until the test fills, rejects or cancels them.
pub struct StubGateway {
    book: Mutex<StubBook>,
    latency: Mutex<Duration>,
}

impl StubGateway {
    /// Create a gateway with a flat position and no orders.
    pub fn new() -> Self {
        Self {
            book: Mutex::new(StubBook {
                orders: HashMap::new(),
                submitted: HashMap::new(),
                protections: HashMap::new(),
                position: BrokerPosition::Flat,
                order_counter: 0,
                fail_remaining: 0,
                submit_calls: 0,
                protection_calls: 0,
                cancel_calls: HashMap::new(),
                cancel_all_calls: 0,
                events: None,
            }),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    fn book(&self) -> MutexGuard<'_, StubBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Delay every submission (to widen race windows in tests).
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|p| p.into_inner()) = latency;
    }

    /// Configure the next call to fail with a transient error.
    pub fn set_fail_next(&self, fail: bool) {
        self.book().fail_remaining = u32::from(fail);
    }

    /// Fail the next `n` calls with a transient error.
    pub fn fail_times(&self, n: u32) {
        self.book().fail_remaining = n;
    }

    /// Force the broker-reported position.
    pub fn set_position(&self, position: BrokerPosition) {
        self.book().position = position;
    }

    /// Insert a working order unknown to the strategy.
    pub fn place_untracked_order(&self, order_id: &str, side: OrderSide, quantity: Quantity) {
        self.book().orders.insert(
            order_id.to_string(),
            StubOrder {
                side,
                quantity,
                status: OrderStatus::Pending,
                leg: None,
            },
        );
    }

    /// Fill a working order, update the position and notify subscribers.
    ///
    /// Returns the emitted event, or `None` if the order was not working.
    pub fn fill_order(&self, order_id: &str, price: Price) -> Option<OrderEvent> {
        self.fill_order_at(order_id, price, Utc::now())
    }

    /// Like `fill_order` with an explicit event time.
    pub fn fill_order_at(&self, order_id: &str, price: Price, at: DateTime<Utc>) -> Option<OrderEvent> {
        let mut book = self.book();
        let order = book.orders.get_mut(order_id)?;
        if order.status != OrderStatus::Pending {
            return None;
        }
        order.status = OrderStatus::Filled;
        let order = order.clone();

        book.position = match order.leg {
            Some(BracketLeg::Entry) | None => BrokerPosition::Open {
                side: order.side.position_side(),
                quantity: order.quantity,
                avg_price: Some(price),
            },
            Some(BracketLeg::Stop) | Some(BracketLeg::TakeProfit) => BrokerPosition::Flat,
        };

        let event = OrderEvent::filled(order_id, order.quantity.contracts(), price, at);
        Self::emit(&book, &event);
        Some(event)
    }

    /// Reject a working order and notify subscribers.
    pub fn reject_order(&self, order_id: &str) -> Option<OrderEvent> {
        let mut book = self.book();
        let order = book.orders.get_mut(order_id)?;
        if order.status != OrderStatus::Pending {
            return None;
        }
        order.status = OrderStatus::Rejected;

        let event = OrderEvent::terminal(order_id, OrderStatus::Rejected, Utc::now());
        Self::emit(&book, &event);
        Some(event)
    }

    /// Change an order's status silently (simulates a lost callback).
    pub fn set_order_status_silently(&self, order_id: &str, status: OrderStatus) {
        if let Some(order) = self.book().orders.get_mut(order_id) {
            order.status = status;
        }
    }

    /// Drop every order from the book, as a broker session purge would.
    /// Later queries for those ids fail with `UnknownOrder`.
    pub fn forget_orders(&self) {
        self.book().orders.clear();
    }

    /// Current status of an order, if the book knows it.
    pub fn order_status(&self, order_id: &str) -> Option<OrderStatus> {
        self.book().orders.get(order_id).map(|o| o.status)
    }

    /// How many times `cancel_order` was called for the id.
    pub fn cancel_count(&self, order_id: &str) -> u32 {
        self.book().cancel_calls.get(order_id).copied().unwrap_or(0)
    }

    /// `cancel_all_orders` calls received.
    pub fn cancel_all_count(&self) -> u32 {
        self.book().cancel_all_calls
    }

    /// Bracket submissions received, including failed ones.
    pub fn submit_count(&self) -> u32 {
        self.book().submit_calls
    }

    /// Protection submissions received.
    pub fn protection_count(&self) -> u32 {
        self.book().protection_calls
    }

    /// Orders still pending in the book.
    pub fn working_order_count(&self) -> usize {
        self.book()
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending)
            .count()
    }

    fn next_order_id(book: &mut StubBook) -> String {
        book.order_counter += 1;
        format!("STUB-{}", book.order_counter)
    }

    fn should_fail(book: &mut StubBook) -> bool {
        if book.fail_remaining > 0 {
            book.fail_remaining -= 1;
            true
        } else {
            false
        }
    }

    fn emit(book: &StubBook, event: &OrderEvent) {
        if let Some(sender) = &book.events {
            // Subscriber may have dropped
            let _ = sender.try_send(event.clone());
        }
    }
}

impl Default for StubGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayPort for StubGateway {
    async fn submit_bracket(&self, request: &BracketRequest) -> Result<BracketOrderIds, ExecError> {
        let latency = *self.latency.lock().unwrap_or_else(|p| p.into_inner());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut book = self.book();
        book.submit_calls += 1;
        if Self::should_fail(&mut book) {
            return Err(ExecError::Connection("Simulated gateway failure".to_string()));
        }

        if let Some(ids) = book.submitted.get(&request.client_tag) {
            debug!(client_tag = %request.client_tag, "Stub: duplicate submission, returning original ids");
            return Ok(ids.clone());
        }

        let exit_side = request.direction.opposite();
        let ids = BracketOrderIds {
            entry: Self::next_order_id(&mut book),
            stop: Self::next_order_id(&mut book),
            take_profit: Self::next_order_id(&mut book),
        };
        for (id, side, leg) in [
            (&ids.entry, request.direction, BracketLeg::Entry),
            (&ids.stop, exit_side, BracketLeg::Stop),
            (&ids.take_profit, exit_side, BracketLeg::TakeProfit),
        ] {
            book.orders.insert(
                id.clone(),
                StubOrder {
                    side,
                    quantity: request.quantity,
                    status: OrderStatus::Pending,
                    leg: Some(leg),
                },
            );
        }
        book.submitted.insert(request.client_tag, ids.clone());

        debug!(entry = %ids.entry, stop = %ids.stop, take = %ids.take_profit, "Stub: bracket accepted");
        Ok(ids)
    }

    async fn submit_protection(&self, request: &ProtectionRequest) -> Result<ExitOrderIds, ExecError> {
        let mut book = self.book();
        book.protection_calls += 1;
        if Self::should_fail(&mut book) {
            return Err(ExecError::Connection("Simulated gateway failure".to_string()));
        }

        if let Some(ids) = book.protections.get(&request.client_tag) {
            return Ok(ids.clone());
        }

        let ids = ExitOrderIds {
            stop: Self::next_order_id(&mut book),
            take_profit: Self::next_order_id(&mut book),
        };
        for (id, leg) in [(&ids.stop, BracketLeg::Stop), (&ids.take_profit, BracketLeg::TakeProfit)] {
            book.orders.insert(
                id.clone(),
                StubOrder {
                    side: request.exit_side,
                    quantity: request.quantity,
                    status: OrderStatus::Pending,
                    leg: Some(leg),
                },
            );
        }
        book.protections.insert(request.client_tag, ids.clone());

        debug!(stop = %ids.stop, take = %ids.take_profit, "Stub: protection accepted");
        Ok(ids)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelAck, ExecError> {
        let mut book = self.book();
        if Self::should_fail(&mut book) {
            return Err(ExecError::Connection("Simulated cancel failure".to_string()));
        }
        *book.cancel_calls.entry(order_id.to_string()).or_insert(0) += 1;

        let order = book
            .orders
            .get_mut(order_id)
            .ok_or_else(|| ExecError::UnknownOrder(order_id.to_string()))?;
        if order.status.is_terminal() {
            return Ok(CancelAck::AlreadyTerminal);
        }
        order.status = OrderStatus::Cancelled;

        let event = OrderEvent::terminal(order_id, OrderStatus::Cancelled, Utc::now());
        Self::emit(&book, &event);
        debug!(order_id, "Stub: order cancelled");
        Ok(CancelAck::Cancelled)
    }

    async fn cancel_all_orders(&self, _instrument: &Instrument) -> Result<usize, ExecError> {
        let mut book = self.book();
        if Self::should_fail(&mut book) {
            return Err(ExecError::Connection("Simulated cancel-all failure".to_string()));
        }
        book.cancel_all_calls += 1;

        let mut cancelled = Vec::new();
        for (id, order) in book.orders.iter_mut() {
            if order.status == OrderStatus::Pending {
                order.status = OrderStatus::Cancelled;
                cancelled.push(id.clone());
            }
        }
        let now = Utc::now();
        for id in &cancelled {
            Self::emit(&book, &OrderEvent::terminal(id.clone(), OrderStatus::Cancelled, now));
        }
        Ok(cancelled.len())
    }

    async fn get_position(&self, _instrument: &Instrument) -> Result<BrokerPosition, ExecError> {
        let mut book = self.book();
        if Self::should_fail(&mut book) {
            return Err(ExecError::Timeout("Simulated position query timeout".to_string()));
        }
        Ok(book.position)
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, ExecError> {
        let mut book = self.book();
        if Self::should_fail(&mut book) {
            return Err(ExecError::Timeout("Simulated status query timeout".to_string()));
        }
        book.orders
            .get(order_id)
            .map(|o| o.status)
            .ok_or_else(|| ExecError::UnknownOrder(order_id.to_string()))
    }

    async fn list_open_orders(&self, _instrument: &Instrument) -> Result<Vec<OpenOrder>, ExecError> {
        let mut book = self.book();
        if Self::should_fail(&mut book) {
            return Err(ExecError::Timeout("Simulated order list timeout".to_string()));
        }
        let mut open: Vec<OpenOrder> = book
            .orders
            .iter()
            .filter(|(_, o)| o.status == OrderStatus::Pending)
            .map(|(id, o)| OpenOrder {
                order_id: id.clone(),
                side: o.side,
                quantity: o.quantity,
                status: o.status,
            })
            .collect();
        open.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        Ok(open)
    }

    async fn subscribe_events(&self) -> Result<mpsc::Receiver<OrderEvent>, ExecError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.book().events = Some(tx);
        Ok(rx)
    }

    async fn health_check(&self) -> Result<(), ExecError> {
        let mut book = self.book();
        if Self::should_fail(&mut book) {
            return Err(ExecError::Connection("Simulated health check failure".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Stub Feature Feed
// =============================================================================

/// Stub feature producer.
///
/// Snapshots are injected with `push`, or generated by `spawn_synthetic`.
pub struct StubFeatureFeed {
    sender: Mutex<Option<mpsc::Sender<FeatureSnapshot>>>,
}

impl StubFeatureFeed {
    /// Feed with no subscribers and nothing queued.
    pub fn new() -> Self {
        Self {
            sender: Mutex::new(None),
        }
    }

    fn current_sender(&self) -> Option<mpsc::Sender<FeatureSnapshot>> {
        self.sender.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Deliver a snapshot to the subscriber. Returns false if nobody listens.
    pub async fn push(&self, snapshot: FeatureSnapshot) -> bool {
        match self.current_sender() {
            Some(sender) => sender.send(snapshot).await.is_ok(),
            None => false,
        }
    }

    /// Emit a deterministic oscillating market every `interval` until the
    /// subscriber goes away.
    pub fn spawn_synthetic(&self, interval: Duration, base_price: Decimal, tick: Decimal) -> bool {
        let Some(sender) = self.current_sender() else {
            return false;
        };

        tokio::spawn(async move {
            let mut step: u64 = 0;
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let phase = step as f64 / 12.0;
                let drift = phase.sin();
                let offset = Decimal::from((drift * 20.0).round() as i64) * tick;
                let last = base_price + offset;

                let snapshot = match (
                    Price::new(last - tick),
                    Price::new(last),
                    Price::new(last),
                ) {
                    (Ok(bid), Ok(ask), Ok(last_price)) => FeatureSnapshot {
                        timestamp: Utc::now(),
                        features: vec![
                            phase.cos() * 1.5,
                            phase.cos() * 1.2,
                            (phase + 0.3).cos() * 1.4,
                            (phase - 0.3).cos(),
                        ],
                        best_bid: bid,
                        best_ask: ask,
                        last_price,
                        regime: Regime::Undefined,
                    },
                    _ => break,
                };

                if sender.send(snapshot).await.is_err() {
                    break;
                }
                step += 1;
            }
        });
        true
    }
}

impl Default for StubFeatureFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeatureFeedPort for StubFeatureFeed {
    async fn subscribe(&self) -> Result<mpsc::Receiver<FeatureSnapshot>, ExecError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *self.sender.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);
        Ok(rx)
    }
}

// =============================================================================
// Tests
// =============================================================================
