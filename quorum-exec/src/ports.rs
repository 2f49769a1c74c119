//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services (order gateway,
//! feature feed). Adapters implement these ports for a specific broker
//! bridge or for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use quorum_domain::{
    BracketOrderIds, ExitOrderIds, ExitPrices, FeatureSnapshot, Instrument, OrderSide, OrderStatus,
    Price, Quantity, Side, TradingIntent,
};

use crate::error::ExecError;

// =============================================================================
// Gateway Port
// =============================================================================

/// Port for the broker order gateway.
///
/// Implementations:
/// - `StubGateway` - scriptable in-memory broker for tests and development
///
/// Order status changes are not pushed through return values; they arrive
/// as `OrderEvent` messages on the channel returned by `subscribe_events`.
#[async_trait]
pub trait GatewayPort: Send + Sync {
    /// Submit entry, stop and take-profit as one contingent group.
    ///
    /// Submissions carrying an already seen `client_tag` must return the
    /// original ids instead of placing new orders.
    async fn submit_bracket(&self, request: &BracketRequest) -> Result<BracketOrderIds, ExecError>;

    /// Place a one-cancels-other stop / take-profit pair for an open position.
    ///
    /// Same idempotency rule as `submit_bracket`.
    async fn submit_protection(&self, request: &ProtectionRequest) -> Result<ExitOrderIds, ExecError>;

    /// Cancel an order.
    ///
    /// Cancelling an order that is already filled or cancelled is not an
    /// error: it returns `CancelAck::AlreadyTerminal`.
    async fn cancel_order(&self, order_id: &str) -> Result<CancelAck, ExecError>;

    /// Cancel every working order for the instrument. Returns how many were cancelled.
    async fn cancel_all_orders(&self, instrument: &Instrument) -> Result<usize, ExecError>;

    /// Authoritative position for the instrument.
    async fn get_position(&self, instrument: &Instrument) -> Result<BrokerPosition, ExecError>;

    /// Status of a single order.
    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, ExecError>;

    /// Working (non-terminal) orders for the instrument.
    async fn list_open_orders(&self, instrument: &Instrument) -> Result<Vec<OpenOrder>, ExecError>;

    /// Stream of asynchronous order status notifications.
    async fn subscribe_events(&self) -> Result<mpsc::Receiver<OrderEvent>, ExecError>;

    /// Check if the gateway is reachable.
    async fn health_check(&self) -> Result<(), ExecError>;
}

/// How the entry leg is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryOrderType {
    Market,
    Limit,
}

/// Everything the gateway needs to place one bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketRequest {
    /// Idempotency key for retried submissions
    pub client_tag: Uuid,
    pub instrument: Instrument,
    pub direction: OrderSide,
    pub quantity: Quantity,
    pub entry_type: EntryOrderType,
    pub entry_price: Price,
    pub stop_price: Price,
    pub take_profit_price: Price,
}

impl BracketRequest {
    /// Bracket request for `intent` with a fresh client tag.
    pub fn from_intent(
        intent: &TradingIntent,
        instrument: Instrument,
        quantity: Quantity,
        entry_type: EntryOrderType,
    ) -> Self {
        Self {
            client_tag: Uuid::now_v7(),
            instrument,
            direction: intent.direction(),
            quantity,
            entry_type,
            entry_price: intent.entry_price(),
            stop_price: intent.stop_price(),
            take_profit_price: intent.take_profit_price(),
        }
    }
}

/// Protective exit pair for a position that lost its bracket exits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionRequest {
    /// Idempotency key for retried submissions
    pub client_tag: Uuid,
    pub instrument: Instrument,
    /// Side of both exit orders (opposite of the position)
    pub exit_side: OrderSide,
    pub quantity: Quantity,
    pub prices: ExitPrices,
}

impl ProtectionRequest {
    /// Protection request with a fresh client tag.
    pub fn new(instrument: Instrument, exit_side: OrderSide, quantity: Quantity, prices: ExitPrices) -> Self {
        Self {
            client_tag: Uuid::now_v7(),
            instrument,
            exit_side,
            quantity,
            prices,
        }
    }
}

/// Cancel acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelAck {
    /// Order was working and is now cancelled
    Cancelled,
    /// Order had already reached a terminal state
    AlreadyTerminal,
}

/// Broker view of the instrument's position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerPosition {
    Flat,
    Open {
        side: Side,
        quantity: Quantity,
        avg_price: Option<Price>,
    },
    /// Broker could not determine the position
    Unknown,
}

impl BrokerPosition {
    /// Whether a position is held.
    pub fn is_open(&self) -> bool {
        matches!(self, BrokerPosition::Open { .. })
    }
}

/// A working order at the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub side: OrderSide,
    pub quantity: Quantity,
    pub status: OrderStatus,
}

/// Asynchronous order status notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub status: OrderStatus,
    /// Contracts filled (0 unless Filled)
    pub filled_qty: u32,
    pub avg_price: Option<Price>,
    pub at: DateTime<Utc>,
}

impl OrderEvent {
    /// Full fill of `quantity` at `avg_price`.
    pub fn filled(order_id: impl Into<String>, quantity: u32, avg_price: Price, at: DateTime<Utc>) -> Self {
        Self {
            order_id: order_id.into(),
            status: OrderStatus::Filled,
            filled_qty: quantity,
            avg_price: Some(avg_price),
            at,
        }
    }

    /// Terminal event carrying no fill.
    pub fn terminal(order_id: impl Into<String>, status: OrderStatus, at: DateTime<Utc>) -> Self {
        Self {
            order_id: order_id.into(),
            status,
            filled_qty: 0,
            avg_price: None,
            at,
        }
    }
}

// =============================================================================
// Feature Feed Port
// =============================================================================

/// Port for the feature snapshot producer.
#[async_trait]
pub trait FeatureFeedPort: Send + Sync {
    /// Subscribe to snapshots. The stream ends when the producer stops.
    async fn subscribe(&self) -> Result<mpsc::Receiver<FeatureSnapshot>, ExecError>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_domain::Confidence;
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_from_intent() {
        let intent = TradingIntent::new(
            OrderSide::Sell,
            Confidence::new(0.7).unwrap(),
            Price::new(dec!(5000)).unwrap(),
            Price::new(dec!(5004)).unwrap(),
            Price::new(dec!(4990)).unwrap(),
            Utc::now(),
        )
        .unwrap();

        let request = BracketRequest::from_intent(
            &intent,
            Instrument::new("WDOU25").unwrap(),
            Quantity::new(2).unwrap(),
            EntryOrderType::Limit,
        );

        assert_eq!(request.direction, OrderSide::Sell);
        assert_eq!(request.stop_price.as_decimal(), dec!(5004));
        assert_eq!(request.quantity.contracts(), 2);
    }

    #[test]
    fn test_order_event_serialization() {
        let event = OrderEvent::filled("STUB-1", 1, Price::new(dec!(5000.5)).unwrap(), Utc::now());

        let json = serde_json::to_string(&event).unwrap();
        let parsed: OrderEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.order_id, "STUB-1");
        assert_eq!(parsed.status, OrderStatus::Filled);
    }
}
