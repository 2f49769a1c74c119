//! Domain Entities for the Quorum trading core
//!
//! Entities carry identity or lifecycle. Their constructors reject every
//! invariant violation so invalid values never reach the gateway.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{
    Confidence, DomainError, OrderSide, Price, Quantity, Side, Signal,
};

/// Bracket group identifier (UUID v7, time ordered)
pub type GroupId = Uuid;

// =============================================================================
// PositionState
// =============================================================================

/// The strategy's belief about its market exposure.
///
/// # Invariants
/// - A flat state has no side, zero quantity and no entry details.
/// - An open state has a side and at least one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionState {
    is_open: bool,
    side: Option<Side>,
    quantity: Quantity,
    entry_price: Option<Price>,
    opened_at: Option<DateTime<Utc>>,
}

impl PositionState {
    /// No exposure
    pub fn flat() -> Self {
        Self {
            is_open: false,
            side: None,
            quantity: Quantity::zero(),
            entry_price: None,
            opened_at: None,
        }
    }

    /// Open exposure.
    ///
    /// `entry_price` is optional because a position adopted from the broker
    /// may not report its average price.
    pub fn open(
        side: Side,
        quantity: Quantity,
        entry_price: Option<Price>,
        opened_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if quantity.is_zero() {
            return Err(DomainError::InvalidQuantity(
                "Open position requires at least one contract".to_string(),
            ));
        }
        Ok(Self {
            is_open: true,
            side: Some(side),
            quantity,
            entry_price,
            opened_at: Some(opened_at),
        })
    }

    /// Whether a position is open
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Whether the strategy is flat
    pub fn is_flat(&self) -> bool {
        !self.is_open
    }

    /// Side of the open position
    pub fn side(&self) -> Option<Side> {
        self.side
    }

    /// Contracts held (zero when flat)
    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    /// Average entry price, when known
    pub fn entry_price(&self) -> Option<Price> {
        self.entry_price
    }

    /// When the position was opened
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }
}

impl Default for PositionState {
    fn default() -> Self {
        Self::flat()
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Broker-side status of a single order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Working at the broker
    Pending,
    /// Fully executed
    Filled,
    /// Cancelled before execution
    Cancelled,
    /// Refused by the broker
    Rejected,
}

impl OrderStatus {
    /// Filled, Cancelled and Rejected are final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// Which order of a bracket an id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BracketLeg {
    /// Opening order
    Entry,
    /// Protective stop
    Stop,
    /// Profit target
    TakeProfit,
}

/// Broker ids of the three orders of one bracket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketOrderIds {
    /// Entry order id
    pub entry: String,
    /// Stop order id
    pub stop: String,
    /// Take-profit order id
    pub take_profit: String,
}

/// Broker ids of a stop / take-profit pair placed for an existing position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitOrderIds {
    /// Stop order id
    pub stop: String,
    /// Take-profit order id
    pub take_profit: String,
}

/// Protective prices of a bracket's exit legs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitPrices {
    /// Stop trigger price
    pub stop: Price,
    /// Profit target price
    pub take_profit: Price,
}

// =============================================================================
// BracketGroup
// =============================================================================

/// Lifecycle status of a bracket group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BracketStatus {
    /// Entry working, no exposure yet
    Pending,
    /// Entry filled, exits working
    EntryFilled,
    /// Terminal
    Closed,
}

/// Why a bracket group was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Stop leg filled
    StopFilled,
    /// Take-profit leg filled
    TakeProfitFilled,
    /// Entry refused by the broker
    EntryRejected,
    /// Entry cancelled before filling
    EntryCancelled,
    /// Forced closed by reconciliation
    Reconciled,
}

/// One logical one-cancels-other order set.
///
/// State machine:
///
/// ```text
/// Pending --entry_fill--> EntryFilled --exit_fill|forced--> Closed
/// Pending --rejected|cancelled|forced--> Closed
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketGroup {
    group_id: GroupId,
    entry_order_id: String,
    stop_order_id: String,
    take_profit_order_id: String,
    direction: OrderSide,
    quantity: Quantity,
    status: BracketStatus,
    exit_prices: Option<ExitPrices>,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    close_reason: Option<CloseReason>,
}

impl BracketGroup {
    /// Record a freshly submitted bracket.
    ///
    /// # Errors
    /// Rejects empty or duplicated order ids and zero quantity.
    pub fn new(
        ids: BracketOrderIds,
        direction: OrderSide,
        quantity: Quantity,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if ids.entry.is_empty() || ids.stop.is_empty() || ids.take_profit.is_empty() {
            return Err(DomainError::InvalidBracket("Order id is empty".to_string()));
        }
        if ids.entry == ids.stop || ids.entry == ids.take_profit || ids.stop == ids.take_profit {
            return Err(DomainError::InvalidBracket(format!(
                "Order ids must be distinct: {:?}",
                ids
            )));
        }
        if quantity.is_zero() {
            return Err(DomainError::InvalidQuantity(
                "Bracket requires at least one contract".to_string(),
            ));
        }

        Ok(Self {
            group_id: Uuid::now_v7(),
            entry_order_id: ids.entry,
            stop_order_id: ids.stop,
            take_profit_order_id: ids.take_profit,
            direction,
            quantity,
            status: BracketStatus::Pending,
            exit_prices: None,
            created_at,
            closed_at: None,
            close_reason: None,
        })
    }

    /// Track protection placed for a position the strategy did not open.
    ///
    /// The group starts in EntryFilled. It has no entry order: its entry id
    /// is a local placeholder the gateway never saw.
    ///
    /// # Errors
    /// Rejects empty or duplicated exit ids and zero quantity.
    pub fn adopted(
        exits: ExitOrderIds,
        direction: OrderSide,
        quantity: Quantity,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let group_id = Uuid::now_v7();
        let ids = BracketOrderIds {
            entry: format!("ADOPTED-{}", group_id),
            stop: exits.stop,
            take_profit: exits.take_profit,
        };
        let mut group = Self::new(ids, direction, quantity, created_at)?;
        group.group_id = group_id;
        group.status = BracketStatus::EntryFilled;
        Ok(group)
    }

    /// Attach the exit prices the bracket was submitted with.
    pub fn with_exit_prices(mut self, prices: ExitPrices) -> Self {
        self.exit_prices = Some(prices);
        self
    }

    /// Group identifier
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Entry order id
    pub fn entry_order_id(&self) -> &str {
        &self.entry_order_id
    }

    /// Stop order id
    pub fn stop_order_id(&self) -> &str {
        &self.stop_order_id
    }

    /// Take-profit order id
    pub fn take_profit_order_id(&self) -> &str {
        &self.take_profit_order_id
    }

    /// Entry direction
    pub fn direction(&self) -> OrderSide {
        self.direction
    }

    /// Contracts per leg
    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    /// Current status
    pub fn status(&self) -> BracketStatus {
        self.status
    }

    /// Stop and take-profit prices, when known
    pub fn exit_prices(&self) -> Option<ExitPrices> {
        self.exit_prices
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Close time, once closed
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    /// Close reason, once closed
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Pending or EntryFilled
    pub fn is_active(&self) -> bool {
        self.status != BracketStatus::Closed
    }

    /// Map a broker order id onto its leg
    pub fn leg_of(&self, order_id: &str) -> Option<BracketLeg> {
        if order_id == self.entry_order_id {
            Some(BracketLeg::Entry)
        } else if order_id == self.stop_order_id {
            Some(BracketLeg::Stop)
        } else if order_id == self.take_profit_order_id {
            Some(BracketLeg::TakeProfit)
        } else {
            None
        }
    }

    /// Order id of a leg
    pub fn order_id(&self, leg: BracketLeg) -> &str {
        match leg {
            BracketLeg::Entry => &self.entry_order_id,
            BracketLeg::Stop => &self.stop_order_id,
            BracketLeg::TakeProfit => &self.take_profit_order_id,
        }
    }

    /// The exit leg that must be cancelled once `leg` fills
    pub fn sibling_exit(&self, leg: BracketLeg) -> Option<&str> {
        match leg {
            BracketLeg::Stop => Some(&self.take_profit_order_id),
            BracketLeg::TakeProfit => Some(&self.stop_order_id),
            BracketLeg::Entry => None,
        }
    }

    /// All three order ids
    pub fn order_ids(&self) -> [&str; 3] {
        [&self.entry_order_id, &self.stop_order_id, &self.take_profit_order_id]
    }

    /// Position side this bracket opens
    pub fn position_side(&self) -> Side {
        self.direction.position_side()
    }

    /// Pending -> EntryFilled
    ///
    /// # Errors
    /// Any other starting status is an invalid transition.
    pub fn mark_entry_filled(&mut self) -> Result<(), DomainError> {
        match self.status {
            BracketStatus::Pending => {
                self.status = BracketStatus::EntryFilled;
                Ok(())
            }
            other => Err(DomainError::InvalidStateTransition(format!(
                "Cannot fill entry of bracket {} in status {:?}",
                self.group_id, other
            ))),
        }
    }

    /// Swap the exit legs for a freshly placed protective pair.
    ///
    /// # Errors
    /// Only an EntryFilled group can be re-protected, and the new ids must be
    /// non-empty and distinct from each other and from the entry.
    pub fn replace_exits(&mut self, exits: ExitOrderIds, prices: ExitPrices) -> Result<(), DomainError> {
        if self.status != BracketStatus::EntryFilled {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot replace exits of bracket {} in status {:?}",
                self.group_id, self.status
            )));
        }
        if exits.stop.is_empty()
            || exits.take_profit.is_empty()
            || exits.stop == exits.take_profit
            || exits.stop == self.entry_order_id
            || exits.take_profit == self.entry_order_id
        {
            return Err(DomainError::InvalidBracket(format!(
                "Invalid exit ids: {:?}",
                exits
            )));
        }

        self.stop_order_id = exits.stop;
        self.take_profit_order_id = exits.take_profit;
        self.exit_prices = Some(prices);
        Ok(())
    }

    /// Move to Closed. Returns false if already closed.
    pub fn close(&mut self, reason: CloseReason, at: DateTime<Utc>) -> bool {
        if self.status == BracketStatus::Closed {
            return false;
        }
        self.status = BracketStatus::Closed;
        self.closed_at = Some(at);
        self.close_reason = Some(reason);
        true
    }
}

// =============================================================================
// TradingIntent
// =============================================================================

/// A validated request to open one bracket.
///
/// # Invariants
/// - Buy: `stop < entry < take_profit`
/// - Sell: `take_profit < entry < stop`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradingIntent {
    direction: OrderSide,
    confidence: Confidence,
    entry_price: Price,
    stop_price: Price,
    take_profit_price: Price,
    generated_at: DateTime<Utc>,
}

impl TradingIntent {
    /// Create an intent, rejecting any price ordering that contradicts the direction.
    pub fn new(
        direction: OrderSide,
        confidence: Confidence,
        entry_price: Price,
        stop_price: Price,
        take_profit_price: Price,
        generated_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        Self::check_ordering(direction, entry_price, stop_price, take_profit_price)?;
        Ok(Self {
            direction,
            confidence,
            entry_price,
            stop_price,
            take_profit_price,
            generated_at,
        })
    }

    fn check_ordering(
        direction: OrderSide,
        entry: Price,
        stop: Price,
        take: Price,
    ) -> Result<(), DomainError> {
        let ok = match direction {
            OrderSide::Buy => stop < entry && entry < take,
            OrderSide::Sell => take < entry && entry < stop,
        };
        if ok {
            Ok(())
        } else {
            Err(DomainError::InvalidPriceOrdering(format!(
                "{} entry={} stop={} take={}",
                direction, entry, stop, take
            )))
        }
    }

    /// Re-check the ordering invariant.
    pub fn validate(&self) -> Result<(), DomainError> {
        Self::check_ordering(self.direction, self.entry_price, self.stop_price, self.take_profit_price)
    }

    /// Entry direction
    pub fn direction(&self) -> OrderSide {
        self.direction
    }

    /// Decision confidence
    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    /// Entry price
    pub fn entry_price(&self) -> Price {
        self.entry_price
    }

    /// Stop price
    pub fn stop_price(&self) -> Price {
        self.stop_price
    }

    /// Take-profit price
    pub fn take_profit_price(&self) -> Price {
        self.take_profit_price
    }

    /// When the engine produced the intent
    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

// =============================================================================
// Scoring inputs and outputs
// =============================================================================

/// One scorer's opinion on one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerOutput {
    /// Identifier of the producing scorer
    pub source_id: String,
    /// Proposed direction
    pub direction: Signal,
    /// Confidence in the direction
    pub confidence: Confidence,
}

impl ScorerOutput {
    /// Build an output
    pub fn new(source_id: impl Into<String>, direction: Signal, confidence: Confidence) -> Self {
        Self {
            source_id: source_id.into(),
            direction,
            confidence,
        }
    }

    /// Neutral output used when a scorer fails or times out
    pub fn hold(source_id: impl Into<String>) -> Self {
        Self::new(source_id, Signal::Hold, Confidence::ZERO)
    }

    /// `+confidence` for Buy, `-confidence` for Sell, 0 for Hold
    pub fn signed_confidence(&self) -> f64 {
        self.direction.sign() * self.confidence.value()
    }
}

/// Market regime attached to each snapshot by the feature producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    /// Sustained upward trend
    TrendingUp,
    /// Sustained downward trend
    TrendingDown,
    /// Range-bound
    Ranging,
    /// High volatility without direction
    Volatile,
    /// Not classified
    #[default]
    Undefined,
}

/// Fixed-shape market state vector plus top of book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    /// Producer timestamp (monotonic per feed)
    pub timestamp: DateTime<Utc>,
    /// Feature vector
    pub features: Vec<f64>,
    /// Best bid
    pub best_bid: Price,
    /// Best ask
    pub best_ask: Price,
    /// Last traded price
    pub last_price: Price,
    /// Market regime
    #[serde(default)]
    pub regime: Regime,
}

impl FeatureSnapshot {
    /// Mid of best bid and ask
    pub fn mid(&self) -> Decimal {
        (self.best_bid.as_decimal() + self.best_ask.as_decimal()) / Decimal::TWO
    }

    /// The price-derived fields watched for staleness
    pub fn price_fields(&self) -> (Price, Price, Price) {
        (self.best_bid, self.best_ask, self.last_price)
    }
}

// =============================================================================
// Tests
// =============================================================================
