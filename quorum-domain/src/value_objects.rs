//! Value Objects for the Quorum domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain errors for value object and entity validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Price must be positive
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Quantity must be a positive number of contracts
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Instrument code must be non-empty
    #[error("Invalid instrument: {0}")]
    InvalidInstrument(String),

    /// Tick size must be positive
    #[error("Invalid tick size: {0}")]
    InvalidTickSize(String),

    /// Confidence must lie in [0, 1]
    #[error("Invalid confidence: {0}")]
    InvalidConfidence(String),

    /// Stop / entry / take-profit ordering does not match the direction
    #[error("Invalid price ordering: {0}")]
    InvalidPriceOrdering(String),

    /// Bracket order ids missing or duplicated
    #[error("Invalid bracket: {0}")]
    InvalidBracket(String),

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

// =============================================================================
// Price
// =============================================================================

/// Price represents a positive decimal price
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    /// Create a new Price with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPrice` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidPrice(format!("Price must be positive, got {}", value)));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// Quantity of futures contracts.
///
/// Orders always carry at least one contract; a flat position carries zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    /// Create an order quantity (at least one contract)
    ///
    /// # Errors
    /// Returns `DomainError::InvalidQuantity` if contracts == 0
    pub fn new(contracts: u32) -> Result<Self, DomainError> {
        if contracts == 0 {
            return Err(DomainError::InvalidQuantity(
                "Order quantity must be at least one contract".to_string(),
            ));
        }
        Ok(Self(contracts))
    }

    /// Zero contracts (flat position only)
    pub fn zero() -> Self {
        Self(0)
    }

    /// Number of contracts
    pub fn contracts(&self) -> u32 {
        self.0
    }

    /// True for a flat quantity
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Instrument
// =============================================================================

/// Futures contract code (e.g. `WDOU25`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instrument(String);

impl Instrument {
    /// Create an instrument code, normalized to uppercase
    ///
    /// # Errors
    /// Returns `DomainError::InvalidInstrument` for empty or whitespace-bearing codes
    pub fn new(code: &str) -> Result<Self, DomainError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(DomainError::InvalidInstrument("Instrument code is empty".to_string()));
        }
        if code.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidInstrument(format!(
                "Instrument code contains whitespace: {}",
                code
            )));
        }
        Ok(Self(code.to_uppercase()))
    }

    /// Contract code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// TickSize
// =============================================================================

/// Minimum price increment of the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickSize(Decimal);

impl TickSize {
    /// Create a tick size
    ///
    /// # Errors
    /// Returns `DomainError::InvalidTickSize` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidTickSize(format!(
                "Tick size must be positive, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Round a raw price to the nearest tick (half away from zero).
    pub fn quantize(&self, value: Decimal) -> Decimal {
        let ticks = (value / self.0).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        (ticks * self.0).normalize()
    }

    /// Price distance spanned by `n` ticks.
    pub fn ticks(&self, n: u32) -> Decimal {
        self.0 * Decimal::from(n)
    }
}

impl Default for TickSize {
    /// Half a point, the mini-dollar (WDO) increment.
    fn default() -> Self {
        Self(rust_decimal_macros::dec!(0.5))
    }
}

// =============================================================================
// Side / OrderSide
// =============================================================================

/// Position side: Long (profit when price rises) or Short (profit when price falls)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Long position
    Long,
    /// Short position
    Short,
}

impl Side {
    /// Order side that opens this position
    pub fn entry_order_side(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes this position
    pub fn exit_order_side(&self) -> OrderSide {
        self.entry_order_side().opposite()
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Order side on the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl OrderSide {
    /// Position opened by an entry order on this side
    pub fn position_side(&self) -> Side {
        match self {
            OrderSide::Buy => Side::Long,
            OrderSide::Sell => Side::Short,
        }
    }

    /// The other side
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

// =============================================================================
// Signal / Confidence
// =============================================================================

/// Direction proposed by a scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// Go long
    Buy,
    /// Go short
    Sell,
    /// No opinion
    Hold,
}

impl Signal {
    /// +1 for Buy, -1 for Sell, 0 for Hold
    pub fn sign(&self) -> f64 {
        match self {
            Signal::Buy => 1.0,
            Signal::Sell => -1.0,
            Signal::Hold => 0.0,
        }
    }

    /// Order side for a directional signal
    pub fn order_side(&self) -> Option<OrderSide> {
        match self {
            Signal::Buy => Some(OrderSide::Buy),
            Signal::Sell => Some(OrderSide::Sell),
            Signal::Hold => None,
        }
    }
}

impl From<OrderSide> for Signal {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Signal::Buy,
            OrderSide::Sell => Signal::Sell,
        }
    }
}

/// Confidence in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    /// No confidence at all
    pub const ZERO: Confidence = Confidence(0.0);

    /// Create a confidence value
    ///
    /// # Errors
    /// Returns `DomainError::InvalidConfidence` for NaN or values outside [0, 1]
    pub fn new(value: f64) -> Result<Self, DomainError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(DomainError::InvalidConfidence(format!(
                "Confidence must be within [0, 1], got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Clamp an arbitrary score into [0, 1]; NaN maps to zero.
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Raw value
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Confidence {
    type Error = DomainError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
