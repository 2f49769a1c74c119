//! Quorum Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains value objects, entities and the global trading lock.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod lock;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    BracketGroup, BracketLeg, BracketOrderIds, BracketStatus, CloseReason, ExitOrderIds,
    ExitPrices, FeatureSnapshot, GroupId, OrderStatus, PositionState, Regime, ScorerOutput,
    TradingIntent,
};
pub use lock::{GlobalTradingLock, LockRelease};
pub use value_objects::{
    Confidence, DomainError, Instrument, OrderSide, Price, Quantity, Side, Signal, TickSize,
};
