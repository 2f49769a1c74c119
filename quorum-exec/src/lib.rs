//! Quorum Execution Layer
//!
//! Bracket order lifecycle against a broker gateway.
//!
//! # Architecture
//!
//! ```text
//! TradingIntent → BracketController → GatewayPort → broker
//!                        │                 │
//!                  TradingCore  ◄──── OrderEvent stream
//!          (position, group, lock)
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the order gateway and the feature feed
//! - **State**: Position, bracket group and trading lock behind one mutex
//! - **Controller**: Submission and order-event handling for bracket groups
//! - **Retry**: Backoff for transient gateway failures
//! - **Stub**: Scriptable gateway and feed for tests and development
//!
//! # Example
//!
//! ```rust,ignore
//! use quorum_exec::{BracketController, CoreConfig, StubGateway, TradingCore};
//! use std::sync::Arc;
//!
//! let core = TradingCore::new(CoreConfig::default());
//! let gateway = Arc::new(StubGateway::new());
//! let controller = BracketController::new(core, gateway, instrument, quantity);
//!
//! let group = controller.submit(&intent).await?;
//! ```

#![warn(clippy::all)]

pub mod controller;
pub mod error;
pub mod ports;
pub mod retry;
pub mod state;
pub mod stub;

// Re-exports for convenience
pub use controller::{BracketController, Reprotection};
pub use error::{ExecError, ExecResult};
pub use ports::{
    BracketRequest, BrokerPosition, CancelAck, EntryOrderType, FeatureFeedPort, GatewayPort,
    OpenOrder, OrderEvent, ProtectionRequest,
};
pub use retry::{with_retry, RetryPolicy};
pub use state::{
    CoreConfig, EventEffect, GatewayHealth, RejectReason, StateSnapshot, TradingCore,
    TradingState,
};
pub use stub::{StubFeatureFeed, StubGateway};
