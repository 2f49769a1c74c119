//! Quorum Daemon Library
//!
//! Runtime orchestrator for the Quorum trading core.
//!
//! # Architecture
//!
//! ```text
//! Feature Feed → Consensus Engine → Bracket Controller → Gateway
//!                                         │                 │
//!                                   Trading Core ◄── order events
//!                                         ▲
//!                          Position Reconciler (Safety Net)
//!                                         │
//!                         Event Bus, Status file, HTTP API
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator (single actor loop)
//! - **Position Reconciler**: Periodic drift correction against the broker
//! - **Status**: JSON status file and the record served over HTTP
//! - **Event Bus**: Internal notifications (intents, order updates, violations)
//! - **API**: Health, status and on-demand reconciliation endpoints
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use quorumd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_stub(config).expect("Failed to build daemon");
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod reconciler;
pub mod status;

// Re-exports for convenience
pub use config::{
    ApiConfig, Config, EngineConfig, Environment, ReconcilerConfig, TradingConfig,
};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{DaemonEvent, EventBus, EventReceiver};
pub use reconciler::{
    plan, BrokerView, ConsistencyViolation, Correction, Plan, PositionReconciler,
    ProtectionSettings, ReconcileError, ReconcileOutcome, ReconcileReport, ReconcileSettings,
};
pub use status::{StatusBoard, StatusRecord, StatusWriter};
