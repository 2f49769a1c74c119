//! Quorum Daemon
//!
//! Runtime orchestrator for consensus, bracket execution and reconciliation.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration (trading disabled outside production)
//! cargo run -p quorumd
//!
//! # Start with custom environment
//! QUORUM_ENV=test QUORUM_API_PORT=8081 QUORUM_TRADING_ENABLED=true cargo run -p quorumd
//! ```
//!
//! # Environment Variables
//!
//! - `QUORUM_ENV`: Environment (test, development, production)
//! - `QUORUM_API_HOST` / `QUORUM_API_PORT`: API bind address (default: 0.0.0.0:8080)
//! - `QUORUM_INSTRUMENT`: Traded instrument (default: WDOFUT)
//! - `QUORUM_MIN_HOLD_SECS` / `QUORUM_MIN_COOLDOWN_SECS`: Lock timing (default: 30 / 60)
//! - `QUORUM_RECONCILE_INTERVAL_SECS`: Reconciliation interval (default: 5)
//! - `QUORUM_STATUS_PATH`: Status JSON file (disabled when unset)
//! - `QUORUM_LOG_FORMAT`: `json` for JSON log lines

use quorumd::{Config, Daemon};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive("quorumd=info".parse()?);
    let json = std::env::var("QUORUM_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        instrument = %config.trading.instrument,
        "Quorum Daemon"
    );

    // Create and run daemon
    let daemon = Daemon::new_stub(config)?;
    daemon.run().await?;

    Ok(())
}
