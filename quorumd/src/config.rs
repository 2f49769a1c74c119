//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use quorum_domain::{Instrument, Quantity, TickSize};
use quorum_engine::{ConsensusConfig, TickDistances};
use quorum_exec::CoreConfig;

use crate::error::{DaemonError, DaemonResult};
use crate::reconciler::{ProtectionSettings, ReconcileSettings};

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Order and lock rules
    pub trading: TradingConfig,

    /// Consensus engine configuration
    pub engine: EngineConfig,

    /// Reconciliation loop configuration
    pub reconciler: ReconcilerConfig,

    /// Where the JSON status record is written (None = HTTP only)
    pub status_path: Option<PathBuf>,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Order and lock rules.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// Instrument traded (one position at a time)
    pub instrument: Instrument,
    /// Minimum price increment
    pub tick_size: TickSize,
    /// Contracts per bracket
    pub order_quantity: Quantity,
    /// Minimum lock hold after acquisition
    pub min_hold_secs: u64,
    /// Minimum wait after a group closes
    pub min_cooldown_secs: u64,
    /// Consecutive gateway failures before refusing intents
    pub gateway_failure_limit: u32,
    /// Brackets allowed per UTC day
    pub max_daily_trades: u32,
    /// Simulation mode when false
    pub trading_enabled: bool,
}

/// Consensus engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub require_agreement: bool,
    pub stale_snapshot_limit: usize,
    pub scorer_timeout_ms: u64,
}

/// Reconciliation loop configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Seconds between reconciliation ticks
    pub interval_secs: u64,
    /// Grace beyond `min_hold` before a lock without exposure is released
    pub lock_grace_secs: u64,
    /// Age at which an unfilled entry is cancelled (0 keeps it working)
    pub entry_ttl_secs: u64,
    /// Stop distance in ticks for protection placed by reconciliation
    pub protect_stop_ticks: u32,
    /// Take-profit distance in ticks for protection placed by reconciliation
    pub protect_take_ticks: u32,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;
        let trading = Self::load_trading_config(environment)?;
        let engine = Self::load_engine_config()?;
        let reconciler = Self::load_reconciler_config()?;
        let status_path = env::var("QUORUM_STATUS_PATH").ok().map(PathBuf::from);

        Ok(Self {
            api,
            trading,
            engine,
            reconciler,
            status_path,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            trading: TradingConfig {
                trading_enabled: true,
                ..TradingConfig::default()
            },
            engine: EngineConfig::default(),
            reconciler: ReconcilerConfig {
                interval_secs: 1,
                ..ReconcilerConfig::default()
            },
            status_path: None,
            environment: Environment::Test,
        }
    }

    /// Lock and admission rules for the trading core.
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            min_hold: chrono::Duration::seconds(self.trading.min_hold_secs as i64),
            min_cooldown: chrono::Duration::seconds(self.trading.min_cooldown_secs as i64),
            gateway_failure_limit: self.trading.gateway_failure_limit,
            max_daily_trades: self.trading.max_daily_trades,
            trading_enabled: self.trading.trading_enabled,
        }
    }

    /// Reconciler timing. Local positions get `min_hold` to settle before
    /// a flat broker contradicts them.
    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            interval: Duration::from_secs(self.reconciler.interval_secs),
            lock_grace: chrono::Duration::seconds(self.reconciler.lock_grace_secs as i64),
            settle_window: chrono::Duration::seconds(self.trading.min_hold_secs as i64),
            entry_ttl: (self.reconciler.entry_ttl_secs > 0)
                .then(|| chrono::Duration::seconds(self.reconciler.entry_ttl_secs as i64)),
            protection: ProtectionSettings {
                tick_size: self.trading.tick_size,
                distances: TickDistances::new(
                    self.reconciler.protect_stop_ticks,
                    self.reconciler.protect_take_ticks,
                ),
            },
        }
    }

    /// Consensus configuration; unlisted settings keep their defaults.
    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            buy_threshold: self.engine.buy_threshold,
            sell_threshold: self.engine.sell_threshold,
            require_agreement: self.engine.require_agreement,
            stale_snapshot_limit: self.engine.stale_snapshot_limit,
            scorer_timeout: Duration::from_millis(self.engine.scorer_timeout_ms),
            tick_size: self.trading.tick_size,
            ..ConsensusConfig::default()
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("QUORUM_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid QUORUM_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("QUORUM_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = Self::load_parsed_env("QUORUM_API_PORT", 8080u16)?;

        Ok(ApiConfig { host, port })
    }

    fn load_trading_config(environment: Environment) -> DaemonResult<TradingConfig> {
        let defaults = TradingConfig::default();

        let instrument = match env::var("QUORUM_INSTRUMENT") {
            Ok(code) => Instrument::new(&code)
                .map_err(|e| DaemonError::Config(format!("Invalid QUORUM_INSTRUMENT: {}", e)))?,
            Err(_) => defaults.instrument,
        };

        let tick = Self::load_decimal_env("QUORUM_TICK_SIZE", defaults.tick_size.as_decimal())?;
        let tick_size = TickSize::new(tick)
            .map_err(|e| DaemonError::Config(format!("Invalid QUORUM_TICK_SIZE: {}", e)))?;

        let contracts = Self::load_parsed_env("QUORUM_ORDER_QUANTITY", 1u32)?;
        let order_quantity = Quantity::new(contracts)
            .map_err(|e| DaemonError::Config(format!("Invalid QUORUM_ORDER_QUANTITY: {}", e)))?;

        Ok(TradingConfig {
            instrument,
            tick_size,
            order_quantity,
            min_hold_secs: Self::load_parsed_env("QUORUM_MIN_HOLD_SECS", defaults.min_hold_secs)?,
            min_cooldown_secs: Self::load_parsed_env(
                "QUORUM_MIN_COOLDOWN_SECS",
                defaults.min_cooldown_secs,
            )?,
            gateway_failure_limit: Self::load_parsed_env(
                "QUORUM_GATEWAY_FAILURE_LIMIT",
                defaults.gateway_failure_limit,
            )?,
            max_daily_trades: Self::load_parsed_env(
                "QUORUM_MAX_DAILY_TRADES",
                defaults.max_daily_trades,
            )?,
            // Live orders only in production unless explicitly enabled
            trading_enabled: Self::load_bool_env(
                "QUORUM_TRADING_ENABLED",
                environment == Environment::Production,
            )?,
        })
    }

    fn load_engine_config() -> DaemonResult<EngineConfig> {
        let defaults = EngineConfig::default();

        Ok(EngineConfig {
            buy_threshold: Self::load_parsed_env("QUORUM_BUY_THRESHOLD", defaults.buy_threshold)?,
            sell_threshold: Self::load_parsed_env(
                "QUORUM_SELL_THRESHOLD",
                defaults.sell_threshold,
            )?,
            require_agreement: Self::load_bool_env(
                "QUORUM_REQUIRE_AGREEMENT",
                defaults.require_agreement,
            )?,
            stale_snapshot_limit: Self::load_parsed_env(
                "QUORUM_STALE_SNAPSHOT_LIMIT",
                defaults.stale_snapshot_limit,
            )?,
            scorer_timeout_ms: Self::load_parsed_env(
                "QUORUM_SCORER_TIMEOUT_MS",
                defaults.scorer_timeout_ms,
            )?,
        })
    }

    fn load_reconciler_config() -> DaemonResult<ReconcilerConfig> {
        let defaults = ReconcilerConfig::default();

        let interval_secs =
            Self::load_parsed_env("QUORUM_RECONCILE_INTERVAL_SECS", defaults.interval_secs)?;
        if interval_secs == 0 {
            return Err(DaemonError::Config(
                "QUORUM_RECONCILE_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(ReconcilerConfig {
            interval_secs,
            lock_grace_secs: Self::load_parsed_env(
                "QUORUM_LOCK_GRACE_SECS",
                defaults.lock_grace_secs,
            )?,
            entry_ttl_secs: Self::load_parsed_env(
                "QUORUM_ENTRY_TTL_SECS",
                defaults.entry_ttl_secs,
            )?,
            protect_stop_ticks: Self::load_parsed_env(
                "QUORUM_PROTECT_STOP_TICKS",
                defaults.protect_stop_ticks,
            )?,
            protect_take_ticks: Self::load_parsed_env(
                "QUORUM_PROTECT_TAKE_TICKS",
                defaults.protect_take_ticks,
            )?,
        })
    }

    fn load_decimal_env(key: &str, default: Decimal) -> DaemonResult<Decimal> {
        match env::var(key) {
            Ok(val) => Decimal::from_str(&val)
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }

    fn load_parsed_env<T: FromStr>(key: &str, default: T) -> DaemonResult<T> {
        match env::var(key) {
            Ok(val) => val
                .trim()
                .parse::<T>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }

    fn load_bool_env(key: &str, default: bool) -> DaemonResult<bool> {
        match env::var(key) {
            Ok(val) => parse_bool(&val)
                .ok_or_else(|| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            trading: TradingConfig::default(),
            engine: EngineConfig::default(),
            reconciler: ReconcilerConfig::default(),
            status_path: None,
            environment: Environment::Development,
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            instrument: Instrument::new("WDOFUT").expect("default instrument code is valid"),
            tick_size: TickSize::default(),
            order_quantity: Quantity::new(1).expect("one contract is a valid quantity"),
            min_hold_secs: 30,
            min_cooldown_secs: 60,
            gateway_failure_limit: 3,
            max_daily_trades: 10,
            trading_enabled: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buy_threshold: 0.3,
            sell_threshold: 0.3,
            require_agreement: true,
            stale_snapshot_limit: 5,
            scorer_timeout_ms: 200,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            lock_grace_secs: 30,
            entry_ttl_secs: 300,
            protect_stop_ticks: 10,
            protect_take_ticks: 20,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.port, 8080);
        assert_eq!(config.environment, Environment::Development);
        assert!(!config.trading.trading_enabled);
        assert!(config.status_path.is_none());
    }

    #[test]
    fn test_test_config() {
        let config = Config::test();

        assert_eq!(config.api.port, 0);
        assert_eq!(config.environment, Environment::Test);
        assert!(config.trading.trading_enabled);
    }

    #[test]
    fn test_trading_defaults() {
        let config = Config::default();

        assert_eq!(config.trading.tick_size.as_decimal(), dec!(0.5));
        assert_eq!(config.trading.order_quantity.contracts(), 1);
        assert_eq!(config.trading.min_hold_secs, 30);
        assert_eq!(config.trading.min_cooldown_secs, 60);
        assert_eq!(config.reconciler.interval_secs, 5);
    }

    #[test]
    fn test_core_config_conversion() {
        let core = Config::test().core_config();

        assert_eq!(core.min_hold, chrono::Duration::seconds(30));
        assert_eq!(core.min_cooldown, chrono::Duration::seconds(60));
        assert_eq!(core.gateway_failure_limit, 3);
        assert!(core.trading_enabled);
    }

    #[test]
    fn test_consensus_config_conversion() {
        let consensus = Config::default().consensus_config();

        assert_eq!(consensus.buy_threshold, 0.3);
        assert!(consensus.require_agreement);
        assert_eq!(consensus.scorer_timeout, Duration::from_millis(200));
        assert_eq!(consensus.stale_snapshot_limit, 5);
    }

    #[test]
    fn test_reconcile_settings_conversion() {
        let settings = Config::test().reconcile_settings();

        assert_eq!(settings.interval, Duration::from_secs(1));
        assert_eq!(settings.lock_grace, chrono::Duration::seconds(30));
        assert_eq!(settings.settle_window, chrono::Duration::seconds(30));
        assert_eq!(settings.entry_ttl, Some(chrono::Duration::seconds(300)));
        assert_eq!(settings.protection.distances, TickDistances::new(10, 20));
    }

    #[test]
    fn test_zero_entry_ttl_disables_expiry() {
        let mut config = Config::test();
        config.reconciler.entry_ttl_secs = 0;

        assert_eq!(config.reconcile_settings().entry_ttl, None);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Test.to_string(), "test");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Production.to_string(), "production");
    }
}
