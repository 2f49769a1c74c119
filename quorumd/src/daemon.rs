//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Consensus Engine (feature snapshots → trading intents)
//! - Bracket Controller (intents → bracket groups, order events)
//! - Position Reconciler (periodic drift correction)
//! - Event Bus (internal communication)
//! - Status surface and API Server (HTTP endpoints)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Reconcile once against the broker
//! 4. Start API server and reconciler
//! 5. Main event loop (feature snapshots, broker order events)
//! 6. Graceful shutdown on SIGINT or a Shutdown event
//!
//! Broker orders are left working on shutdown: the stop and take-profit
//! still protect any open position.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use quorum_domain::{BracketGroup, FeatureSnapshot, LockRelease};
use quorum_engine::{
    AgentPanel, ConsensusEngine, Decision, LinearScorer, RegimeTargets, WeightedScorer,
};
use quorum_exec::{
    BracketController, EventEffect, FeatureFeedPort, GatewayPort, OrderEvent, StubFeatureFeed,
    StubGateway, TradingCore,
};

use crate::api::{create_router, ApiState};
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{DaemonEvent, EventBus};
use crate::reconciler::PositionReconciler;
use crate::status::{StatusBoard, StatusWriter};

// =============================================================================
// Daemon
// =============================================================================

/// The main Quorum daemon.
pub struct Daemon {
    /// Configuration
    config: Config,
    /// Consensus engine (owned by the actor loop)
    engine: ConsensusEngine,
    /// Bracket controller
    controller: Arc<BracketController>,
    /// Position reconciler
    reconciler: Arc<PositionReconciler>,
    /// Feature snapshot producer
    feed: Arc<dyn FeatureFeedPort>,
    /// Event bus
    event_bus: Arc<EventBus>,
    /// Status surface
    status: Arc<StatusBoard>,
    shutdown: CancellationToken,
    /// Synthetic market, started once the feed has a subscriber
    synthetic: Option<Arc<StubFeatureFeed>>,
}

impl Daemon {
    /// Create a new daemon with stub components (for testing/development).
    ///
    /// Scorers: a linear statistical stand-in (0.6) and the standard agent
    /// panel (0.4), fed by a synthetic oscillating market.
    pub fn new_stub(config: Config) -> DaemonResult<Self> {
        let gateway = Arc::new(StubGateway::new());
        let feed = Arc::new(StubFeatureFeed::new());
        let scorers = vec![
            WeightedScorer::new(
                Arc::new(LinearScorer::new("linear", vec![0.8, 0.6, 0.4, 0.2], 0.0)),
                0.6,
            ),
            WeightedScorer::new(Arc::new(AgentPanel::standard("agents")), 0.4),
        ];

        let mut daemon = Self::new(config, gateway, feed.clone(), scorers)?;
        daemon.synthetic = Some(feed);
        Ok(daemon)
    }

    /// Create a new daemon with provided components.
    pub fn new(
        config: Config,
        gateway: Arc<dyn GatewayPort>,
        feed: Arc<dyn FeatureFeedPort>,
        scorers: Vec<WeightedScorer>,
    ) -> DaemonResult<Self> {
        let risk = Arc::new(RegimeTargets::new(config.trading.tick_size));
        let engine = ConsensusEngine::new(config.consensus_config(), scorers, risk)?;

        let core = TradingCore::new(config.core_config());
        let instrument = config.trading.instrument.clone();
        let controller = Arc::new(BracketController::new(
            core.clone(),
            gateway,
            instrument.clone(),
            config.trading.order_quantity,
        ));

        let event_bus = Arc::new(EventBus::default());
        let writer = match &config.status_path {
            Some(path) => StatusWriter::new(path.clone()),
            None => StatusWriter::disabled(),
        };
        let status = Arc::new(StatusBoard::new(core, config.environment, instrument, writer));
        let reconciler = Arc::new(PositionReconciler::new(
            controller.clone(),
            event_bus.clone(),
            status.clone(),
            config.reconcile_settings(),
        ));

        Ok(Self {
            config,
            engine,
            controller,
            reconciler,
            feed,
            event_bus,
            status,
            shutdown: CancellationToken::new(),
            synthetic: None,
        })
    }

    /// Bracket controller shared with the reconciler and API.
    pub fn controller(&self) -> &Arc<BracketController> {
        &self.controller
    }

    /// Background reconciler.
    pub fn reconciler(&self) -> &Arc<PositionReconciler> {
        &self.reconciler
    }

    /// Status surface.
    pub fn status(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    /// Bus carrying daemon events; publish `Shutdown` to stop the loop.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Token that stops `run` when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT, Shutdown
    /// event, or the shutdown token).
    pub async fn run(mut self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            instrument = %self.config.trading.instrument.as_str(),
            trading_enabled = self.config.trading.trading_enabled,
            "Starting Quorum daemon"
        );

        // 1. Align with the broker before accepting intents
        self.restore_from_broker().await;

        // 2. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 3. Subscribe to broker events and feature snapshots
        let mut order_events = self.controller.gateway().subscribe_events().await?;
        let mut snapshots = self.feed.subscribe().await?;
        if let Some(feed) = &self.synthetic {
            feed.spawn_synthetic(
                Duration::from_secs(1),
                dec!(5000),
                self.config.trading.tick_size.as_decimal(),
            );
        }

        // 4. Start reconciler
        let reconciler_handle = self.reconciler.clone().start(self.shutdown.child_token());

        let mut event_receiver = self.event_bus.subscribe();
        let shutdown = self.shutdown.clone();
        let mut events_open = true;
        let mut snapshots_open = true;

        // 5. Main event loop
        info!("Entering main event loop");
        loop {
            tokio::select! {
                event = order_events.recv(), if events_open => match event {
                    Some(event) => {
                        self.handle_order_event(event).await;
                    }
                    None => {
                        warn!("Gateway event stream closed, relying on reconciliation");
                        events_open = false;
                    }
                },

                snapshot = snapshots.recv(), if snapshots_open => match snapshot {
                    Some(snapshot) => {
                        self.handle_snapshot(snapshot).await;
                    }
                    None => {
                        warn!("Feature feed closed, no further intents");
                        snapshots_open = false;
                    }
                },

                Some(event_result) = event_receiver.recv() => {
                    match event_result {
                        Ok(DaemonEvent::Shutdown) => {
                            info!("Shutdown event received");
                            break;
                        }
                        Ok(event) => debug!(?event, "Daemon event"),
                        Err(lag_msg) => warn!(%lag_msg, "Event receiver lagged"),
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        // 6. Graceful shutdown
        self.shutdown(reconciler_handle).await
    }

    /// One reconciliation before the loop starts, adopting whatever the
    /// broker already holds.
    async fn restore_from_broker(&self) {
        match self.reconciler.reconcile().await {
            Ok(report) if report.is_consistent() => info!("Broker state matches, nothing to restore"),
            Ok(report) => info!(
                violations = report.violations.len(),
                "Startup reconciliation corrected state"
            ),
            Err(e) => warn!(error = %e, "Startup reconciliation failed, will retry on schedule"),
        }
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            status: self.status.clone(),
            reconciler: self.reconciler.clone(),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {}", e)))?;

        // Spawn the server task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }

    /// Apply one broker order event.
    pub async fn handle_order_event(&self, event: OrderEvent) -> EventEffect {
        let effect = self.controller.on_order_event(&event).await;

        let released = match &effect {
            EventEffect::Ignored | EventEffect::Buffered | EventEffect::Duplicate => return effect,
            EventEffect::EntryFailed { release, .. } | EventEffect::ExitFilled { release, .. } => {
                *release == LockRelease::Released
            }
            EventEffect::EntryFilled { .. } | EventEffect::ProtectionLost { .. } => false,
        };

        self.event_bus.send(DaemonEvent::OrderUpdate(event));
        if released {
            self.event_bus.send(DaemonEvent::LockReleased {
                timestamp: Utc::now(),
            });
        }
        self.status.publish().await;

        effect
    }

    /// Run one decision cycle and submit the resulting intent, if any.
    ///
    /// Returns the bracket group when one was submitted.
    pub async fn handle_snapshot(&mut self, snapshot: FeatureSnapshot) -> Option<BracketGroup> {
        let outcome = self.engine.evaluate(&snapshot).await;

        if let Some(warning) = &outcome.warning {
            warn!(
                repeated = warning.repeated,
                last_price = %warning.last_price,
                "Feature prices frozen"
            );
            self.event_bus
                .send(DaemonEvent::StaticFeatureWarning(warning.clone()));
        }

        let skip = outcome.skip_reason().map(|reason| format!("{:?}", reason));
        self.status
            .record_decision(self.engine.stats().clone(), skip, outcome.warning.clone())
            .await;

        let submitted = match outcome.decision {
            Decision::Skip(_) => None,
            Decision::Emit(intent) => {
                self.event_bus.send(DaemonEvent::IntentEmitted(intent.clone()));

                match self.controller.submit(&intent).await {
                    Ok(group) => {
                        self.event_bus.send(DaemonEvent::BracketSubmitted {
                            group_id: group.group_id(),
                            timestamp: Utc::now(),
                        });
                        Some(group)
                    }
                    Err(reason) => {
                        self.event_bus.send(DaemonEvent::IntentRejected {
                            reason,
                            timestamp: Utc::now(),
                        });
                        None
                    }
                }
            }
        };

        self.status.publish().await;
        submitted
    }

    /// Graceful shutdown.
    async fn shutdown(&self, reconciler: JoinHandle<()>) -> DaemonResult<()> {
        info!("Initiating graceful shutdown");

        self.event_bus.send(DaemonEvent::Shutdown);
        self.shutdown.cancel();
        if let Err(e) = reconciler.await {
            error!(error = %e, "Reconciler task failed");
        }

        self.status.publish().await;
        let snapshot = self.controller.core().snapshot().await;
        info!(
            position_open = snapshot.position.is_open(),
            lock_held = snapshot.lock_held,
            "Shutdown complete, broker orders left working"
        );

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_domain::{OrderStatus, Price, Regime};
    use quorum_exec::RejectReason;

    fn snapshot(features: Vec<f64>, last: rust_decimal::Decimal, offset_ms: i64) -> FeatureSnapshot {
        let price = Price::new(last).unwrap();
        FeatureSnapshot {
            timestamp: Utc::now() + chrono::Duration::milliseconds(offset_ms),
            features,
            best_bid: Price::new(last - dec!(0.5)).unwrap(),
            best_ask: price,
            last_price: price,
            regime: Regime::Undefined,
        }
    }

    fn bullish(offset_ms: i64) -> FeatureSnapshot {
        snapshot(vec![2.0, 2.0, 2.0, 2.0], dec!(5000), offset_ms)
    }

    fn scorers() -> Vec<WeightedScorer> {
        vec![
            WeightedScorer::new(Arc::new(LinearScorer::new("linear", vec![1.0], 0.0)), 0.6),
            WeightedScorer::new(Arc::new(AgentPanel::standard("agents")), 0.4),
        ]
    }

    fn daemon_with(gateway: Arc<StubGateway>) -> Daemon {
        Daemon::new(
            Config::test(),
            gateway,
            Arc::new(StubFeatureFeed::new()),
            scorers(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let daemon = Daemon::new_stub(Config::test()).unwrap();

        let snapshot = daemon.controller().core().snapshot().await;
        assert!(snapshot.position.is_flat());
        assert!(!snapshot.lock_held);
    }

    #[tokio::test]
    async fn test_daemon_rejects_bad_weights() {
        let scorers = vec![
            WeightedScorer::new(Arc::new(LinearScorer::new("linear", vec![1.0], 0.0)), 0.7),
            WeightedScorer::new(Arc::new(AgentPanel::standard("agents")), 0.4),
        ];

        let result = Daemon::new(
            Config::test(),
            Arc::new(StubGateway::new()),
            Arc::new(StubFeatureFeed::new()),
            scorers,
        );
        assert!(matches!(result, Err(DaemonError::Engine(_))));
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let daemon = Daemon::new_stub(Config::test()).unwrap();

        let addr = daemon.start_api_server().await.unwrap();

        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_snapshot_submits_one_bracket() {
        let gateway = Arc::new(StubGateway::new());
        let mut daemon = daemon_with(gateway.clone());
        let mut events = daemon.event_bus().subscribe();

        let group = daemon.handle_snapshot(bullish(0)).await.unwrap();
        let second = daemon.handle_snapshot(bullish(100)).await;

        assert!(second.is_none());
        assert_eq!(gateway.submit_count(), 1);
        assert_eq!(daemon.engine.stats().emitted, 2);

        assert!(matches!(events.try_recv(), Some(Ok(DaemonEvent::IntentEmitted(_)))));
        match events.try_recv() {
            Some(Ok(DaemonEvent::BracketSubmitted { group_id, .. })) => {
                assert_eq!(group_id, group.group_id())
            }
            other => panic!("Expected BracketSubmitted, got {:?}", other),
        }
        assert!(matches!(events.try_recv(), Some(Ok(DaemonEvent::IntentEmitted(_)))));
        assert!(matches!(
            events.try_recv(),
            Some(Ok(DaemonEvent::IntentRejected {
                reason: RejectReason::LockHeld,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_neutral_snapshot_records_skip() {
        let mut daemon = daemon_with(Arc::new(StubGateway::new()));

        let submitted = daemon
            .handle_snapshot(snapshot(vec![0.0, 0.0, 0.0, 0.0], dec!(5000), 0))
            .await;

        assert!(submitted.is_none());
        let record = daemon.status().record().await;
        assert_eq!(record.decisions.evaluated, 1);
        assert!(record.last_skip.is_some());
    }

    #[tokio::test]
    async fn test_entry_fill_opens_position() {
        let gateway = Arc::new(StubGateway::new());
        let mut daemon = daemon_with(gateway.clone());

        let group = daemon.handle_snapshot(bullish(0)).await.unwrap();
        let event = gateway
            .fill_order(group.entry_order_id(), Price::new(dec!(5000)).unwrap())
            .unwrap();
        let effect = daemon.handle_order_event(event).await;

        assert_eq!(effect, EventEffect::EntryFilled { group_id: group.group_id() });
        let snapshot = daemon.controller().core().snapshot().await;
        assert!(snapshot.position.is_open());
        assert!(snapshot.lock_held);
    }

    #[tokio::test]
    async fn test_unknown_order_event_ignored() {
        let daemon = daemon_with(Arc::new(StubGateway::new()));
        let mut events = daemon.event_bus().subscribe();

        let effect = daemon
            .handle_order_event(OrderEvent::terminal("X-99", OrderStatus::Cancelled, Utc::now()))
            .await;

        assert_eq!(effect, EventEffect::Ignored);
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_token() {
        let daemon = daemon_with(Arc::new(StubGateway::new()));
        let token = daemon.shutdown_token();
        let mut events = daemon.event_bus().subscribe();

        let handle = tokio::spawn(daemon.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());

        // Subscribers are told the daemon is going away
        let mut announced = false;
        while let Some(event) = events.try_recv() {
            announced |= matches!(event, Ok(DaemonEvent::Shutdown));
        }
        assert!(announced);
    }

    #[tokio::test]
    async fn test_run_stops_on_bus_shutdown() {
        let daemon = daemon_with(Arc::new(StubGateway::new()));
        let bus = daemon.event_bus().clone();

        let handle = tokio::spawn(daemon.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.send(DaemonEvent::Shutdown);

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
