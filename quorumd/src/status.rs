//! Status surface for external dashboards.
//!
//! One JSON record with the trading state, decision counters and the last
//! reconciliation outcome. It is rewritten atomically (tmp file + rename)
//! on every reconciliation tick and every observed state change, and the
//! same record is served by the HTTP API.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use quorum_domain::Instrument;
use quorum_engine::{ConsensusStats, StaticFeatureWarning};
use quorum_exec::{StateSnapshot, TradingCore};

use crate::config::Environment;
use crate::error::{DaemonError, DaemonResult};
use crate::reconciler::ReconcileReport;

/// The published status record.
#[derive(Debug, Clone, Serialize)]
pub struct StatusRecord {
    pub updated_at: DateTime<Utc>,
    pub version: &'static str,
    pub environment: String,
    pub instrument: String,
    /// Gateway reachable and trading lock consistent with exposure
    pub healthy: bool,
    pub state: StateSnapshot,
    pub decisions: ConsensusStats,
    pub last_skip: Option<String>,
    pub last_warning: Option<StaticFeatureWarning>,
    pub last_reconcile: Option<ReconcileReport>,
}

// =============================================================================
// Status file writer
// =============================================================================

/// Writes the status record to disk. Disabled when no path is configured.
#[derive(Debug, Clone)]
pub struct StatusWriter {
    path: Option<PathBuf>,
}

impl StatusWriter {
    /// Writer replacing the file at `path` on every publish.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Writer that never touches the filesystem.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Target file, or None when disabled.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the status file with `record`.
    ///
    /// Readers never observe a partial file: the record goes to a sibling
    /// `.tmp` file first and is then renamed into place.
    pub async fn write(&self, record: &StatusRecord) -> DaemonResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| DaemonError::Status(format!("serialize: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DaemonError::Status(format!("create {}: {}", parent.display(), e)))?;
        }

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| DaemonError::Status(format!("write {}: {}", tmp_path.display(), e)))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| DaemonError::Status(format!("rename {}: {}", path.display(), e)))?;

        debug!(path = %path.display(), "Status written");
        Ok(())
    }
}

// =============================================================================
// Status board
// =============================================================================

#[derive(Debug, Default)]
struct BoardParts {
    decisions: ConsensusStats,
    last_skip: Option<String>,
    last_warning: Option<StaticFeatureWarning>,
    last_reconcile: Option<ReconcileReport>,
}

/// Collects the pieces of the status record from the daemon and reconciler.
pub struct StatusBoard {
    core: TradingCore,
    environment: Environment,
    instrument: Instrument,
    writer: StatusWriter,
    parts: RwLock<BoardParts>,
}

impl StatusBoard {
    /// Board over `core` for one instrument.
    pub fn new(
        core: TradingCore,
        environment: Environment,
        instrument: Instrument,
        writer: StatusWriter,
    ) -> Self {
        Self {
            core,
            environment,
            instrument,
            writer,
            parts: RwLock::new(BoardParts::default()),
        }
    }

    /// Where published records go.
    pub fn writer(&self) -> &StatusWriter {
        &self.writer
    }

    /// Store the latest decision counters.
    pub async fn record_decision(
        &self,
        stats: ConsensusStats,
        skip: Option<String>,
        warning: Option<StaticFeatureWarning>,
    ) {
        let mut parts = self.parts.write().await;
        parts.decisions = stats;
        if skip.is_some() {
            parts.last_skip = skip;
        }
        if warning.is_some() {
            parts.last_warning = warning;
        }
    }

    /// Keep `report` as the latest reconciliation result.
    pub async fn record_reconcile(&self, report: ReconcileReport) {
        self.parts.write().await.last_reconcile = Some(report);
    }

    /// Latest reconciliation result, if any tick ran.
    pub async fn last_reconcile(&self) -> Option<ReconcileReport> {
        self.parts.read().await.last_reconcile.clone()
    }

    /// Assemble the current record.
    pub async fn record(&self) -> StatusRecord {
        let state = self.core.snapshot().await;
        let parts = self.parts.read().await;

        StatusRecord {
            updated_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
            environment: self.environment.to_string(),
            instrument: self.instrument.as_str().to_string(),
            healthy: !state.gateway.unavailable && state.lock_consistent(),
            state,
            decisions: parts.decisions.clone(),
            last_skip: parts.last_skip.clone(),
            last_warning: parts.last_warning.clone(),
            last_reconcile: parts.last_reconcile.clone(),
        }
    }

    /// Write the current record. Failures are logged, never propagated.
    pub async fn publish(&self) {
        let record = self.record().await;
        if let Err(e) = self.writer.write(&record).await {
            warn!(error = %e, "Failed to write status file");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
