//! HTTP API for the Quorum daemon.
//!
//! Provides REST endpoints for:
//! - Health check (gateway availability)
//! - Status (the same record as the status file)
//! - Reconcile (run one reconciliation tick now)

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::reconciler::{PositionReconciler, ReconcileReport};
use crate::status::{StatusBoard, StatusRecord};

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState {
    pub status: Arc<StatusBoard>,
    pub reconciler: Arc<PositionReconciler>,
}

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub gateway_available: bool,
    pub lock_held: bool,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/reconcile", post(reconcile_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint. 503 while the gateway is marked unavailable.
async fn health_handler(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<HealthResponse>) {
    let record = state.status.record().await;
    let gateway_available = !record.state.gateway.unavailable;

    let (code, status) = if gateway_available {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            gateway_available,
            lock_held: record.state.lock_held,
        }),
    )
}

/// Current status record.
async fn status_handler(State(state): State<Arc<ApiState>>) -> Json<StatusRecord> {
    Json(state.status.record().await)
}

/// Run one reconciliation tick immediately.
async fn reconcile_handler(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ReconcileReport>, (StatusCode, Json<ErrorResponse>)> {
    state.reconciler.reconcile().await.map(Json).map_err(|e| {
        (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })
}

// =============================================================================
// Tests
// =============================================================================
