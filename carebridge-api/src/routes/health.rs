//! Health endpoints, mounted outside `/api/v1` and never authenticated.
//!
//! Readiness means two things here: the backend answers, and every dependent
//! table routes writes through [`NarrowIdSync`]. A table without the sync hook
//! would accept rows whose narrow id drifts from their wide reference, so the
//! service reports itself unready rather than take such writes.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use carebridge_core::DependentTable;
use carebridge_storage::{HookRegistry, NarrowIdSync, PrePersistHook, ReconcilingStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use utoipa::ToSchema;

#[derive(Clone)]
pub struct HealthState {
    store: ReconcilingStore,
    start_time: Instant,
}

/// Body of `/health/live`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Liveness {
    pub version: String,
    pub uptime_seconds: u64,
}

/// Result of reaching the storage backend.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StorageCheck {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `/health/ready`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Readiness {
    pub ready: bool,
    pub storage: StorageCheck,
    /// Dependent tables missing the narrow-id sync hook.
    pub unsynced_tables: Vec<DependentTable>,
}

/// Tables whose write path would skip narrow-id reconciliation.
pub fn unsynced_tables(hooks: &HookRegistry) -> Vec<DependentTable> {
    let sync = NarrowIdSync.name();
    DependentTable::all()
        .iter()
        .copied()
        .filter(|table| !hooks.hooks_for(*table).iter().any(|h| h.name() == sync))
        .collect()
}

async fn check_storage(store: &ReconcilingStore) -> StorageCheck {
    let started = Instant::now();
    let outcome = store.health_check().await;
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match outcome {
        Ok(true) => StorageCheck {
            reachable: true,
            latency_ms: Some(latency_ms),
            error: None,
        },
        Ok(false) => StorageCheck {
            reachable: false,
            latency_ms: Some(latency_ms),
            error: Some("backend reported unhealthy".to_string()),
        },
        Err(e) => StorageCheck {
            reachable: false,
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

#[utoipa::path(
    get,
    path = "/health/ping",
    tag = "Health",
    responses((status = 200, description = "Service is responding", body = String)),
)]
pub async fn ping() -> &'static str {
    "pong"
}

#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses((status = 200, description = "Process is alive", body = Liveness)),
)]
pub async fn liveness(State(state): State<Arc<HealthState>>) -> Json<Liveness> {
    Json(Liveness {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// 503 when storage is unreachable or any table lacks narrow-id sync.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Ready to take writes", body = Readiness),
        (status = 503, description = "Not ready", body = Readiness),
    ),
)]
pub async fn readiness(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<Readiness>) {
    let storage = check_storage(&state.store).await;
    let unsynced = unsynced_tables(state.store.hooks());
    let ready = storage.reachable && unsynced.is_empty();

    if !ready {
        tracing::warn!(
            storage_error = ?storage.error,
            unsynced = ?unsynced,
            "Readiness check failed"
        );
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(Readiness {
            ready,
            storage,
            unsynced_tables: unsynced,
        }),
    )
}

pub fn create_router(store: ReconcilingStore, start_time: Instant) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
        .with_state(Arc::new(HealthState { store, start_time }))
}
