//! Shared application state for Axum routers.

use std::sync::Arc;

use carebridge_core::ReconcileConfig;
use carebridge_storage::{AsyncStorageTrait, HookRegistry, ReconcilingStore};

use crate::config::ApiConfig;
use crate::telemetry::SyncMetricsHook;
use crate::ws::WsState;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Write-path-reconciling view of the storage backend. Every handler
    /// goes through this, never through the backend directly.
    pub store: ReconcilingStore,
    pub ws: Arc<WsState>,
    pub reconcile: Arc<ReconcileConfig>,
    pub api_config: Arc<ApiConfig>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wrap `backend` with the narrow-id sync hook followed by the sync
    /// metrics hook on every dependent table.
    pub fn new(
        backend: Arc<dyn AsyncStorageTrait>,
        ws: Arc<WsState>,
        reconcile: ReconcileConfig,
        api_config: ApiConfig,
    ) -> Self {
        let mut hooks = HookRegistry::with_narrow_id_sync();
        hooks.register_all(Arc::new(SyncMetricsHook));

        Self {
            store: ReconcilingStore::new(backend, hooks),
            ws,
            reconcile: Arc::new(reconcile),
            api_config: Arc::new(api_config),
            start_time: std::time::Instant::now(),
        }
    }
}

crate::impl_from_ref!(ReconcilingStore, store);
crate::impl_from_ref!(Arc<WsState>, ws);
crate::impl_from_ref!(Arc<ReconcileConfig>, reconcile);
crate::impl_from_ref!(Arc<ApiConfig>, api_config);
crate::impl_from_ref!(std::time::Instant, start_time);

#[cfg(test)]
mod tests {
    use super::*;
    use carebridge_core::DependentTable;
    use carebridge_storage::MockStorage;

    #[test]
    fn test_every_table_gets_sync_then_metrics() {
        let state = AppState::new(
            Arc::new(MockStorage::new()),
            Arc::new(WsState::new(4)),
            ReconcileConfig::default(),
            ApiConfig::default(),
        );
        for table in DependentTable::all() {
            let names: Vec<_> = state
                .store
                .hooks()
                .hooks_for(*table)
                .iter()
                .map(|h| h.name())
                .collect();
            assert_eq!(names, vec!["narrow_id_sync", "sync_metrics"]);
        }
    }
}
