//! CareBridge API Server Entry Point
//!
//! Bootstraps configuration, applies pending migrations and starts the Axum
//! HTTP server.

use std::sync::Arc;

use axum::Router;
use carebridge_api::telemetry::{init_tracing, TelemetryConfig};
use carebridge_api::{
    create_api_router, ApiConfig, ApiError, ApiResult, AuthConfig, DbClient, DbConfig, WsState,
};
use carebridge_core::ReconcileConfig;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::for_service("carebridge-api"))?;

    let db_config = DbConfig::from_env();
    let db = DbClient::from_config(&db_config)?;
    let applied = db.run_migrations().await?;
    if !applied.is_empty() {
        tracing::info!(versions = ?applied, "Applied migrations");
    }

    let api_config = ApiConfig::from_env()?;
    let auth_config = AuthConfig::from_env();
    let reconcile = ReconcileConfig::from_env();

    let ws = Arc::new(WsState::new(api_config.ws_capacity));
    let app: Router = create_api_router(Arc::new(db), ws, &api_config, auth_config, reconcile)?;

    let addr = api_config.bind_addr()?;
    tracing::info!(%addr, "Starting CareBridge API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
