//! Admin REST API Routes
//!
//! Manual backfill of narrow-id caches. Requires the `admin` role.

use axum::{
    extract::{Path, State},
    Json,
};
use carebridge_core::ReconcileConfig;
use carebridge_storage::{BackfillReport, ReconcilingStore};
use std::sync::Arc;

use crate::{
    auth::ADMIN_ROLE,
    error::{ApiError, ApiResult},
    events::WsEvent,
    middleware::AuthExtractor,
    routes::parse_table_path,
    state::AppState,
    telemetry::METRICS,
    types::BackfillResponse,
    ws::WsState,
};

fn publish(ws: &WsState, report: &BackfillReport) -> BackfillResponse {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_backfill(report);
    }
    let response = BackfillResponse::from(report);
    ws.broadcast(WsEvent::BackfillCompleted { report: response });
    response
}

/// POST /api/v1/admin/backfill/{table} - Recompute narrow ids for one table
#[utoipa::path(
    post,
    path = "/api/v1/admin/backfill/{table}",
    tag = "Admin",
    params(
        ("table" = String, Path, description = "Dependent table name")
    ),
    responses(
        (status = 200, description = "Backfill finished", body = BackfillResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Caller lacks the admin role", body = ApiError),
        (status = 404, description = "Unknown table", body = ApiError),
        (status = 500, description = "Backfill stopped part-way", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn backfill_table(
    State(store): State<ReconcilingStore>,
    State(ws): State<Arc<WsState>>,
    State(config): State<Arc<ReconcileConfig>>,
    AuthExtractor(auth): AuthExtractor,
    Path(table): Path<String>,
) -> ApiResult<Json<BackfillResponse>> {
    auth.require_role(ADMIN_ROLE)?;
    let table = parse_table_path(&table)?;

    tracing::info!(table = %table, requested_by = %auth.subject, "Backfill requested");
    let report = store.backfill(table, &config).await?;
    Ok(Json(publish(&ws, &report)))
}

/// POST /api/v1/admin/backfill/all - Recompute narrow ids for every table
#[utoipa::path(
    post,
    path = "/api/v1/admin/backfill/all",
    tag = "Admin",
    responses(
        (status = 200, description = "One report per table", body = Vec<BackfillResponse>),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Caller lacks the admin role", body = ApiError),
        (status = 500, description = "Backfill stopped part-way", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn backfill_all(
    State(store): State<ReconcilingStore>,
    State(ws): State<Arc<WsState>>,
    State(config): State<Arc<ReconcileConfig>>,
    AuthExtractor(auth): AuthExtractor,
) -> ApiResult<Json<Vec<BackfillResponse>>> {
    auth.require_role(ADMIN_ROLE)?;

    tracing::info!(requested_by = %auth.subject, "Backfill of all tables requested");
    let reports = store.backfill_all(&config).await?;
    Ok(Json(reports.iter().map(|r| publish(&ws, r)).collect()))
}

pub fn create_router() -> axum::Router<AppState> {
    // The literal segment wins over the capture in axum's router.
    axum::Router::new()
        .route("/backfill/all", axum::routing::post(backfill_all))
        .route("/backfill/:table", axum::routing::post(backfill_table))
}
