//! Dependent Record REST API Routes
//!
//! One generic resource for every dependent table. Writes go through the
//! reconciling store, so the stored narrow id always matches the wide
//! reference that was written.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use carebridge_core::{parse_wide_id, CareError, DependentRow, WideId};
use carebridge_storage::ReconcilingStore;
use std::sync::Arc;

use crate::{
    config::ApiConfig,
    error::{ApiError, ApiResult},
    events::WsEvent,
    middleware::AuthExtractor,
    routes::{parse_table_path, parse_wide_path},
    state::AppState,
    types::{CreateRecordRequest, ListParams, UpdateRecordRequest},
    ws::WsState,
};

/// Reject a reference to a patient that does not exist.
async fn ensure_patient_exists(store: &ReconcilingStore, patient_id: WideId) -> ApiResult<()> {
    if store.patient_get(patient_id).await?.is_none() {
        return Err(ApiError::invalid_input(format!(
            "Referenced patient {} does not exist",
            patient_id
        ))
        .with_details(serde_json::json!({ "field": "patient_id" })));
    }
    Ok(())
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/records/{table} - Insert a dependent record
#[utoipa::path(
    post,
    path = "/api/v1/records/{table}",
    tag = "Records",
    params(
        ("table" = String, Path, description = "Dependent table name, e.g. lab_results")
    ),
    request_body = CreateRecordRequest,
    responses(
        (status = 201, description = "Record stored with its narrow id", body = DependentRow),
        (status = 400, description = "Malformed id or unknown patient", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown table", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_record(
    State(store): State<ReconcilingStore>,
    State(ws): State<Arc<WsState>>,
    AuthExtractor(auth): AuthExtractor,
    Path(table): Path<String>,
    Json(req): Json<CreateRecordRequest>,
) -> ApiResult<impl IntoResponse> {
    let table = parse_table_path(&table)?;
    let patient_id = req
        .patient_id
        .as_deref()
        .map(parse_wide_id)
        .transpose()
        .map_err(CareError::from)?;

    if let Some(patient_id) = patient_id {
        ensure_patient_exists(&store, patient_id).await?;
    }

    let record = store
        .insert_dependent(DependentRow::new(table, patient_id, req.payload))
        .await?;
    tracing::info!(
        table = %table,
        record_id = %record.record_id,
        narrow_id = ?record.patient_narrow_id,
        created_by = %auth.subject,
        "Record created"
    );

    ws.broadcast(WsEvent::RecordCreated {
        record: record.clone(),
    });

    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/v1/records/{table} - List rows of a dependent table
#[utoipa::path(
    get,
    path = "/api/v1/records/{table}",
    tag = "Records",
    params(
        ("table" = String, Path, description = "Dependent table name"),
        ListParams
    ),
    responses(
        (status = 200, description = "Page of rows", body = Vec<DependentRow>),
        (status = 400, description = "Invalid paging parameters", body = ApiError),
        (status = 404, description = "Unknown table", body = ApiError),
    ),
)]
pub async fn list_records(
    State(store): State<ReconcilingStore>,
    State(config): State<Arc<ApiConfig>>,
    Path(table): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<DependentRow>>> {
    let table = parse_table_path(&table)?;
    let (limit, offset) = params.resolve(config.max_page_size)?;
    Ok(Json(store.dependent_list(table, limit, offset).await?))
}

/// GET /api/v1/records/{table}/{id} - Get one row
#[utoipa::path(
    get,
    path = "/api/v1/records/{table}/{id}",
    tag = "Records",
    params(
        ("table" = String, Path, description = "Dependent table name"),
        ("id" = String, Path, description = "Record wide id")
    ),
    responses(
        (status = 200, description = "Row details", body = DependentRow),
        (status = 400, description = "Malformed id", body = ApiError),
        (status = 404, description = "Unknown table or record", body = ApiError),
    ),
)]
pub async fn get_record(
    State(store): State<ReconcilingStore>,
    Path((table, id)): Path<(String, String)>,
) -> ApiResult<Json<DependentRow>> {
    let table = parse_table_path(&table)?;
    let record_id = parse_wide_path(&id)?;
    let record = store
        .dependent_get(table, record_id)
        .await?
        .ok_or_else(|| ApiError::record_not_found(table, record_id))?;
    Ok(Json(record))
}

/// PATCH /api/v1/records/{table}/{id} - Update a row
///
/// A `patient_id` in the body re-derives the narrow id. `"patient_id": null`
/// clears the reference and leaves the narrow id as it was.
#[utoipa::path(
    patch,
    path = "/api/v1/records/{table}/{id}",
    tag = "Records",
    params(
        ("table" = String, Path, description = "Dependent table name"),
        ("id" = String, Path, description = "Record wide id")
    ),
    request_body = UpdateRecordRequest,
    responses(
        (status = 200, description = "Row after the update", body = DependentRow),
        (status = 400, description = "Malformed id, unknown patient or empty patch", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown table or record", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_record(
    State(store): State<ReconcilingStore>,
    State(ws): State<Arc<WsState>>,
    AuthExtractor(auth): AuthExtractor,
    Path((table, id)): Path<(String, String)>,
    Json(req): Json<UpdateRecordRequest>,
) -> ApiResult<Json<DependentRow>> {
    let table = parse_table_path(&table)?;
    let record_id = parse_wide_path(&id)?;
    let patch = req.into_patch()?;

    if patch.is_empty() {
        return Err(ApiError::invalid_input(
            "At least one of patient_id or payload must be provided",
        ));
    }
    if let Some(Some(patient_id)) = patch.patient_id {
        ensure_patient_exists(&store, patient_id).await?;
    }

    let record = store.update_dependent(table, record_id, patch).await?;
    tracing::info!(
        table = %table,
        record_id = %record.record_id,
        narrow_id = ?record.patient_narrow_id,
        updated_by = %auth.subject,
        "Record updated"
    );

    ws.broadcast(WsEvent::RecordUpdated {
        record: record.clone(),
    });

    Ok(Json(record))
}

pub fn create_router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/:table", axum::routing::post(create_record))
        .route("/:table", axum::routing::get(list_records))
        .route("/:table/:id", axum::routing::get(get_record))
        .route("/:table/:id", axum::routing::patch(update_record))
}
