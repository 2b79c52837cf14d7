//! Compatibility REST API Routes
//!
//! Read-only patient view keyed by narrow id, for legacy consumers that
//! cannot handle UUIDs. Mirrors the `patients_compat` SQL view.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use carebridge_core::{NarrowId, PatientCompatView};
use carebridge_storage::ReconcilingStore;
use std::sync::Arc;

use crate::{
    config::ApiConfig,
    error::{ApiError, ApiResult},
    state::AppState,
    types::ListParams,
};

/// GET /api/v1/compat/patients - Patients under their narrow ids
#[utoipa::path(
    get,
    path = "/api/v1/compat/patients",
    tag = "Compatibility",
    params(ListParams),
    responses(
        (status = 200, description = "Page of the compatibility view", body = Vec<PatientCompatView>),
        (status = 400, description = "Invalid paging parameters", body = ApiError),
    ),
)]
pub async fn list_compat_patients(
    State(store): State<ReconcilingStore>,
    State(config): State<Arc<ApiConfig>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<PatientCompatView>>> {
    let (limit, offset) = params.resolve(config.max_page_size)?;
    Ok(Json(store.patient_compat_list(limit, offset).await?))
}

/// GET /api/v1/compat/patients/{narrow_id} - Look a patient up by narrow id
///
/// When several patients share the narrow id, the oldest one is returned.
#[utoipa::path(
    get,
    path = "/api/v1/compat/patients/{narrow_id}",
    tag = "Compatibility",
    params(
        ("narrow_id" = i32, Path, description = "Narrow id (signed 32-bit)")
    ),
    responses(
        (status = 200, description = "Compatibility row", body = PatientCompatView),
        (status = 400, description = "Not a 32-bit integer", body = ApiError),
        (status = 404, description = "No patient with that narrow id", body = ApiError),
    ),
)]
pub async fn get_compat_patient(
    State(store): State<ReconcilingStore>,
    Path(narrow_id): Path<String>,
) -> ApiResult<Json<PatientCompatView>> {
    let narrow: NarrowId = narrow_id
        .trim()
        .parse()
        .map_err(|_| ApiError::invalid_format("narrow_id", "signed 32-bit integer"))?;

    let view = store
        .patient_compat_get(narrow)
        .await?
        .ok_or_else(|| ApiError::patient_not_found(narrow))?;
    Ok(Json(view))
}

pub fn create_router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/patients", axum::routing::get(list_compat_patients))
        .route("/patients/:narrow_id", axum::routing::get(get_compat_patient))
}
