//! Patient REST API Routes
//!
//! Patients are created here and get their wide id from storage. Reads are
//! open; creation needs a bearer token.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use carebridge_core::{DependentRow, NewPatient, Patient};
use carebridge_storage::ReconcilingStore;
use std::sync::Arc;

use crate::{
    config::ApiConfig,
    error::{ApiError, ApiResult},
    events::WsEvent,
    middleware::AuthExtractor,
    routes::{parse_table_path, parse_wide_path},
    state::AppState,
    types::ListParams,
    ws::WsState,
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/patients - Register a patient
#[utoipa::path(
    post,
    path = "/api/v1/patients",
    tag = "Patients",
    request_body = NewPatient,
    responses(
        (status = 201, description = "Patient created", body = Patient),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_patient(
    State(store): State<ReconcilingStore>,
    State(ws): State<Arc<WsState>>,
    AuthExtractor(auth): AuthExtractor,
    Json(req): Json<NewPatient>,
) -> ApiResult<impl IntoResponse> {
    let patient = store.create_patient(req).await?;
    tracing::info!(
        patient_id = %patient.patient_id,
        created_by = %auth.subject,
        "Patient registered"
    );

    ws.broadcast(WsEvent::PatientCreated {
        patient: patient.clone(),
    });

    Ok((StatusCode::CREATED, Json(patient)))
}

/// GET /api/v1/patients - List patients, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/patients",
    tag = "Patients",
    params(ListParams),
    responses(
        (status = 200, description = "Page of patients", body = Vec<Patient>),
        (status = 400, description = "Invalid paging parameters", body = ApiError),
    ),
)]
pub async fn list_patients(
    State(store): State<ReconcilingStore>,
    State(config): State<Arc<ApiConfig>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Patient>>> {
    let (limit, offset) = params.resolve(config.max_page_size)?;
    Ok(Json(store.patient_list(limit, offset).await?))
}

/// GET /api/v1/patients/{id} - Get a patient by wide id
#[utoipa::path(
    get,
    path = "/api/v1/patients/{id}",
    tag = "Patients",
    params(
        ("id" = String, Path, description = "Patient wide id")
    ),
    responses(
        (status = 200, description = "Patient details", body = Patient),
        (status = 400, description = "Malformed id", body = ApiError),
        (status = 404, description = "Patient not found", body = ApiError),
    ),
)]
pub async fn get_patient(
    State(store): State<ReconcilingStore>,
    Path(id): Path<String>,
) -> ApiResult<Json<Patient>> {
    let patient_id = parse_wide_path(&id)?;
    let patient = store
        .patient_get(patient_id)
        .await?
        .ok_or_else(|| ApiError::patient_not_found(patient_id))?;
    Ok(Json(patient))
}

/// GET /api/v1/patients/{id}/records/{table} - A patient's rows in one table
#[utoipa::path(
    get,
    path = "/api/v1/patients/{id}/records/{table}",
    tag = "Patients",
    params(
        ("id" = String, Path, description = "Patient wide id"),
        ("table" = String, Path, description = "Dependent table name, e.g. lab_results")
    ),
    responses(
        (status = 200, description = "Rows referencing the patient", body = Vec<DependentRow>),
        (status = 400, description = "Malformed id", body = ApiError),
        (status = 404, description = "Unknown table or patient", body = ApiError),
    ),
)]
pub async fn list_patient_records(
    State(store): State<ReconcilingStore>,
    Path((id, table)): Path<(String, String)>,
) -> ApiResult<Json<Vec<DependentRow>>> {
    let patient_id = parse_wide_path(&id)?;
    let table = parse_table_path(&table)?;

    if store.patient_get(patient_id).await?.is_none() {
        return Err(ApiError::patient_not_found(patient_id));
    }

    Ok(Json(store.dependent_list_by_patient(table, patient_id).await?))
}

pub fn create_router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/", axum::routing::post(create_patient))
        .route("/", axum::routing::get(list_patients))
        .route("/:id", axum::routing::get(get_patient))
        .route("/:id/records/:table", axum::routing::get(list_patient_records))
}
