//! Identity REST API Routes
//!
//! Stateless narrow-id derivation, for operators checking what a legacy
//! consumer will see for a given wide id.

use axum::{extract::Path, Json};
use carebridge_core::{derive_narrow_id, narrow_id_hex_prefix};

use crate::{
    error::{ApiError, ApiResult},
    routes::parse_wide_path,
    state::AppState,
    types::DeriveResponse,
};

/// GET /api/v1/identity/derive/{wide_id} - Derive the narrow id of a wide id
#[utoipa::path(
    get,
    path = "/api/v1/identity/derive/{wide_id}",
    tag = "Identity",
    params(
        ("wide_id" = String, Path, description = "Wide id in any UUID text form")
    ),
    responses(
        (status = 200, description = "Derived narrow id", body = DeriveResponse),
        (status = 400, description = "Not a UUID", body = ApiError),
    ),
)]
pub async fn derive(Path(wide_id): Path<String>) -> ApiResult<Json<DeriveResponse>> {
    let wide = parse_wide_path(&wide_id)?;
    Ok(Json(DeriveResponse {
        wide_id: wide,
        narrow_id: derive_narrow_id(wide),
        hex_prefix: narrow_id_hex_prefix(wide),
    }))
}

pub fn create_router() -> axum::Router<AppState> {
    axum::Router::new().route("/derive/:wide_id", axum::routing::get(derive))
}
