//! REST API Routes
//!
//! Route modules plus the top-level router assembly.

pub mod admin;
pub mod compat;
pub mod health;
pub mod identity;
pub mod patients;
pub mod records;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use carebridge_core::{parse_wide_id, CareError, DependentTable, ReconcileConfig, WideId};
use carebridge_storage::AsyncStorageTrait;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

use crate::auth::AuthConfig;
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{auth_middleware, AuthMiddlewareState};
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};
use crate::ws::{ws_handler, WsState};

// ============================================================================
// PATH PARSING
// ============================================================================

/// Parse a wide id from a path segment. Malformed text is a 400.
pub(crate) fn parse_wide_path(segment: &str) -> ApiResult<WideId> {
    parse_wide_id(segment).map_err(|e| CareError::from(e).into())
}

/// Parse a dependent table from a path segment. Unknown names are a 404.
pub(crate) fn parse_table_path(segment: &str) -> ApiResult<DependentTable> {
    segment
        .parse::<DependentTable>()
        .map_err(|e| CareError::from(e).into())
}

// ============================================================================
// ROUTER
// ============================================================================

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

fn validate_api_config_for_production(config: &ApiConfig) -> ApiResult<()> {
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set CAREBRIDGE_CORS_ORIGINS.",
        ));
    }
    Ok(())
}

fn is_production_environment() -> bool {
    std::env::var("CAREBRIDGE_ENVIRONMENT")
        .map(|e| matches!(e.to_lowercase().as_str(), "production" | "prod"))
        .unwrap_or(false)
}

fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if !config.is_production() {
        tracing::info!("CORS: Development mode - allowing all origins");
        return cors.allow_origin(Any).allow_headers(Any);
    }

    tracing::info!(origins = ?config.cors_origins, "CORS: restricting origins");
    let allowed = config.clone();
    let cors = cors
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _request_parts| {
                origin
                    .to_str()
                    .map(|o| allowed.is_origin_allowed(o))
                    .unwrap_or(false)
            },
        ));

    if config.cors_allow_credentials {
        cors.allow_credentials(true)
    } else {
        cors
    }
}

/// Assemble the full application router.
///
/// Everything under `/api/v1` goes through the auth middleware, which lets
/// safe methods through and demands a bearer token for the rest. Health,
/// metrics and the OpenAPI document are always open.
pub fn create_api_router(
    backend: Arc<dyn AsyncStorageTrait>,
    ws: Arc<WsState>,
    api_config: &ApiConfig,
    auth_config: AuthConfig,
    reconcile: ReconcileConfig,
) -> ApiResult<Router> {
    if is_production_environment() {
        auth_config.validate_for_production()?;
        validate_api_config_for_production(api_config)?;
    }
    reconcile.validate()?;

    let state = AppState::new(backend, ws, reconcile, api_config.clone());
    let auth_state = AuthMiddlewareState::new(auth_config);

    let api_routes = Router::new()
        .nest("/identity", identity::create_router())
        .nest("/patients", patients::create_router())
        .nest("/compat", compat::create_router())
        .nest("/records", records::create_router())
        .nest("/admin", admin::create_router())
        .route("/ws", get(ws_handler))
        .layer(from_fn_with_state(auth_state, auth_middleware))
        .with_state(state.clone());

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .nest(
            "/health",
            health::create_router(state.store.clone(), state.start_time),
        )
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(openapi_json));

    Ok(router
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(api_config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_parse_wide_path() {
        assert!(parse_wide_path("123e4567-e89b-12d3-a456-426614174000").is_ok());
        assert_eq!(
            parse_wide_path("patient-7").err().map(|e| e.code),
            Some(ErrorCode::InvalidFormat)
        );
    }

    #[test]
    fn test_parse_table_path() {
        assert_eq!(parse_table_path("lab_results").ok(), Some(DependentTable::LabResults));
        assert_eq!(
            parse_table_path("patients").err().map(|e| e.code),
            Some(ErrorCode::TableNotFound)
        );
    }

    #[test]
    fn test_production_requires_origins() {
        assert!(validate_api_config_for_production(&ApiConfig::default()).is_err());
        let config = ApiConfig {
            cors_origins: vec!["https://ward.example.org".to_string()],
            ..ApiConfig::default()
        };
        assert!(validate_api_config_for_production(&config).is_ok());
    }
}
