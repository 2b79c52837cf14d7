//! Axum Middleware for Authentication
//!
//! Reads (`GET`, `HEAD`, `OPTIONS`) pass through untouched. Every other
//! method must present a valid bearer token; the resulting [`AuthContext`]
//! is injected into request extensions for handlers to pick up through
//! [`AuthExtractor`].

use crate::auth::{authenticate, AuthConfig, AuthContext};
use crate::error::ApiError;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

/// Shared state for authentication middleware.
#[derive(Debug, Clone)]
pub struct AuthMiddlewareState {
    pub auth_config: Arc<AuthConfig>,
}

impl AuthMiddlewareState {
    pub fn new(auth_config: AuthConfig) -> Self {
        Self {
            auth_config: Arc::new(auth_config),
        }
    }
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Require a bearer token on mutating requests.
///
/// # Example
///
/// ```ignore
/// use axum::{Router, middleware};
/// use carebridge_api::middleware::{auth_middleware, AuthMiddlewareState};
/// use carebridge_api::AuthConfig;
///
/// let auth_state = AuthMiddlewareState::new(AuthConfig::from_env());
///
/// let app = Router::new()
///     .route("/api/v1/patients", axum::routing::post(|| async { "OK" }))
///     .layer(middleware::from_fn_with_state(auth_state, auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    if request.method().is_safe() {
        return Ok(next.run(request).await);
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let auth_context = authenticate(&state.auth_config, auth_header).map_err(|e| {
        tracing::debug!(
            method = %request.method(),
            path = %request.uri().path(),
            code = %e.code,
            "Rejected unauthenticated write"
        );
        AuthMiddlewareError(e)
    })?;

    request.extensions_mut().insert(auth_context);
    Ok(next.run(request).await)
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Error wrapper for middleware that implements IntoResponse.
#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Typed extractor for the authenticated caller.
///
/// Only meaningful on routes that `auth_middleware` guards, i.e. non-GET
/// handlers. Missing context is reported as 401 rather than a panic.
#[derive(Debug, Clone)]
pub struct AuthExtractor(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(AuthExtractor)
            .ok_or_else(|| AuthMiddlewareError(ApiError::unauthorized("Authentication required")))
    }
}

impl std::ops::Deref for AuthExtractor {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{generate_jwt_token, FixedClock};
    use crate::error::ApiResult;
    use axum::{
        body::Body,
        http::{Method, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    fn config() -> ApiResult<AuthConfig> {
        AuthConfig::with_secret(
            "middleware-test-secret-of-at-least-32-chars",
            Arc::new(FixedClock(1_704_067_200)),
        )
    }

    fn app(config: AuthConfig) -> Router {
        Router::new()
            .route(
                "/thing",
                get(|| async { "read" }).post(|AuthExtractor(ctx): AuthExtractor| async move {
                    ctx.subject
                }),
            )
            .layer(from_fn_with_state(AuthMiddlewareState::new(config), auth_middleware))
    }

    fn request(method: Method, auth: Option<&str>) -> Result<Request, axum::http::Error> {
        let mut builder = Request::builder().method(method).uri("/thing");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty())
    }

    #[tokio::test]
    async fn test_reads_need_no_token() -> Result<(), Box<dyn std::error::Error>> {
        let response = app(config()?).oneshot(request(Method::GET, None)?).await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn test_writes_need_token() -> Result<(), Box<dyn std::error::Error>> {
        let response = app(config()?).oneshot(request(Method::POST, None)?).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(config()?)
            .oneshot(request(Method::POST, Some("Bearer not.a.jwt"))?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() -> Result<(), Box<dyn std::error::Error>> {
        let config = config()?;
        let token = generate_jwt_token(&config, "ward-7".to_string(), vec![])?;
        let response = app(config)
            .oneshot(request(Method::POST, Some(&format!("Bearer {}", token)))?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await?;
        assert_eq!(&body[..], b"ward-7");
        Ok(())
    }
}
