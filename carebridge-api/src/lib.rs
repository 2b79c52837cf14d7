//! CareBridge API - REST/WebSocket Layer and Backfill Tooling
//!
//! Exposes patients, the narrow-id compatibility view and the dependent
//! record tables over HTTP. Every write goes through the reconciling store
//! from carebridge-storage, so stored narrow ids always match their wide
//! references. The PostgreSQL backend lives in [`db`].

#[macro_use]
mod macros;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod ws;

// Re-export commonly used types
pub use auth::{
    authenticate, generate_jwt_token, validate_jwt_token, AuthConfig, AuthContext, Claims,
    ADMIN_ROLE,
};
pub use config::ApiConfig;
pub use db::{DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use events::WsEvent;
pub use middleware::{auth_middleware, AuthExtractor, AuthMiddlewareState};
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use state::AppState;
pub use types::*;
pub use ws::WsState;
