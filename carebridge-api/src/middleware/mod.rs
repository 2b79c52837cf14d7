//! Axum middleware for the CareBridge API.

pub mod auth;

pub use auth::{auth_middleware, AuthExtractor, AuthMiddlewareError, AuthMiddlewareState};
