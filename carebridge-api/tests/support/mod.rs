//! Shared harness for router-level tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use carebridge_api::auth::SystemClock;
use carebridge_api::{create_api_router, generate_jwt_token, ApiConfig, AuthConfig, WsState, ADMIN_ROLE};
use carebridge_core::ReconcileConfig;
use carebridge_test_utils::MockStorage;
use serde_json::Value;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "integration-test-secret-with-enough-length";

pub struct TestApp {
    pub router: Router,
    pub storage: Arc<MockStorage>,
    pub ws: Arc<WsState>,
    pub auth: AuthConfig,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_reconcile(ReconcileConfig::default())
    }

    pub fn with_reconcile(reconcile: ReconcileConfig) -> Self {
        let storage = Arc::new(MockStorage::new());
        let ws = Arc::new(WsState::new(64));
        let auth = AuthConfig::with_secret(TEST_SECRET, Arc::new(SystemClock))
            .expect("test secret is valid");
        let router = create_api_router(
            storage.clone(),
            ws.clone(),
            &ApiConfig::default(),
            auth.clone(),
            reconcile,
        )
        .expect("router builds");
        Self {
            router,
            storage,
            ws,
            auth,
        }
    }

    pub fn token(&self, roles: &[&str]) -> String {
        generate_jwt_token(
            &self.auth,
            "ward-7-clerk".to_string(),
            roles.iter().map(|r| r.to_string()).collect(),
        )
        .expect("token signs")
    }

    pub fn clinician_token(&self) -> String {
        self.token(&["clinician"])
    }

    pub fn admin_token(&self) -> String {
        self.token(&[ADMIN_ROLE])
    }

    /// Send a request and return the status and the JSON body (Null if empty
    /// or not JSON).
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request builds");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None, None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PATCH, uri, Some(token), Some(body)).await
    }

    /// Register a patient through the API and return its wide id text.
    pub async fn create_patient(&self, first: &str, last: &str) -> String {
        let token = self.clinician_token();
        let (status, body) = self
            .post(
                "/api/v1/patients",
                &token,
                serde_json::json!({ "first_name": first, "last_name": last }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create patient: {body}");
        body["patient_id"]
            .as_str()
            .expect("patient_id is a string")
            .to_string()
    }
}
