//! OpenAPI Specification for the CareBridge API
//!
//! Generated by utoipa from the route annotations and schema derives.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::{ApiError, ErrorCode};
use crate::routes::health::{Liveness, Readiness, StorageCheck};
use crate::routes::{admin, compat, health, identity, patients, records};
use crate::types::{BackfillResponse, CreateRecordRequest, DeriveResponse, UpdateRecordRequest};

use carebridge_core::{DependentRow, DependentTable, NewPatient, Patient, PatientCompatView};

/// OpenAPI document for the CareBridge API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "CareBridge API",
        version = "0.3.0",
        description = "Wide/narrow identifier reconciliation for hospital records",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Identity", description = "Narrow-id derivation"),
        (name = "Patients", description = "Patient registration and lookup by wide id"),
        (name = "Compatibility", description = "Patient view keyed by narrow id"),
        (name = "Records", description = "Dependent records, one resource per table"),
        (name = "Admin", description = "Backfill of narrow-id caches"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Observability", description = "Prometheus metrics"),
    ),
    paths(
        identity::derive,
        patients::create_patient,
        patients::list_patients,
        patients::get_patient,
        patients::list_patient_records,
        compat::list_compat_patients,
        compat::get_compat_patient,
        records::create_record,
        records::list_records,
        records::get_record,
        records::update_record,
        admin::backfill_table,
        admin::backfill_all,
        health::ping,
        health::liveness,
        health::readiness,
        crate::telemetry::metrics::metrics_handler,
    ),
    components(
        schemas(
            ApiError,
            ErrorCode,
            DeriveResponse,
            NewPatient,
            Patient,
            PatientCompatView,
            DependentTable,
            DependentRow,
            CreateRecordRequest,
            UpdateRecordRequest,
            BackfillResponse,
            Liveness,
            Readiness,
            StorageCheck,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security scheme modifier for OpenAPI document.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("JWT Bearer token"))
                        .build(),
                ),
            );
        }
    }
}

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}
