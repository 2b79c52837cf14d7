//! Request and response bodies for the REST API.

use carebridge_core::{DependentPatch, DependentTable, NarrowId, WideId};
use carebridge_storage::BackfillReport;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, ApiResult};

/// Default `limit` for list endpoints.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

// ============================================================================
// IDENTITY
// ============================================================================

/// Result of deriving a narrow id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeriveResponse {
    /// Canonical lowercase hyphenated form of the input
    #[schema(value_type = String, format = "uuid")]
    pub wide_id: WideId,
    #[schema(value_type = i32)]
    pub narrow_id: NarrowId,
    /// Hex digits the narrow id was read from
    pub hex_prefix: String,
}

// ============================================================================
// PAGING
// ============================================================================

/// `?limit=&offset=` query parameters.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Page size (default 50)
    pub limit: Option<i64>,
    /// Rows to skip (default 0)
    pub offset: Option<i64>,
}

impl ListParams {
    /// Resolve to a concrete `(limit, offset)`, bounded by `max_limit`.
    pub fn resolve(&self, max_limit: i64) -> ApiResult<(i64, i64)> {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE.min(max_limit));
        if !(1..=max_limit).contains(&limit) {
            return Err(ApiError::invalid_range("limit", 1, max_limit));
        }
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(ApiError::invalid_range("offset", 0, i64::MAX));
        }
        Ok((limit, offset))
    }
}

// ============================================================================
// DEPENDENT RECORDS
// ============================================================================

/// Body of `POST /api/v1/records/{table}`.
///
/// `patient_id` is taken as text so a malformed id is reported as an
/// identifier error rather than a JSON error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CreateRecordRequest {
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default = "empty_object")]
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Body of `PATCH /api/v1/records/{table}/{id}`.
///
/// An absent `patient_id` leaves the reference alone; an explicit `null`
/// clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UpdateRecordRequest {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub patient_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub payload: Option<serde_json::Value>,
}

/// Wrap any present value (including `null`) in `Some`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl UpdateRecordRequest {
    /// Parse the textual reference into a storage patch.
    pub fn into_patch(self) -> ApiResult<DependentPatch> {
        let patient_id = match self.patient_id {
            None => None,
            Some(None) => Some(None),
            Some(Some(text)) => Some(Some(carebridge_core::parse_wide_id(&text).map_err(
                carebridge_core::CareError::from,
            )?)),
        };
        Ok(DependentPatch {
            patient_id,
            payload: self.payload,
        })
    }
}

// ============================================================================
// BACKFILL
// ============================================================================

/// Outcome of backfilling one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BackfillResponse {
    pub table: DependentTable,
    pub scanned: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Rows re-pointed by a concurrent write while the backfill ran
    pub skipped: u64,
    pub failed: u64,
}

impl From<&BackfillReport> for BackfillResponse {
    fn from(report: &BackfillReport) -> Self {
        Self {
            table: report.table,
            scanned: report.scanned,
            updated: report.updated,
            unchanged: report.unchanged,
            skipped: report.skipped,
            failed: report.failed,
        }
    }
}
