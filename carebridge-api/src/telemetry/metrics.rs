//! Prometheus Metrics Definitions
//!
//! Defines all CareBridge metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use carebridge_core::{CareResult, DependentRecord};
use carebridge_storage::{BackfillReport, PrePersistHook, WriteOp};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<CareMetrics>> = Lazy::new(CareMetrics::new);

/// Container for all CareBridge metrics.
#[derive(Clone)]
pub struct CareMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Narrow-id syncs on the write path - labels: table, op
    pub narrow_id_syncs_total: CounterVec,

    /// Rows touched by backfill runs - labels: table, outcome
    pub backfill_rows_total: CounterVec,

    /// Current active WebSocket connections
    pub websocket_connections: Gauge,
}

fn registration_failed(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl CareMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "carebridge_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_failed("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "carebridge_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_failed("http_request_duration_seconds", e))?,

            narrow_id_syncs_total: register_counter_vec!(
                "carebridge_narrow_id_syncs_total",
                "Narrow ids derived on the write path",
                &["table", "op"]
            )
            .map_err(|e| registration_failed("narrow_id_syncs_total", e))?,

            backfill_rows_total: register_counter_vec!(
                "carebridge_backfill_rows_total",
                "Rows processed by backfill runs",
                &["table", "outcome"]
            )
            .map_err(|e| registration_failed("backfill_rows_total", e))?,

            websocket_connections: register_gauge!(
                "carebridge_websocket_connections",
                "Current number of active WebSocket connections"
            )
            .map_err(|e| registration_failed("websocket_connections", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_narrow_id_sync(&self, table: &str, op: WriteOp) {
        self.narrow_id_syncs_total
            .with_label_values(&[table, op.as_str()])
            .inc();
    }

    /// Add one backfill run's counts.
    pub fn record_backfill(&self, report: &BackfillReport) {
        let table = report.table.table_name();
        for (outcome, count) in [
            ("updated", report.updated),
            ("unchanged", report.unchanged),
            ("skipped", report.skipped),
            ("failed", report.failed),
        ] {
            if count > 0 {
                self.backfill_rows_total
                    .with_label_values(&[table, outcome])
                    .inc_by(count as f64);
            }
        }
    }

    /// Increment WebSocket connection count.
    pub fn ws_connected(&self) {
        self.websocket_connections.inc();
    }

    /// Decrement WebSocket connection count.
    pub fn ws_disconnected(&self) {
        self.websocket_connections.dec();
    }
}

/// Pre-persist hook counting narrow-id syncs. Register it after
/// [`carebridge_storage::NarrowIdSync`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncMetricsHook;

impl PrePersistHook for SyncMetricsHook {
    fn name(&self) -> &'static str {
        "sync_metrics"
    }

    fn before_write(&self, record: &mut dyn DependentRecord, op: WriteOp) -> CareResult<()> {
        if record.patient_id().is_some() {
            if let Ok(metrics) = METRICS.as_ref() {
                metrics.record_narrow_id_sync(record.table().table_name(), op);
            }
        }
        Ok(())
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebridge_core::{DependentRow, DependentTable};
    use serde_json::json;
    use uuid::Uuid;

    fn metrics() -> Result<&'static CareMetrics, String> {
        METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))
    }

    #[test]
    fn test_record_http_request() -> Result<(), String> {
        metrics()?.record_http_request("GET", "/api/v1/patients", 200, 0.015);
        Ok(())
    }

    #[test]
    fn test_backfill_counters_accumulate() -> Result<(), String> {
        let m = metrics()?;
        let counter = m
            .backfill_rows_total
            .with_label_values(&["discharge_summaries", "updated"]);
        let before = counter.get();

        let report = BackfillReport {
            table: DependentTable::DischargeSummaries,
            scanned: 5,
            updated: 3,
            unchanged: 2,
            skipped: 0,
            failed: 0,
        };
        m.record_backfill(&report);
        assert!(counter.get() - before >= 3.0);
        Ok(())
    }

    #[test]
    fn test_sync_hook_counts_only_referenced_rows() -> Result<(), String> {
        let m = metrics()?;
        let counter = m
            .narrow_id_syncs_total
            .with_label_values(&["prescriptions", "insert"]);
        let before = counter.get();

        let hook = SyncMetricsHook;
        let mut orphan = DependentRow::new(DependentTable::Prescriptions, None, json!({}));
        hook.before_write(&mut orphan, WriteOp::Insert)
            .map_err(|e| e.to_string())?;
        let mut linked = DependentRow::new(
            DependentTable::Prescriptions,
            Some(Uuid::from_u128(7)),
            json!({}),
        );
        hook.before_write(&mut linked, WriteOp::Insert)
            .map_err(|e| e.to_string())?;

        assert!(counter.get() - before >= 1.0);
        // The hook only observes.
        assert_eq!(linked.patient_narrow_id, None);
        Ok(())
    }

    #[test]
    fn test_websocket_metrics() -> Result<(), String> {
        let m = metrics()?;
        m.ws_connected();
        m.ws_disconnected();
        Ok(())
    }
}
