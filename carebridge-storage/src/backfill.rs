//! One-off recomputation of narrow-id caches for rows written before the
//! write-path hook existed.
//!
//! Rows are written one at a time with no transaction around the table. A
//! failure part-way leaves earlier rows reconciled and later ones untouched;
//! re-running is safe because the result only depends on each row's wide id.
//!
//! Each narrow-id write is conditional on the wide reference read from the
//! page. A row re-pointed by the write path in between is skipped: its cache
//! was already synced by the hook and must not be overwritten with a value
//! derived from the old reference.

use carebridge_core::{
    derive_narrow_id, CareError, CareResult, DependentTable, ReconcileConfig, StorageError,
};
use serde_json::json;

use crate::async_trait::AsyncStorageTrait;

/// Outcome of backfilling one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub table: DependentTable,
    /// Rows with a non-null wide reference that were examined.
    pub scanned: u64,
    /// Rows whose cached narrow id was rewritten.
    pub updated: u64,
    /// Rows that already held the derived value.
    pub unchanged: u64,
    /// Rows whose wide reference changed after the page was read.
    pub skipped: u64,
    /// Rows skipped after a write error (only when not stopping on error).
    pub failed: u64,
}

impl BackfillReport {
    fn new(table: DependentTable) -> Self {
        Self {
            table,
            scanned: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            failed: 0,
        }
    }

    /// Rows known to satisfy the invariant after this run. Skipped rows count:
    /// the write that moved them also synced them.
    pub fn reconciled(&self) -> u64 {
        self.updated + self.unchanged + self.skipped
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "table": self.table,
            "scanned": self.scanned,
            "updated": self.updated,
            "unchanged": self.unchanged,
            "skipped": self.skipped,
            "failed": self.failed,
        })
    }
}

fn partial_failure(
    report: &BackfillReport,
    failed_record_id: Option<uuid::Uuid>,
    err: &CareError,
) -> CareError {
    CareError::Storage(StorageError::PartialBackfillFailure {
        table: report.table,
        reconciled: report.reconciled(),
        failed_record_id,
        reason: err.to_string(),
    })
}

/// Recompute the narrow-id cache of every row in `table` that has a wide
/// reference.
pub async fn backfill(
    backend: &dyn AsyncStorageTrait,
    table: DependentTable,
    config: &ReconcileConfig,
) -> CareResult<BackfillReport> {
    config.validate()?;

    let mut report = BackfillReport::new(table);
    let mut after = None;

    tracing::info!(table = %table, batch_size = config.backfill_batch_size, "Starting backfill");

    loop {
        let page = match backend
            .dependent_page_for_backfill(table, after, config.backfill_batch_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(table = %table, error = %e, "Backfill page read failed");
                return Err(partial_failure(&report, None, &e));
            }
        };
        let page_len = page.len();

        for row in page {
            after = Some(row.record_id);
            let Some(wide) = row.patient_id else {
                continue;
            };
            report.scanned += 1;

            let narrow = derive_narrow_id(wide);
            if row.patient_narrow_id == Some(narrow) {
                report.unchanged += 1;
                continue;
            }

            match backend
                .dependent_set_narrow(table, row.record_id, wide, narrow)
                .await
            {
                Ok(true) => report.updated += 1,
                Ok(false) => {
                    tracing::debug!(
                        table = %table,
                        record_id = %row.record_id,
                        "Wide reference changed since read, skipping"
                    );
                    report.skipped += 1;
                }
                Err(e) if config.backfill_stop_on_error => {
                    tracing::error!(
                        table = %table,
                        record_id = %row.record_id,
                        reconciled = report.reconciled(),
                        error = %e,
                        "Backfill aborted"
                    );
                    return Err(partial_failure(&report, Some(row.record_id), &e));
                }
                Err(e) => {
                    tracing::error!(
                        table = %table,
                        record_id = %row.record_id,
                        error = %e,
                        "Backfill row failed, continuing"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            table = %table,
            scanned = report.scanned,
            updated = report.updated,
            "Backfill batch done"
        );

        if page_len < config.backfill_batch_size {
            break;
        }
    }

    tracing::info!(
        table = %table,
        scanned = report.scanned,
        updated = report.updated,
        unchanged = report.unchanged,
        skipped = report.skipped,
        failed = report.failed,
        "Backfill finished"
    );
    Ok(report)
}

/// Backfill every dependent table in order, stopping at the first error.
pub async fn backfill_all(
    backend: &dyn AsyncStorageTrait,
    config: &ReconcileConfig,
) -> CareResult<Vec<BackfillReport>> {
    let mut reports = Vec::with_capacity(DependentTable::all().len());
    for table in DependentTable::all() {
        reports.push(backfill(backend, *table, config).await?);
    }
    Ok(reports)
}
