//! Async storage trait implemented by persistence backends.
//!
//! Backends store rows exactly as given. Identifier reconciliation happens one
//! layer up in [`crate::ReconcilingStore`], so the same hooks run whether the
//! rows end up in PostgreSQL or in memory.

use ::async_trait::async_trait;
use carebridge_core::{CareResult, DependentRow, DependentTable, NarrowId, Patient, WideId};

/// Async storage trait for database operations.
#[async_trait]
pub trait AsyncStorageTrait: Send + Sync {
    // ========================================================================
    // PATIENT OPERATIONS
    // ========================================================================

    /// Insert a new patient.
    async fn patient_insert(&self, p: &Patient) -> CareResult<()>;

    /// Get a patient by wide id.
    async fn patient_get(&self, id: WideId) -> CareResult<Option<Patient>>;

    /// List patients ordered by creation time.
    async fn patient_list(&self, limit: i64, offset: i64) -> CareResult<Vec<Patient>>;

    /// First patient (by creation time) whose derived narrow id matches.
    async fn patient_find_by_narrow_id(&self, narrow: NarrowId) -> CareResult<Option<Patient>>;

    // ========================================================================
    // DEPENDENT RECORD OPERATIONS
    // ========================================================================

    /// Insert a dependent row as-is.
    async fn dependent_insert(&self, row: &DependentRow) -> CareResult<()>;

    /// Replace a stored dependent row as-is.
    async fn dependent_update(&self, row: &DependentRow) -> CareResult<()>;

    /// Get a dependent row by record id.
    async fn dependent_get(
        &self,
        table: DependentTable,
        record_id: WideId,
    ) -> CareResult<Option<DependentRow>>;

    /// List dependent rows ordered by creation time.
    async fn dependent_list(
        &self,
        table: DependentTable,
        limit: i64,
        offset: i64,
    ) -> CareResult<Vec<DependentRow>>;

    /// List a patient's rows in one table.
    async fn dependent_list_by_patient(
        &self,
        table: DependentTable,
        patient_id: WideId,
    ) -> CareResult<Vec<DependentRow>>;

    // ========================================================================
    // BACKFILL SUPPORT
    // ========================================================================

    /// Rows with a non-null wide reference and `record_id > after`, ordered by
    /// `record_id`, at most `limit` of them.
    async fn dependent_page_for_backfill(
        &self,
        table: DependentTable,
        after: Option<WideId>,
        limit: usize,
    ) -> CareResult<Vec<DependentRow>>;

    /// Overwrite only the narrow-id cache column of one row, provided its
    /// wide reference still equals `expected_wide`.
    ///
    /// Returns `false` when the reference changed (or the row vanished) since
    /// it was read; the write path has already synced such a row.
    async fn dependent_set_narrow(
        &self,
        table: DependentTable,
        record_id: WideId,
        expected_wide: WideId,
        narrow: NarrowId,
    ) -> CareResult<bool>;

    // ========================================================================
    // HEALTH
    // ========================================================================

    /// Check if the storage backend is healthy.
    async fn health_check(&self) -> CareResult<bool>;
}
