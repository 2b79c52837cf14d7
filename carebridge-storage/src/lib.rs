//! CareBridge Storage - Storage Trait, Write-Path Reconciliation and Backfill
//!
//! Defines the storage abstraction for patients and their dependent records,
//! the pre-persist hooks that keep narrow-id caches in sync, the backfill job
//! for pre-existing rows and the versioned schema. The PostgreSQL backend
//! lives in carebridge-api.

pub mod async_trait;
pub mod backfill;
pub mod hooks;
pub mod reconcile;
pub mod schema;

pub use async_trait::AsyncStorageTrait;
pub use backfill::{backfill, backfill_all, BackfillReport};
pub use hooks::{HookRegistry, NarrowIdSync, PrePersistHook, WriteOp};
pub use reconcile::ReconcilingStore;
pub use schema::{narrow_id_sql, pending, validate_migrations, Migration, MIGRATIONS};

use ::async_trait::async_trait;
use carebridge_core::{
    derive_narrow_id, CareError, CareResult, DependentRow, DependentTable, EntityType, NarrowId,
    Patient, StorageError, WideId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// MOCK STORAGE
// ============================================================================

const NO_INJECTED_FAILURE: usize = usize::MAX;

/// In-memory mock storage for testing.
///
/// Enforces the same constraints as the PostgreSQL schema: unique ids and a
/// foreign key from a dependent row's wide reference to an existing patient.
#[derive(Debug)]
pub struct MockStorage {
    patients: Arc<RwLock<HashMap<WideId, Patient>>>,
    rows: Arc<RwLock<HashMap<DependentTable, BTreeMap<WideId, DependentRow>>>>,
    /// Successful `dependent_set_narrow` calls left before writes start failing.
    narrow_write_budget: AtomicUsize,
}

impl Default for MockStorage {
    fn default() -> Self {
        Self {
            patients: Arc::default(),
            rows: Arc::default(),
            narrow_write_budget: AtomicUsize::new(NO_INJECTED_FAILURE),
        }
    }
}

fn poisoned<T>(_: T) -> CareError {
    CareError::Storage(StorageError::LockPoisoned)
}

fn window<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
    let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
    items.into_iter().skip(offset).take(limit).collect()
}

impl MockStorage {
    /// Create a new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn patients_read(&self) -> CareResult<RwLockReadGuard<'_, HashMap<WideId, Patient>>> {
        self.patients.read().map_err(poisoned)
    }

    fn patients_write(&self) -> CareResult<RwLockWriteGuard<'_, HashMap<WideId, Patient>>> {
        self.patients.write().map_err(poisoned)
    }

    fn rows_read(
        &self,
    ) -> CareResult<RwLockReadGuard<'_, HashMap<DependentTable, BTreeMap<WideId, DependentRow>>>>
    {
        self.rows.read().map_err(poisoned)
    }

    fn rows_write(
        &self,
    ) -> CareResult<RwLockWriteGuard<'_, HashMap<DependentTable, BTreeMap<WideId, DependentRow>>>>
    {
        self.rows.write().map_err(poisoned)
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        if let Ok(mut patients) = self.patients.write() {
            patients.clear();
        }
        if let Ok(mut rows) = self.rows.write() {
            rows.clear();
        }
    }

    /// Get count of stored patients.
    pub fn patient_count(&self) -> usize {
        self.patients.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Get count of stored rows in one dependent table.
    pub fn row_count(&self, table: DependentTable) -> usize {
        self.rows
            .read()
            .map(|rows| rows.get(&table).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Let the next `n` narrow-id writes succeed, then fail every one after.
    pub fn fail_narrow_writes_after(&self, n: usize) {
        self.narrow_write_budget.store(n, Ordering::SeqCst);
    }

    /// Stop injecting narrow-id write failures.
    pub fn clear_failure_injection(&self) {
        self.narrow_write_budget
            .store(NO_INJECTED_FAILURE, Ordering::SeqCst);
    }

    fn take_narrow_write(&self) -> bool {
        self.narrow_write_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |budget| match budget {
                NO_INJECTED_FAILURE => Some(budget),
                0 => None,
                n => Some(n - 1),
            })
            .is_ok()
    }

    fn check_patient_ref(&self, row: &DependentRow) -> CareResult<Option<String>> {
        let Some(patient_id) = row.patient_id else {
            return Ok(None);
        };
        if self.patients_read()?.contains_key(&patient_id) {
            Ok(None)
        } else {
            Ok(Some(format!(
                "patient {patient_id} referenced by {} does not exist",
                row.table
            )))
        }
    }

    fn sorted_patients(&self) -> CareResult<Vec<Patient>> {
        let mut patients: Vec<Patient> = self.patients_read()?.values().cloned().collect();
        patients.sort_by_key(|p| (p.created_at, p.patient_id));
        Ok(patients)
    }

    fn sorted_rows<F>(&self, table: DependentTable, keep: F) -> CareResult<Vec<DependentRow>>
    where
        F: Fn(&DependentRow) -> bool,
    {
        let rows = self.rows_read()?;
        let mut out: Vec<DependentRow> = rows
            .get(&table)
            .map(|t| t.values().filter(|r| keep(r)).cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|r| (r.created_at, r.record_id));
        Ok(out)
    }
}

#[async_trait]
impl AsyncStorageTrait for MockStorage {
    // === Patient Operations ===

    async fn patient_insert(&self, p: &Patient) -> CareResult<()> {
        let mut patients = self.patients_write()?;
        if patients.contains_key(&p.patient_id) {
            return Err(CareError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Patient,
                reason: "already exists".to_string(),
            }));
        }
        patients.insert(p.patient_id, p.clone());
        Ok(())
    }

    async fn patient_get(&self, id: WideId) -> CareResult<Option<Patient>> {
        Ok(self.patients_read()?.get(&id).cloned())
    }

    async fn patient_list(&self, limit: i64, offset: i64) -> CareResult<Vec<Patient>> {
        Ok(window(self.sorted_patients()?, limit, offset))
    }

    async fn patient_find_by_narrow_id(&self, narrow: NarrowId) -> CareResult<Option<Patient>> {
        Ok(self
            .sorted_patients()?
            .into_iter()
            .find(|p| derive_narrow_id(p.patient_id) == narrow))
    }

    // === Dependent Record Operations ===

    async fn dependent_insert(&self, row: &DependentRow) -> CareResult<()> {
        let entity_type = row.entity_type();
        if let Some(reason) = self.check_patient_ref(row)? {
            return Err(CareError::Storage(StorageError::InsertFailed {
                entity_type,
                reason,
            }));
        }
        let mut rows = self.rows_write()?;
        let table = rows.entry(row.table).or_default();
        if table.contains_key(&row.record_id) {
            return Err(CareError::Storage(StorageError::InsertFailed {
                entity_type,
                reason: "already exists".to_string(),
            }));
        }
        table.insert(row.record_id, row.clone());
        Ok(())
    }

    async fn dependent_update(&self, row: &DependentRow) -> CareResult<()> {
        let entity_type = row.entity_type();
        if let Some(reason) = self.check_patient_ref(row)? {
            return Err(CareError::Storage(StorageError::UpdateFailed {
                entity_type,
                id: row.record_id,
                reason,
            }));
        }
        let mut rows = self.rows_write()?;
        let stored = rows
            .get_mut(&row.table)
            .and_then(|t| t.get_mut(&row.record_id))
            .ok_or(CareError::Storage(StorageError::NotFound {
                entity_type,
                id: row.record_id,
            }))?;
        *stored = row.clone();
        Ok(())
    }

    async fn dependent_get(
        &self,
        table: DependentTable,
        record_id: WideId,
    ) -> CareResult<Option<DependentRow>> {
        Ok(self
            .rows_read()?
            .get(&table)
            .and_then(|t| t.get(&record_id))
            .cloned())
    }

    async fn dependent_list(
        &self,
        table: DependentTable,
        limit: i64,
        offset: i64,
    ) -> CareResult<Vec<DependentRow>> {
        Ok(window(self.sorted_rows(table, |_| true)?, limit, offset))
    }

    async fn dependent_list_by_patient(
        &self,
        table: DependentTable,
        patient_id: WideId,
    ) -> CareResult<Vec<DependentRow>> {
        self.sorted_rows(table, |r| r.patient_id == Some(patient_id))
    }

    // === Backfill Support ===

    async fn dependent_page_for_backfill(
        &self,
        table: DependentTable,
        after: Option<WideId>,
        limit: usize,
    ) -> CareResult<Vec<DependentRow>> {
        let rows = self.rows_read()?;
        let Some(t) = rows.get(&table) else {
            return Ok(Vec::new());
        };
        // BTreeMap<Uuid, _> iterates in byte order, the same order PostgreSQL
        // sorts uuid columns in.
        Ok(t.values()
            .filter(|r| after.map_or(true, |a| r.record_id > a))
            .filter(|r| r.patient_id.is_some())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn dependent_set_narrow(
        &self,
        table: DependentTable,
        record_id: WideId,
        expected_wide: WideId,
        narrow: NarrowId,
    ) -> CareResult<bool> {
        if !self.take_narrow_write() {
            return Err(CareError::Storage(StorageError::UpdateFailed {
                entity_type: EntityType::Dependent(table),
                id: record_id,
                reason: "injected write failure".to_string(),
            }));
        }
        let mut rows = self.rows_write()?;
        let Some(row) = rows
            .get_mut(&table)
            .and_then(|t| t.get_mut(&record_id))
            .filter(|r| r.patient_id == Some(expected_wide))
        else {
            return Ok(false);
        };
        row.patient_narrow_id = Some(narrow);
        row.updated_at = chrono::Utc::now();
        Ok(true)
    }

    async fn health_check(&self) -> CareResult<bool> {
        Ok(self.patients.read().is_ok() && self.rows.read().is_ok())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use uuid::Uuid;

    fn make_patient(raw: u128) -> Patient {
        let now = chrono::Utc::now();
        Patient {
            patient_id: Uuid::from_u128(raw),
            first_name: "Akua".to_string(),
            last_name: "Boateng".to_string(),
            date_of_birth: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn make_row(table: DependentTable, record: u128, patient: Option<Uuid>) -> DependentRow {
        let mut row = DependentRow::new(table, patient, json!({ "note": "seed" }));
        row.record_id = Uuid::from_u128(record);
        row
    }

    // ========================================================================
    // Patient Tests
    // ========================================================================

    #[tokio::test]
    async fn test_patient_insert_get() -> CareResult<()> {
        let storage = MockStorage::new();
        let patient = make_patient(1);

        storage.patient_insert(&patient).await?;
        let retrieved = storage.patient_get(patient.patient_id).await?;

        assert_eq!(retrieved, Some(patient));
        assert_eq!(storage.patient_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_patient_insert_duplicate() -> CareResult<()> {
        let storage = MockStorage::new();
        let patient = make_patient(2);

        storage.patient_insert(&patient).await?;
        let result = storage.patient_insert(&patient).await;

        assert!(matches!(
            result,
            Err(CareError::Storage(StorageError::InsertFailed { .. }))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_find_by_narrow_id_prefers_oldest_on_collision() -> CareResult<()> {
        let storage = MockStorage::new();
        let mut older = make_patient(0x2a70);
        let newer = make_patient(0x10a81);
        older.created_at = newer.created_at - chrono::Duration::days(1);
        assert_eq!(
            derive_narrow_id(older.patient_id),
            derive_narrow_id(newer.patient_id)
        );

        storage.patient_insert(&newer).await?;
        storage.patient_insert(&older).await?;

        let found = storage
            .patient_find_by_narrow_id(derive_narrow_id(newer.patient_id))
            .await?;
        assert_eq!(found.map(|p| p.patient_id), Some(older.patient_id));
        Ok(())
    }

    #[tokio::test]
    async fn test_patient_list_window() -> CareResult<()> {
        let storage = MockStorage::new();
        for i in 0..5 {
            storage.patient_insert(&make_patient(100 + i)).await?;
        }
        assert_eq!(storage.patient_list(2, 0).await?.len(), 2);
        assert_eq!(storage.patient_list(10, 4).await?.len(), 1);
        assert!(storage.patient_list(-1, 0).await?.is_empty());
        Ok(())
    }

    // ========================================================================
    // Dependent Record Tests
    // ========================================================================

    #[tokio::test]
    async fn test_dependent_insert_requires_existing_patient() {
        let storage = MockStorage::new();
        let row = make_row(DependentTable::Appointments, 1, Some(Uuid::from_u128(404)));

        let result = storage.dependent_insert(&row).await;

        assert!(matches!(
            result,
            Err(CareError::Storage(StorageError::InsertFailed { .. }))
        ));
        assert_eq!(storage.row_count(DependentTable::Appointments), 0);
    }

    #[tokio::test]
    async fn test_dependent_insert_allows_null_reference() -> CareResult<()> {
        let storage = MockStorage::new();
        storage
            .dependent_insert(&make_row(DependentTable::Invoices, 1, None))
            .await?;
        assert_eq!(storage.row_count(DependentTable::Invoices), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_dependent_update_not_found() {
        let storage = MockStorage::new();
        let result = storage
            .dependent_update(&make_row(DependentTable::VitalSigns, 9, None))
            .await;
        assert!(matches!(
            result,
            Err(CareError::Storage(StorageError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_tables_are_isolated() -> CareResult<()> {
        let storage = MockStorage::new();
        let patient = make_patient(7);
        storage.patient_insert(&patient).await?;
        storage
            .dependent_insert(&make_row(
                DependentTable::LabResults,
                1,
                Some(patient.patient_id),
            ))
            .await?;

        assert!(storage
            .dependent_get(DependentTable::Prescriptions, Uuid::from_u128(1))
            .await?
            .is_none());
        assert_eq!(
            storage
                .dependent_list_by_patient(DependentTable::LabResults, patient.patient_id)
                .await?
                .len(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_backfill_page_skips_null_references_and_orders_by_id() -> CareResult<()> {
        let storage = MockStorage::new();
        let patient = make_patient(3);
        storage.patient_insert(&patient).await?;
        for record in [5u128, 1, 4, 2] {
            storage
                .dependent_insert(&make_row(
                    DependentTable::Admissions,
                    record,
                    Some(patient.patient_id),
                ))
                .await?;
        }
        storage
            .dependent_insert(&make_row(DependentTable::Admissions, 3, None))
            .await?;

        let first = storage
            .dependent_page_for_backfill(DependentTable::Admissions, None, 2)
            .await?;
        let ids: Vec<_> = first.iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(1), Uuid::from_u128(2)]);

        let rest = storage
            .dependent_page_for_backfill(DependentTable::Admissions, Some(Uuid::from_u128(2)), 10)
            .await?;
        let ids: Vec<_> = rest.iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(4), Uuid::from_u128(5)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_injection_budget() -> CareResult<()> {
        let storage = MockStorage::new();
        let patient = make_patient(1);
        storage.patient_insert(&patient).await?;
        let wide = patient.patient_id;
        storage
            .dependent_insert(&make_row(DependentTable::Invoices, 1, Some(wide)))
            .await?;
        storage.fail_narrow_writes_after(1);

        let id = Uuid::from_u128(1);
        assert!(
            storage
                .dependent_set_narrow(DependentTable::Invoices, id, wide, 10)
                .await?
        );
        assert!(storage
            .dependent_set_narrow(DependentTable::Invoices, id, wide, 11)
            .await
            .is_err());

        storage.clear_failure_injection();
        storage
            .dependent_set_narrow(DependentTable::Invoices, id, wide, 12)
            .await?;
        let row = storage.dependent_get(DependentTable::Invoices, id).await?;
        assert_eq!(row.and_then(|r| r.patient_narrow_id), Some(12));
        Ok(())
    }

    #[tokio::test]
    async fn test_set_narrow_requires_matching_reference() -> CareResult<()> {
        let storage = MockStorage::new();
        let first = make_patient(1);
        let second = make_patient(2);
        storage.patient_insert(&first).await?;
        storage.patient_insert(&second).await?;
        let mut row = make_row(DependentTable::LabResults, 5, Some(second.patient_id));
        row.patient_narrow_id = Some(77);
        storage.dependent_insert(&row).await?;

        let id = Uuid::from_u128(5);
        let written = storage
            .dependent_set_narrow(DependentTable::LabResults, id, first.patient_id, 1)
            .await?;
        assert!(!written);
        let missing = storage
            .dependent_set_narrow(DependentTable::LabResults, Uuid::from_u128(6), first.patient_id, 1)
            .await?;
        assert!(!missing);

        let stored = storage.dependent_get(DependentTable::LabResults, id).await?;
        assert_eq!(stored.and_then(|r| r.patient_narrow_id), Some(77));
        Ok(())
    }

    #[tokio::test]
    async fn test_health_check() -> CareResult<()> {
        assert!(MockStorage::new().health_check().await?);
        Ok(())
    }

    // ========================================================================
    // Property-Based Tests
    // ========================================================================

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("test runtime")
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Getting a non-existent entity returns Ok(None).
        #[test]
        fn prop_storage_not_found_returns_none(raw in any::<u128>()) {
            let storage = MockStorage::new();
            let id = Uuid::from_u128(raw);
            let rt = runtime();

            prop_assert!(rt.block_on(storage.patient_get(id)).unwrap().is_none());
            for table in DependentTable::all() {
                prop_assert!(rt.block_on(storage.dependent_get(*table, id)).unwrap().is_none());
            }
        }

        /// Backfill pages never contain a row at or before the cursor.
        #[test]
        fn prop_backfill_page_respects_cursor(
            ids in proptest::collection::btree_set(0u128..500, 0..30),
            cursor in 0u128..500,
        ) {
            let storage = MockStorage::new();
            let rt = runtime();
            let patient = make_patient(u128::MAX);
            rt.block_on(storage.patient_insert(&patient)).unwrap();
            for id in &ids {
                let row = make_row(DependentTable::MedicalRecords, *id, Some(patient.patient_id));
                rt.block_on(storage.dependent_insert(&row)).unwrap();
            }

            let after = Uuid::from_u128(cursor);
            let page = rt
                .block_on(storage.dependent_page_for_backfill(
                    DependentTable::MedicalRecords,
                    Some(after),
                    usize::MAX,
                ))
                .unwrap();

            let expected = ids.iter().filter(|id| **id > cursor).count();
            prop_assert_eq!(page.len(), expected);
            prop_assert!(page.iter().all(|r| r.record_id > after));
        }
    }
}
