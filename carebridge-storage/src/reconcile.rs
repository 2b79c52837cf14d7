//! Storage-access layer that keeps narrow-id caches in sync on every write.

use std::sync::Arc;

use carebridge_core::{
    derive_narrow_id, new_wide_id, project_patients, CareError, CareResult, DependentPatch,
    DependentRow, DependentTable, EntityType, NarrowId, NewPatient, Patient, PatientCompatView,
    ReconcileConfig, StorageError, WideId,
};

use crate::async_trait::AsyncStorageTrait;
use crate::backfill::{backfill, backfill_all, BackfillReport};
use crate::hooks::{HookRegistry, WriteOp};

/// Write-path interceptor over any [`AsyncStorageTrait`] backend.
///
/// Every dependent-record insert and update goes through the table's
/// registered hooks before it reaches the backend. Reads pass straight through.
#[derive(Clone)]
pub struct ReconcilingStore {
    backend: Arc<dyn AsyncStorageTrait>,
    hooks: Arc<HookRegistry>,
}

impl ReconcilingStore {
    pub fn new(backend: Arc<dyn AsyncStorageTrait>, hooks: HookRegistry) -> Self {
        Self {
            backend,
            hooks: Arc::new(hooks),
        }
    }

    /// Store with only the narrow-id sync hook registered.
    pub fn with_narrow_id_sync(backend: Arc<dyn AsyncStorageTrait>) -> Self {
        Self::new(backend, HookRegistry::with_narrow_id_sync())
    }

    pub fn backend(&self) -> &Arc<dyn AsyncStorageTrait> {
        &self.backend
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Narrow id for a wide id, without touching storage.
    pub fn derive(&self, wide: WideId) -> NarrowId {
        derive_narrow_id(wide)
    }

    // ========================================================================
    // PATIENTS
    // ========================================================================

    /// Create a patient. The wide id is assigned here and never changes.
    pub async fn create_patient(&self, new: NewPatient) -> CareResult<Patient> {
        new.validate()?;
        let now = chrono::Utc::now();
        let patient = Patient {
            patient_id: new_wide_id(),
            first_name: new.first_name.trim().to_string(),
            last_name: new.last_name.trim().to_string(),
            date_of_birth: new.date_of_birth,
            created_at: now,
            updated_at: now,
        };
        self.backend.patient_insert(&patient).await?;
        tracing::info!(patient_id = %patient.patient_id, "Created patient");
        Ok(patient)
    }

    pub async fn patient_get(&self, id: WideId) -> CareResult<Option<Patient>> {
        self.backend.patient_get(id).await
    }

    pub async fn patient_list(&self, limit: i64, offset: i64) -> CareResult<Vec<Patient>> {
        self.backend.patient_list(limit, offset).await
    }

    /// Patients projected under their narrow ids.
    pub async fn patient_compat_list(
        &self,
        limit: i64,
        offset: i64,
    ) -> CareResult<Vec<PatientCompatView>> {
        let patients = self.backend.patient_list(limit, offset).await?;
        Ok(project_patients(&patients))
    }

    /// Look a patient up by narrow id. Collisions resolve to the oldest patient.
    pub async fn patient_compat_get(&self, narrow: NarrowId) -> CareResult<Option<PatientCompatView>> {
        let patient = self.backend.patient_find_by_narrow_id(narrow).await?;
        Ok(patient.as_ref().map(PatientCompatView::from))
    }

    // ========================================================================
    // DEPENDENT RECORDS
    // ========================================================================

    /// Insert a dependent row through the hooks.
    ///
    /// A nil `record_id` is replaced with a fresh wide id.
    pub async fn insert_dependent(&self, mut row: DependentRow) -> CareResult<DependentRow> {
        if row.record_id.is_nil() {
            row.record_id = new_wide_id();
        }
        let now = chrono::Utc::now();
        row.created_at = now;
        row.updated_at = now;

        self.hooks.run(row.table, &mut row, WriteOp::Insert)?;
        self.backend.dependent_insert(&row).await?;

        tracing::debug!(
            table = %row.table,
            record_id = %row.record_id,
            patient_id = ?row.patient_id,
            narrow_id = ?row.patient_narrow_id,
            "Inserted dependent record"
        );
        Ok(row)
    }

    /// Apply a patch to a stored row and write it back through the hooks.
    ///
    /// Concurrent updates of the same row are last-writer-wins.
    pub async fn update_dependent(
        &self,
        table: DependentTable,
        record_id: WideId,
        patch: DependentPatch,
    ) -> CareResult<DependentRow> {
        let mut row = self
            .backend
            .dependent_get(table, record_id)
            .await?
            .ok_or(CareError::Storage(StorageError::NotFound {
                entity_type: EntityType::Dependent(table),
                id: record_id,
            }))?;

        patch.apply(&mut row);
        self.hooks.run(table, &mut row, WriteOp::Update)?;
        self.backend.dependent_update(&row).await?;

        tracing::debug!(
            table = %table,
            record_id = %record_id,
            patient_id = ?row.patient_id,
            narrow_id = ?row.patient_narrow_id,
            "Updated dependent record"
        );
        Ok(row)
    }

    pub async fn dependent_get(
        &self,
        table: DependentTable,
        record_id: WideId,
    ) -> CareResult<Option<DependentRow>> {
        self.backend.dependent_get(table, record_id).await
    }

    pub async fn dependent_list(
        &self,
        table: DependentTable,
        limit: i64,
        offset: i64,
    ) -> CareResult<Vec<DependentRow>> {
        self.backend.dependent_list(table, limit, offset).await
    }

    pub async fn dependent_list_by_patient(
        &self,
        table: DependentTable,
        patient_id: WideId,
    ) -> CareResult<Vec<DependentRow>> {
        self.backend.dependent_list_by_patient(table, patient_id).await
    }

    // ========================================================================
    // BACKFILL
    // ========================================================================

    /// Recompute narrow ids for existing rows of one table.
    pub async fn backfill(
        &self,
        table: DependentTable,
        config: &ReconcileConfig,
    ) -> CareResult<BackfillReport> {
        backfill(self.backend.as_ref(), table, config).await
    }

    /// Recompute narrow ids for every dependent table.
    pub async fn backfill_all(&self, config: &ReconcileConfig) -> CareResult<Vec<BackfillReport>> {
        backfill_all(self.backend.as_ref(), config).await
    }

    pub async fn health_check(&self) -> CareResult<bool> {
        self.backend.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockStorage;
    use serde_json::json;
    use uuid::Uuid;

    fn store() -> (Arc<MockStorage>, ReconcilingStore) {
        let mock = Arc::new(MockStorage::new());
        let store = ReconcilingStore::with_narrow_id_sync(mock.clone());
        (mock, store)
    }

    async fn patient(store: &ReconcilingStore, first: &str) -> CareResult<Patient> {
        store
            .create_patient(NewPatient {
                first_name: first.to_string(),
                last_name: "Mensah".to_string(),
                date_of_birth: None,
            })
            .await
    }

    #[tokio::test]
    async fn test_insert_syncs_narrow_id() -> CareResult<()> {
        let (mock, store) = store();
        let p = patient(&store, "Kofi").await?;

        let mut row = DependentRow::new(
            DependentTable::MedicalRecords,
            Some(p.patient_id),
            json!({ "diagnosis": "J45.909" }),
        );
        row.patient_narrow_id = Some(1);
        let saved = store.insert_dependent(row).await?;

        assert!(!saved.record_id.is_nil());
        let stored = mock
            .dependent_get(DependentTable::MedicalRecords, saved.record_id)
            .await?
            .ok_or(CareError::Storage(StorageError::LockPoisoned))?;
        assert_eq!(stored.patient_narrow_id, Some(derive_narrow_id(p.patient_id)));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_resyncs_when_reference_changes() -> CareResult<()> {
        let (_mock, store) = store();
        let a = patient(&store, "Ama").await?;
        let b = patient(&store, "Yaw").await?;

        let saved = store
            .insert_dependent(DependentRow::new(
                DependentTable::BedAssignments,
                Some(a.patient_id),
                json!({ "bed": "4B" }),
            ))
            .await?;

        let updated = store
            .update_dependent(
                DependentTable::BedAssignments,
                saved.record_id,
                DependentPatch {
                    patient_id: Some(Some(b.patient_id)),
                    payload: None,
                },
            )
            .await?;

        assert_eq!(updated.patient_id, Some(b.patient_id));
        assert_eq!(updated.patient_narrow_id, Some(derive_narrow_id(b.patient_id)));
        assert_eq!(updated.payload, json!({ "bed": "4B" }));
        Ok(())
    }

    #[tokio::test]
    async fn test_clearing_reference_keeps_cache() -> CareResult<()> {
        let (_mock, store) = store();
        let a = patient(&store, "Efua").await?;
        let saved = store
            .insert_dependent(DependentRow::new(
                DependentTable::Invoices,
                Some(a.patient_id),
                json!({ "amount_cents": 5000 }),
            ))
            .await?;

        let updated = store
            .update_dependent(
                DependentTable::Invoices,
                saved.record_id,
                DependentPatch {
                    patient_id: Some(None),
                    payload: None,
                },
            )
            .await?;

        assert_eq!(updated.patient_id, None);
        assert_eq!(updated.patient_narrow_id, Some(derive_narrow_id(a.patient_id)));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let (_mock, store) = store();
        let id = Uuid::from_u128(99);
        let result = store
            .update_dependent(DependentTable::LabResults, id, DependentPatch::default())
            .await;
        assert_eq!(
            result,
            Err(CareError::Storage(StorageError::NotFound {
                entity_type: EntityType::Dependent(DependentTable::LabResults),
                id,
            }))
        );
    }

    #[tokio::test]
    async fn test_compat_lookup_by_narrow_id() -> CareResult<()> {
        let (_mock, store) = store();
        let p = patient(&store, "Abena").await?;
        let view = store.patient_compat_get(store.derive(p.patient_id)).await?;
        assert_eq!(view.map(|v| v.name), Some("Abena Mensah".to_string()));

        let listed = store.patient_compat_list(10, 0).await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, derive_narrow_id(p.patient_id));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_patient_rejects_blank_names() {
        let (mock, store) = store();
        let result = store
            .create_patient(NewPatient {
                first_name: String::new(),
                last_name: "X".to_string(),
                date_of_birth: None,
            })
            .await;
        assert!(matches!(result, Err(CareError::Validation(_))));
        assert_eq!(mock.patient_count(), 0);
    }
}
