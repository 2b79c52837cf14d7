//! End-to-end smoke tests against a live PostgreSQL.
//!
//! Run with `--features db-tests` and `CAREBRIDGE_DB_*` pointing at a
//! scratch database.

#![cfg(feature = "db-tests")]

use carebridge_api::{ApiResult, DbClient, DbConfig};
use carebridge_core::{derive_narrow_id, DependentTable, ReconcileConfig};
use carebridge_storage::{AsyncStorageTrait, ReconcilingStore};
use carebridge_test_utils::assertions::assert_narrow_synced;
use carebridge_test_utils::fixtures::{new_patient, sample_row};
use std::sync::Arc;

async fn test_db() -> ApiResult<Arc<DbClient>> {
    let db = DbClient::from_config(&DbConfig::from_env())?;
    db.run_migrations().await?;
    Ok(Arc::new(db))
}

#[tokio::test]
async fn smoke_write_path_and_compat_lookup() -> ApiResult<()> {
    let db = test_db().await?;
    let store = ReconcilingStore::with_narrow_id_sync(db.clone());

    let patient = store.create_patient(new_patient("Smoke", "Test")).await?;
    let row = store
        .insert_dependent(sample_row(DependentTable::LabResults, Some(patient.patient_id)))
        .await?;
    assert_narrow_synced(&row);

    let fetched = db
        .dependent_get(DependentTable::LabResults, row.record_id)
        .await?
        .map(|r| r.patient_narrow_id);
    assert_eq!(fetched, Some(Some(derive_narrow_id(patient.patient_id))));

    let view = store
        .patient_compat_get(derive_narrow_id(patient.patient_id))
        .await?;
    assert!(view.is_some());
    Ok(())
}

#[tokio::test]
async fn smoke_backfill_is_idempotent() -> ApiResult<()> {
    let db = test_db().await?;
    let store = ReconcilingStore::with_narrow_id_sync(db);
    let config = ReconcileConfig::default();

    store.backfill(DependentTable::Invoices, &config).await?;
    let second = store.backfill(DependentTable::Invoices, &config).await?;
    assert_eq!(second.updated, 0);
    Ok(())
}

#[tokio::test]
async fn smoke_narrow_write_checks_current_reference() -> ApiResult<()> {
    let db = test_db().await?;
    let store = ReconcilingStore::with_narrow_id_sync(db.clone());

    let first = store.create_patient(new_patient("Stale", "Read")).await?;
    let second = store.create_patient(new_patient("Fresh", "Write")).await?;
    let row = store
        .insert_dependent(sample_row(DependentTable::Invoices, Some(second.patient_id)))
        .await?;

    let written = db
        .dependent_set_narrow(
            DependentTable::Invoices,
            row.record_id,
            first.patient_id,
            derive_narrow_id(first.patient_id),
        )
        .await?;
    assert!(!written);

    let stored = db.dependent_get(DependentTable::Invoices, row.record_id).await?;
    assert_eq!(
        stored.and_then(|r| r.patient_narrow_id),
        Some(derive_narrow_id(second.patient_id))
    );
    Ok(())
}

#[tokio::test]
async fn smoke_migrations_are_idempotent() -> ApiResult<()> {
    let db = test_db().await?;
    assert!(db.run_migrations().await?.is_empty());
    Ok(())
}
