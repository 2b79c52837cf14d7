//! Pre-persist hooks run by the write path.
//!
//! Hooks are registered per dependent table and run in registration order
//! immediately before a row is inserted or updated. The narrow-id sync hook is
//! the one every table gets; other hooks (metrics, auditing) register beside it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use carebridge_core::{derive_narrow_id, CareResult, DependentRecord, DependentTable};

/// Which write path is about to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOp {
    Insert,
    Update,
}

impl WriteOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOp::Insert => "insert",
            WriteOp::Update => "update",
        }
    }
}

/// A hook invoked on a dependent record right before it is persisted.
pub trait PrePersistHook: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Inspect or rewrite the record. An error aborts the write.
    fn before_write(&self, record: &mut dyn DependentRecord, op: WriteOp) -> CareResult<()>;
}

/// Overwrites the cached narrow id with the one derived from the wide reference.
///
/// Runs on every insert and update. A null wide reference leaves the cache as
/// it was.
#[derive(Debug, Clone, Copy, Default)]
pub struct NarrowIdSync;

impl PrePersistHook for NarrowIdSync {
    fn name(&self) -> &'static str {
        "narrow_id_sync"
    }

    fn before_write(&self, record: &mut dyn DependentRecord, op: WriteOp) -> CareResult<()> {
        if let Some(wide) = record.patient_id() {
            let narrow = derive_narrow_id(wide);
            tracing::trace!(
                table = %record.table(),
                op = op.as_str(),
                patient_id = %wide,
                narrow_id = narrow,
                "Synced narrow id"
            );
            record.set_patient_narrow_id(narrow);
        }
        Ok(())
    }
}

/// Hooks registered per dependent table.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: HashMap<DependentTable, Vec<Arc<dyn PrePersistHook>>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for table in DependentTable::all() {
            let names: Vec<&str> = self.hooks_for(*table).iter().map(|h| h.name()).collect();
            map.entry(&table.table_name(), &names);
        }
        map.finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with [`NarrowIdSync`] registered on every dependent table.
    pub fn with_narrow_id_sync() -> Self {
        let mut registry = Self::new();
        registry.register_all(Arc::new(NarrowIdSync));
        registry
    }

    /// Append a hook to one table.
    pub fn register(&mut self, table: DependentTable, hook: Arc<dyn PrePersistHook>) {
        self.hooks.entry(table).or_default().push(hook);
    }

    /// Append a hook to every dependent table.
    pub fn register_all(&mut self, hook: Arc<dyn PrePersistHook>) {
        for table in DependentTable::all() {
            self.register(*table, Arc::clone(&hook));
        }
    }

    pub fn hooks_for(&self, table: DependentTable) -> &[Arc<dyn PrePersistHook>] {
        self.hooks.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run the table's hooks in order, stopping at the first error.
    pub fn run(
        &self,
        table: DependentTable,
        record: &mut dyn DependentRecord,
        op: WriteOp,
    ) -> CareResult<()> {
        for hook in self.hooks_for(table) {
            if let Err(e) = hook.before_write(record, op) {
                tracing::warn!(
                    table = %table,
                    hook = hook.name(),
                    op = op.as_str(),
                    error = %e,
                    "Pre-persist hook rejected write"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebridge_core::{CareError, DependentRow, ValidationError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn row(table: DependentTable, patient: Option<Uuid>) -> DependentRow {
        DependentRow::new(table, patient, json!({}))
    }

    #[test]
    fn test_sync_overwrites_stale_cache() -> CareResult<()> {
        let patient = Uuid::from_u128(42);
        let mut r = row(DependentTable::MedicalRecords, Some(patient));
        r.patient_narrow_id = Some(12345);

        NarrowIdSync.before_write(&mut r, WriteOp::Update)?;

        assert_eq!(r.patient_narrow_id, Some(derive_narrow_id(patient)));
        Ok(())
    }

    #[test]
    fn test_sync_is_noop_on_null_reference() -> CareResult<()> {
        let mut r = row(DependentTable::Invoices, None);
        r.patient_narrow_id = Some(-9);
        NarrowIdSync.before_write(&mut r, WriteOp::Update)?;
        assert_eq!(r.patient_narrow_id, Some(-9));

        let mut fresh = row(DependentTable::Invoices, None);
        NarrowIdSync.before_write(&mut fresh, WriteOp::Insert)?;
        assert_eq!(fresh.patient_narrow_id, None);
        Ok(())
    }

    #[test]
    fn test_registry_covers_every_table() {
        let registry = HookRegistry::with_narrow_id_sync();
        for table in DependentTable::all() {
            let names: Vec<_> = registry.hooks_for(*table).iter().map(|h| h.name()).collect();
            assert_eq!(names, vec!["narrow_id_sync"]);
        }
    }

    #[test]
    fn test_empty_registry_runs_nothing() -> CareResult<()> {
        let registry = HookRegistry::new();
        let mut r = row(DependentTable::VitalSigns, Some(Uuid::from_u128(1)));
        registry.run(DependentTable::VitalSigns, &mut r, WriteOp::Insert)?;
        assert_eq!(r.patient_narrow_id, None);
        Ok(())
    }

    struct Counting(AtomicUsize);

    impl PrePersistHook for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn before_write(&self, _record: &mut dyn DependentRecord, _op: WriteOp) -> CareResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Reject;

    impl PrePersistHook for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        fn before_write(&self, _record: &mut dyn DependentRecord, _op: WriteOp) -> CareResult<()> {
            Err(CareError::Validation(ValidationError::InvalidValue {
                field: "payload".to_string(),
                reason: "rejected".to_string(),
            }))
        }
    }

    #[test]
    fn test_hooks_run_in_order_and_stop_on_error() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let mut registry = HookRegistry::with_narrow_id_sync();
        registry.register(DependentTable::Admissions, counter.clone());
        registry.register(DependentTable::Admissions, Arc::new(Reject));
        registry.register(DependentTable::Admissions, counter.clone());

        let patient = Uuid::from_u128(7);
        let mut r = row(DependentTable::Admissions, Some(patient));
        let result = registry.run(DependentTable::Admissions, &mut r, WriteOp::Insert);

        assert!(result.is_err());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        // The sync hook ran before the rejection.
        assert_eq!(r.patient_narrow_id, Some(derive_narrow_id(patient)));
    }

    #[test]
    fn test_registry_debug_lists_hook_names() {
        let registry = HookRegistry::with_narrow_id_sync();
        let debug = format!("{registry:?}");
        assert!(debug.contains("medical_records"));
        assert!(debug.contains("narrow_id_sync"));
    }
}
