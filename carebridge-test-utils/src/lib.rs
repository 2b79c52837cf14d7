//! CareBridge Test Utilities
//!
//! Centralized test infrastructure for the CareBridge workspace:
//! - Proptest generators for identifiers and entities
//! - Test fixtures for common scenarios
//! - Custom assertions for narrow-id reconciliation

// Re-export mock storage from its source crate
pub use carebridge_storage::MockStorage;

// Re-export core types for convenience
pub use carebridge_core::{
    derive_narrow_id, CareError, CareResult, DependentRow, DependentTable, EntityType, NarrowId,
    NewPatient, Patient, StorageError, Timestamp, WideId,
};

use std::collections::HashMap;
use std::ops::Range;
use uuid::Uuid;

/// Two wide ids known to share a narrow id. Used to exercise collision paths.
pub const COLLIDING_PAIR: (u128, u128) = (0x2a70, 0x10a81);

/// The narrow id both members of [`COLLIDING_PAIR`] derive to.
pub const COLLIDING_NARROW_ID: NarrowId = 1_308_029_488;

/// Scan `Uuid::from_u128(n)` for `n` in `range` and return the first pair of
/// distinct wide ids with the same narrow id.
pub fn find_narrow_collision(range: Range<u128>) -> Option<(WideId, WideId)> {
    let mut seen: HashMap<NarrowId, WideId> = HashMap::new();
    for n in range {
        let wide = Uuid::from_u128(n);
        if let Some(first) = seen.insert(derive_narrow_id(wide), wide) {
            return Some((first, wide));
        }
    }
    None
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for CareBridge types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random wide id.
    pub fn arb_wide_id() -> impl Strategy<Value = WideId> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a wide id the way production does (UUIDv7).
    pub fn arb_wide_id_v7() -> impl Strategy<Value = WideId> {
        Just(()).prop_map(|_| Uuid::now_v7())
    }

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // 2020-2030
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    pub fn arb_dependent_table() -> impl Strategy<Value = DependentTable> {
        prop::sample::select(DependentTable::all())
    }

    /// Textual spellings of a wide id the parser must accept.
    pub fn arb_wide_id_text(wide: WideId) -> impl Strategy<Value = String> {
        prop_oneof![
            Just(wide.hyphenated().to_string()),
            Just(wide.hyphenated().to_string().to_uppercase()),
            Just(wide.simple().to_string()),
            Just(wide.braced().to_string()),
            Just(wide.urn().to_string()),
        ]
    }

    pub fn arb_new_patient() -> impl Strategy<Value = NewPatient> {
        ("[A-Z][a-z]{1,12}", "[A-Z][a-z]{1,16}").prop_map(|(first, last)| NewPatient {
            first_name: first,
            last_name: last,
            date_of_birth: None,
        })
    }

    pub fn arb_patient() -> impl Strategy<Value = Patient> {
        (arb_wide_id(), arb_new_patient(), arb_timestamp()).prop_map(|(id, new, at)| Patient {
            patient_id: id,
            first_name: new.first_name,
            last_name: new.last_name,
            date_of_birth: new.date_of_birth,
            created_at: at,
            updated_at: at,
        })
    }

    /// Generate a dependent row whose cached narrow id may be missing or stale.
    pub fn arb_dependent_row() -> impl Strategy<Value = DependentRow> {
        (
            arb_dependent_table(),
            arb_wide_id(),
            proptest::option::of(arb_wide_id()),
            proptest::option::of(any::<i32>()),
            "[a-z ]{0,24}",
        )
            .prop_map(|(table, record_id, patient_id, narrow, note)| {
                let mut row = DependentRow::new(table, patient_id, serde_json::json!({ "note": note }));
                row.record_id = record_id;
                row.patient_narrow_id = narrow;
                row
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// A patient with a fresh UUIDv7 wide id.
    pub fn sample_patient() -> Patient {
        patient_with_id(Uuid::now_v7())
    }

    pub fn patient_with_id(patient_id: WideId) -> Patient {
        let now = chrono::Utc::now();
        Patient {
            patient_id,
            first_name: "Adjoa".to_string(),
            last_name: "Owusu".to_string(),
            date_of_birth: chrono::NaiveDate::from_ymd_opt(1984, 3, 6),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_patient(first: &str, last: &str) -> NewPatient {
        NewPatient {
            first_name: first.to_string(),
            last_name: last.to_string(),
            date_of_birth: None,
        }
    }

    /// A dependent row referencing `patient_id` with no narrow id cached yet.
    pub fn sample_row(table: DependentTable, patient_id: Option<WideId>) -> DependentRow {
        DependentRow::new(
            table,
            patient_id,
            serde_json::json!({ "source": "fixture", "table": table.table_name() }),
        )
    }

    /// Patients for both halves of [`COLLIDING_PAIR`], the first one older.
    pub fn colliding_patients() -> (Patient, Patient) {
        let mut first = patient_with_id(Uuid::from_u128(COLLIDING_PAIR.0));
        let second = patient_with_id(Uuid::from_u128(COLLIDING_PAIR.1));
        first.created_at = second.created_at - chrono::Duration::minutes(5);
        first.updated_at = first.created_at;
        (first, second)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for CareBridge-specific validation.

    use super::*;

    /// Assert that a row's cached narrow id matches its wide reference.
    #[track_caller]
    pub fn assert_narrow_synced(row: &DependentRow) {
        if let Some(wide) = row.patient_id {
            assert_eq!(
                row.patient_narrow_id,
                Some(derive_narrow_id(wide)),
                "{} row {} caches a stale narrow id",
                row.table,
                row.record_id
            );
        }
    }

    /// Assert that a CareResult is a NotFound storage error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &CareResult<T>, entity_type: EntityType) {
        match result {
            Err(CareError::Storage(StorageError::NotFound { entity_type: et, .. })) => {
                assert_eq!(*et, entity_type, "Wrong entity type in NotFound error");
            }
            other => panic!("Expected NotFound error for {:?}, got: {:?}", entity_type, other),
        }
    }

    /// Assert that a CareResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &CareResult<T>) {
        match result {
            Err(CareError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a CareResult is a partial backfill failure.
    #[track_caller]
    pub fn assert_partial_backfill<T: std::fmt::Debug>(result: &CareResult<T>) {
        match result {
            Err(CareError::Storage(StorageError::PartialBackfillFailure { .. })) => {}
            other => panic!("Expected PartialBackfillFailure, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
