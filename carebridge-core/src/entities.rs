//! Entity types: patients and the records that depend on them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::identity::{NarrowId, Timestamp, WideId};

// ============================================================================
// DEPENDENT TABLES
// ============================================================================

/// Tables whose rows reference a patient by wide id and cache its narrow id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum DependentTable {
    MedicalRecords,
    Appointments,
    Prescriptions,
    LabResults,
    Invoices,
    BedAssignments,
    Admissions,
    VitalSigns,
    InsuranceClaims,
    DischargeSummaries,
}

impl DependentTable {
    const ALL: [DependentTable; 10] = [
        DependentTable::MedicalRecords,
        DependentTable::Appointments,
        DependentTable::Prescriptions,
        DependentTable::LabResults,
        DependentTable::Invoices,
        DependentTable::BedAssignments,
        DependentTable::Admissions,
        DependentTable::VitalSigns,
        DependentTable::InsuranceClaims,
        DependentTable::DischargeSummaries,
    ];

    /// Every dependent table, in migration order.
    pub fn all() -> &'static [DependentTable] {
        &Self::ALL
    }

    /// SQL table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            DependentTable::MedicalRecords => "medical_records",
            DependentTable::Appointments => "appointments",
            DependentTable::Prescriptions => "prescriptions",
            DependentTable::LabResults => "lab_results",
            DependentTable::Invoices => "invoices",
            DependentTable::BedAssignments => "bed_assignments",
            DependentTable::Admissions => "admissions",
            DependentTable::VitalSigns => "vital_signs",
            DependentTable::InsuranceClaims => "insurance_claims",
            DependentTable::DischargeSummaries => "discharge_summaries",
        }
    }
}

impl fmt::Display for DependentTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for DependentTable {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|table| table.table_name() == wanted)
            .ok_or_else(|| ValidationError::UnknownTable {
                name: s.to_string(),
            })
    }
}

/// Entity type discriminator used in error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Patient,
    Dependent(DependentTable),
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Patient => f.write_str("patients"),
            EntityType::Dependent(table) => fmt::Display::fmt(table, f),
        }
    }
}

// ============================================================================
// PATIENTS
// ============================================================================

/// A patient, the entity every dependent record points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Patient {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub patient_id: WideId,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

/// Fields supplied when creating a patient. The wide id is assigned by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
}

impl NewPatient {
    /// Reject blank names.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.first_name.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "first_name".to_string(),
            });
        }
        if self.last_name.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "last_name".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// DEPENDENT RECORDS
// ============================================================================

/// Access to the identity columns of a dependent record.
///
/// The wide reference is authoritative. The narrow column is a cache kept in
/// step with it by the write path.
pub trait DependentRecord: Send {
    /// Table the record belongs to.
    fn table(&self) -> DependentTable;

    /// Wide reference to the patient, if set.
    fn patient_id(&self) -> Option<WideId>;

    /// Cached narrow id of the patient.
    fn patient_narrow_id(&self) -> Option<NarrowId>;

    /// Overwrite the cached narrow id.
    fn set_patient_narrow_id(&mut self, narrow: NarrowId);
}

/// Stored shape shared by every dependent table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DependentRow {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub record_id: WideId,
    pub table: DependentTable,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub patient_id: Option<WideId>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<i32>))]
    pub patient_narrow_id: Option<NarrowId>,
    /// Table-specific columns (diagnosis, amount, bed number, ...).
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl DependentRow {
    /// Build an unsaved row. `record_id` stays nil until storage assigns it.
    pub fn new(table: DependentTable, patient_id: Option<WideId>, payload: serde_json::Value) -> Self {
        let now = chrono::Utc::now();
        Self {
            record_id: Uuid::nil(),
            table,
            patient_id,
            patient_narrow_id: None,
            payload,
            created_at: now,
            updated_at: now,
        }
    }

    /// Entity type for error context.
    pub fn entity_type(&self) -> EntityType {
        EntityType::Dependent(self.table)
    }
}

impl DependentRecord for DependentRow {
    fn table(&self) -> DependentTable {
        self.table
    }

    fn patient_id(&self) -> Option<WideId> {
        self.patient_id
    }

    fn patient_narrow_id(&self) -> Option<NarrowId> {
        self.patient_narrow_id
    }

    fn set_patient_narrow_id(&mut self, narrow: NarrowId) {
        self.patient_narrow_id = Some(narrow);
    }
}

/// Partial update of a dependent row.
///
/// `patient_id: Some(None)` clears the wide reference; the narrow cache is
/// then left as it was.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependentPatch {
    pub patient_id: Option<Option<WideId>>,
    pub payload: Option<serde_json::Value>,
}

impl DependentPatch {
    pub fn is_empty(&self) -> bool {
        self.patient_id.is_none() && self.payload.is_none()
    }

    /// Apply the patch in place and bump `updated_at`.
    pub fn apply(self, row: &mut DependentRow) {
        if let Some(patient_id) = self.patient_id {
            row.patient_id = patient_id;
        }
        if let Some(payload) = self.payload {
            row.payload = payload;
        }
        row.updated_at = chrono::Utc::now();
    }
}
