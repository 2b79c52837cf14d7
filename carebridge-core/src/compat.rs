//! Narrow-id keyed projection of patients for legacy consumers.
//!
//! Mirrors the `patients_compat` SQL view: `id` is the derived narrow id and
//! `name` joins first and last name with a single space.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entities::Patient;
use crate::identity::{derive_narrow_id, NarrowId, WideId};

/// One row of the compatibility view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PatientCompatView {
    #[cfg_attr(feature = "openapi", schema(value_type = i32))]
    pub id: NarrowId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub patient_id: WideId,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
}

impl From<&Patient> for PatientCompatView {
    fn from(patient: &Patient) -> Self {
        Self {
            id: derive_narrow_id(patient.patient_id),
            patient_id: patient.patient_id,
            name: format!("{} {}", patient.first_name, patient.last_name),
            first_name: patient.first_name.clone(),
            last_name: patient.last_name.clone(),
            date_of_birth: patient.date_of_birth,
        }
    }
}

/// Project every patient into the compatibility view.
pub fn project_patients(patients: &[Patient]) -> Vec<PatientCompatView> {
    patients.iter().map(PatientCompatView::from).collect()
}

/// Look a patient up by narrow id.
///
/// Returns the first match in input order. When two patients share a narrow
/// id the later one is unreachable through this lookup; no error is raised.
pub fn find_by_narrow_id(patients: &[Patient], narrow: NarrowId) -> Option<PatientCompatView> {
    patients
        .iter()
        .find(|p| derive_narrow_id(p.patient_id) == narrow)
        .map(PatientCompatView::from)
}
