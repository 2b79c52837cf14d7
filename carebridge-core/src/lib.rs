//! CareBridge Core - Identity and Entity Types
//!
//! Wide/narrow identifier types, the narrow-id derivation function, patient
//! and dependent-record entities, and the error types shared by every other
//! crate in the workspace.

pub mod compat;
pub mod config;
pub mod entities;
pub mod error;
pub mod identity;

pub use compat::{find_by_narrow_id, project_patients, PatientCompatView};
pub use config::ReconcileConfig;
pub use entities::{
    DependentPatch, DependentRecord, DependentRow, DependentTable, EntityType, NewPatient,
    Patient,
};
pub use error::{
    CareError, CareResult, ConfigError, IdentityError, StorageError, ValidationError,
};
pub use identity::{
    canonical_form, derive_narrow_id, derive_narrow_id_str, narrow_id_hex_prefix, new_wide_id,
    parse_wide_id, NarrowId, Timestamp, WideId,
};
