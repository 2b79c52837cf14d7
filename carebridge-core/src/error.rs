//! Error types for CareBridge operations

use crate::entities::{DependentTable, EntityType};
use thiserror::Error;
use uuid::Uuid;

/// Identifier parsing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid identifier format: {input:?} is not a UUID")]
    InvalidIdentifierFormat { input: String },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Insert failed for {entity_type}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Update failed for {entity_type} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: Uuid,
        reason: String,
    },

    #[error("Storage backend failure: {reason}")]
    BackendFailure { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Backfill of {table} stopped after {reconciled} rows: {reason}")]
    PartialBackfillFailure {
        table: DependentTable,
        reconciled: u64,
        /// Row being written when the failure hit; `None` if a page read failed.
        failed_record_id: Option<Uuid>,
        reason: String,
    },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown dependent table: {name}")]
    UnknownTable { name: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all CareBridge errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CareError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for CareBridge operations.
pub type CareResult<T> = Result<T, CareError>;
