//! Reconciliation settings.

use crate::error::{CareError, CareResult, ConfigError};

/// Settings for the reconciliation layer's batch operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Rows fetched per backfill page.
    pub backfill_batch_size: usize,
    /// Abort a backfill at the first failing row instead of skipping it.
    pub backfill_stop_on_error: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            backfill_batch_size: 500,
            backfill_stop_on_error: true,
        }
    }
}

impl ReconcileConfig {
    /// Load from environment variables.
    ///
    /// - `CAREBRIDGE_BACKFILL_BATCH_SIZE` (default: 500)
    /// - `CAREBRIDGE_BACKFILL_STOP_ON_ERROR`: "true" or "false" (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backfill_batch_size: std::env::var("CAREBRIDGE_BACKFILL_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.backfill_batch_size),
            backfill_stop_on_error: std::env::var("CAREBRIDGE_BACKFILL_STOP_ON_ERROR")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.backfill_stop_on_error),
        }
    }

    pub fn validate(&self) -> CareResult<()> {
        if self.backfill_batch_size == 0 {
            return Err(CareError::Config(ConfigError::InvalidValue {
                field: "backfill_batch_size".to_string(),
                value: self.backfill_batch_size.to_string(),
                reason: "backfill_batch_size must be positive".to_string(),
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ReconcileConfig::default();
        assert_eq!(config.backfill_batch_size, 500);
        assert!(config.backfill_stop_on_error);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config = ReconcileConfig {
            backfill_batch_size: 0,
            ..Default::default()
        };
        match config.validate() {
            Err(CareError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "backfill_batch_size");
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }
}
