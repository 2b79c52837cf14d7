//! WebSocket Event Types
//!
//! Events broadcast to connected WebSocket clients after successful writes.

use carebridge_core::{DependentRow, DependentTable, Patient};
use serde::{Deserialize, Serialize};

use crate::types::BackfillResponse;

/// WebSocket event types for real-time updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsEvent {
    // ========================================================================
    // PATIENT EVENTS
    // ========================================================================
    /// A new patient was registered.
    PatientCreated { patient: Patient },

    // ========================================================================
    // DEPENDENT RECORD EVENTS
    // ========================================================================
    /// A dependent record was inserted. Carries the stored row, narrow id included.
    RecordCreated { record: DependentRow },

    /// A dependent record was updated.
    RecordUpdated { record: DependentRow },

    // ========================================================================
    // MAINTENANCE EVENTS
    // ========================================================================
    /// A backfill run finished for one table.
    BackfillCompleted { report: BackfillResponse },

    // ========================================================================
    // CONNECTION EVENTS
    // ========================================================================
    /// Sent once after the upgrade. `table` echoes the subscription filter.
    Connected { table: Option<DependentTable> },

    Disconnected { reason: String },

    Error { message: String },
}

impl WsEvent {
    /// Event type name, as serialized in the `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            WsEvent::PatientCreated { .. } => "PatientCreated",
            WsEvent::RecordCreated { .. } => "RecordCreated",
            WsEvent::RecordUpdated { .. } => "RecordUpdated",
            WsEvent::BackfillCompleted { .. } => "BackfillCompleted",
            WsEvent::Connected { .. } => "Connected",
            WsEvent::Disconnected { .. } => "Disconnected",
            WsEvent::Error { .. } => "Error",
        }
    }

    /// Dependent table the event concerns, if any.
    pub fn table(&self) -> Option<DependentTable> {
        match self {
            WsEvent::RecordCreated { record } | WsEvent::RecordUpdated { record } => {
                Some(record.table)
            }
            WsEvent::BackfillCompleted { report } => Some(report.table),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(table: DependentTable) -> DependentRow {
        DependentRow::new(table, None, json!({}))
    }

    #[test]
    fn test_event_type_matches_tag() -> Result<(), serde_json::Error> {
        let events = vec![
            WsEvent::RecordCreated {
                record: row(DependentTable::LabResults),
            },
            WsEvent::Connected { table: None },
            WsEvent::Disconnected {
                reason: "bye".to_string(),
            },
            WsEvent::Error {
                message: "lagged".to_string(),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event)?;
            assert_eq!(value["type"], event.event_type());
        }
        Ok(())
    }

    #[test]
    fn test_table_of_event() {
        let created = WsEvent::RecordUpdated {
            record: row(DependentTable::Admissions),
        };
        assert_eq!(created.table(), Some(DependentTable::Admissions));

        let report = WsEvent::BackfillCompleted {
            report: BackfillResponse {
                table: DependentTable::Invoices,
                scanned: 3,
                updated: 2,
                unchanged: 1,
                skipped: 0,
                failed: 0,
            },
        };
        assert_eq!(report.table(), Some(DependentTable::Invoices));
        assert_eq!(WsEvent::Connected { table: None }.table(), None);
    }

    #[test]
    fn test_record_event_round_trips() -> Result<(), serde_json::Error> {
        let event = WsEvent::RecordCreated {
            record: row(DependentTable::VitalSigns),
        };
        let json = serde_json::to_string(&event)?;
        assert!(json.contains("\"table\":\"vital_signs\""));
        let back: WsEvent = serde_json::from_str(&json)?;
        assert_eq!(back, event);
        Ok(())
    }
}
