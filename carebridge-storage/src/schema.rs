//! Versioned, additive schema migrations.
//!
//! Every statement is idempotent (`IF NOT EXISTS` / `OR REPLACE`) and nothing
//! is ever dropped, so applying a migration to a database that already holds
//! data leaves that data in place. Applied versions are recorded in
//! `schema_migrations`.

/// Narrow-id expression over a UUID column, evaluated by PostgreSQL.
///
/// Mirrors [`carebridge_core::derive_narrow_id`]: first 8 hex digits of the
/// SHA-256 of the canonical text, read as a signed big-endian 32-bit int.
macro_rules! narrow_expr {
    ($col:literal) => {
        concat!(
            "('x' || substr(encode(sha256(convert_to(",
            $col,
            "::text, 'UTF8')), 'hex'), 1, 8))::bit(32)::int"
        )
    };
}

macro_rules! dependent_table_ddl {
    ($table:literal) => {
        concat!(
            "CREATE TABLE IF NOT EXISTS ",
            $table,
            " (
    id UUID PRIMARY KEY,
    patient_uuid UUID REFERENCES patients (patient_id),
    patient_id INTEGER,
    payload JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"
        )
    };
}

macro_rules! patient_uuid_index {
    ($table:literal) => {
        concat!(
            "CREATE INDEX IF NOT EXISTS idx_",
            $table,
            "_patient_uuid ON ",
            $table,
            " (patient_uuid)"
        )
    };
}

/// One schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

/// All migrations, oldest first.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "schema_migrations",
        statements: &["CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"],
    },
    Migration {
        version: 2,
        name: "patients",
        statements: &["CREATE TABLE IF NOT EXISTS patients (
    patient_id UUID PRIMARY KEY,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    date_of_birth DATE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"],
    },
    Migration {
        version: 3,
        name: "dependent_tables",
        statements: &[
            dependent_table_ddl!("medical_records"),
            dependent_table_ddl!("appointments"),
            dependent_table_ddl!("prescriptions"),
            dependent_table_ddl!("lab_results"),
            dependent_table_ddl!("invoices"),
            dependent_table_ddl!("bed_assignments"),
            dependent_table_ddl!("admissions"),
            dependent_table_ddl!("vital_signs"),
            dependent_table_ddl!("insurance_claims"),
            dependent_table_ddl!("discharge_summaries"),
        ],
    },
    Migration {
        version: 4,
        name: "patients_compat_view",
        statements: &[concat!(
            "CREATE OR REPLACE VIEW patients_compat AS
SELECT ",
            narrow_expr!("p.patient_id"),
            " AS id,
    p.patient_id,
    p.first_name || ' ' || p.last_name AS name,
    p.first_name,
    p.last_name,
    p.date_of_birth,
    p.created_at
FROM patients p"
        )],
    },
    Migration {
        version: 5,
        name: "patient_uuid_indexes",
        statements: &[
            patient_uuid_index!("medical_records"),
            patient_uuid_index!("appointments"),
            patient_uuid_index!("prescriptions"),
            patient_uuid_index!("lab_results"),
            patient_uuid_index!("invoices"),
            patient_uuid_index!("bed_assignments"),
            patient_uuid_index!("admissions"),
            patient_uuid_index!("vital_signs"),
            patient_uuid_index!("insurance_claims"),
            patient_uuid_index!("discharge_summaries"),
            "CREATE INDEX IF NOT EXISTS idx_patients_created_at ON patients (created_at, patient_id)",
        ],
    },
];

/// SQL expression computing the narrow id of a UUID column.
pub fn narrow_id_sql(column: &str) -> String {
    format!(
        "('x' || substr(encode(sha256(convert_to({column}::text, 'UTF8')), 'hex'), 1, 8))::bit(32)::int"
    )
}

/// Migrations whose version is not in `applied`, oldest first.
pub fn pending(applied: &[u32]) -> Vec<&'static Migration> {
    MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .collect()
}

/// Check that versions strictly increase and that no statement destroys data.
pub fn validate_migrations() -> Result<(), String> {
    let mut previous = 0;
    for migration in MIGRATIONS {
        if migration.version <= previous {
            return Err(format!(
                "migration {} ({}) is not newer than {}",
                migration.version, migration.name, previous
            ));
        }
        previous = migration.version;

        for statement in migration.statements {
            let upper = statement.to_uppercase();
            for forbidden in ["DROP ", "TRUNCATE ", "DELETE FROM"] {
                if upper.contains(forbidden) {
                    return Err(format!(
                        "migration {} ({}) contains {}",
                        migration.version,
                        migration.name,
                        forbidden.trim()
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebridge_core::DependentTable;

    #[test]
    fn test_migrations_are_valid() {
        assert_eq!(validate_migrations(), Ok(()));
    }

    #[test]
    fn test_every_dependent_table_created_and_indexed() {
        let all: Vec<&str> = MIGRATIONS
            .iter()
            .flat_map(|m| m.statements.iter().copied())
            .collect();
        for table in DependentTable::all() {
            let create = format!("CREATE TABLE IF NOT EXISTS {} (", table.table_name());
            let index = format!("ON {} (patient_uuid)", table.table_name());
            assert!(all.iter().any(|s| s.contains(&create)), "{table} missing");
            assert!(all.iter().any(|s| s.contains(&index)), "{table} unindexed");
        }
    }

    #[test]
    fn test_view_uses_same_expression() {
        let view = MIGRATIONS
            .iter()
            .find(|m| m.name == "patients_compat_view")
            .map(|m| m.statements[0]);
        assert!(view.is_some_and(|sql| sql.contains(&narrow_id_sql("p.patient_id"))));
    }

    #[test]
    fn test_narrow_id_sql_renders_column() {
        let sql = narrow_id_sql("patient_uuid");
        assert!(sql.starts_with("('x' || substr(encode(sha256(convert_to(patient_uuid::text"));
        assert!(sql.ends_with("::bit(32)::int"));
    }

    #[test]
    fn test_pending_skips_applied() {
        let versions: Vec<u32> = pending(&[1, 2, 4]).iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![3, 5]);
        assert!(pending(&[1, 2, 3, 4, 5]).is_empty());
        assert_eq!(pending(&[]).len(), MIGRATIONS.len());
    }

    #[test]
    fn test_statements_are_idempotent() {
        for migration in MIGRATIONS {
            for statement in migration.statements {
                assert!(
                    statement.contains("IF NOT EXISTS") || statement.contains("OR REPLACE"),
                    "{} not idempotent",
                    migration.name
                );
            }
        }
    }
}
