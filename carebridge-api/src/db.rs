//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres, the schema
//! migration runner, and the PostgreSQL implementation of
//! [`AsyncStorageTrait`].
//!
//! Queries here are plain SQL against the migrated schema. The narrow-id
//! column of dependent tables is written with whatever the caller supplies;
//! keeping it in sync is the job of the reconciling write path above.

use std::time::Duration;

use async_trait::async_trait;
use carebridge_core::{
    CareError, CareResult, DependentRow, DependentTable, EntityType, NarrowId, Patient,
    StorageError, WideId,
};
use carebridge_storage::{narrow_id_sql, pending, validate_migrations, AsyncStorageTrait, MIGRATIONS};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Time to wait for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "carebridge".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from `CAREBRIDGE_DB_*` variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("CAREBRIDGE_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("CAREBRIDGE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("CAREBRIDGE_DB_NAME")
                .unwrap_or_else(|_| "carebridge".to_string()),
            user: std::env::var("CAREBRIDGE_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("CAREBRIDGE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("CAREBRIDGE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("CAREBRIDGE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

/// PostgreSQL storage backend over a connection pool.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Current pool size, for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> ApiResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(ApiError::from)
    }

    /// Connection for the storage trait, with pool errors as storage errors.
    async fn storage_conn(&self) -> CareResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            tracing::error!("Connection pool error: {:?}", e);
            backend_failure(e)
        })
    }

    // ========================================================================
    // MIGRATIONS
    // ========================================================================

    /// Apply every migration not yet recorded in `schema_migrations`.
    ///
    /// Each migration runs in its own transaction together with its
    /// bookkeeping row. Returns the versions applied by this call.
    pub async fn run_migrations(&self) -> ApiResult<Vec<u32>> {
        validate_migrations().map_err(ApiError::internal_error)?;

        let mut conn = self.get_conn().await?;

        // The bookkeeping table must exist before it can be read.
        if let Some(bootstrap) = MIGRATIONS.first() {
            for statement in bootstrap.statements {
                conn.batch_execute(statement).await?;
            }
        }

        let applied: Vec<u32> = conn
            .query("SELECT version FROM schema_migrations", &[])
            .await?
            .iter()
            .filter_map(|row| row.try_get::<_, i32>(0).ok())
            .filter_map(|v| u32::try_from(v).ok())
            .collect();

        let mut newly_applied = Vec::new();
        for migration in pending(&applied) {
            let tx = conn.transaction().await?;
            for statement in migration.statements {
                tx.batch_execute(statement).await?;
            }
            let version = i32::try_from(migration.version).map_err(|_| {
                ApiError::internal_error(format!("Migration version {} too large", migration.version))
            })?;
            tx.execute(
                "INSERT INTO schema_migrations (version, name) VALUES ($1, $2) \
                 ON CONFLICT (version) DO NOTHING",
                &[&version, &migration.name],
            )
            .await?;
            tx.commit().await?;

            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applied migration"
            );
            newly_applied.push(migration.version);
        }

        if newly_applied.is_empty() {
            tracing::debug!("Schema up to date");
        }
        Ok(newly_applied)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const PATIENT_COLUMNS: &str = "patient_id, first_name, last_name, date_of_birth, created_at, updated_at";
const DEPENDENT_COLUMNS: &str = "id, patient_uuid, patient_id, payload, created_at, updated_at";

fn backend_failure(err: impl std::fmt::Display) -> CareError {
    CareError::Storage(StorageError::BackendFailure {
        reason: err.to_string(),
    })
}

fn query_failure(err: tokio_postgres::Error) -> CareError {
    tracing::error!("Database error: {:?}", err);
    backend_failure(err)
}

/// Reason string for a failed write, naming constraint violations.
fn write_failure_reason(err: &tokio_postgres::Error) -> String {
    match err.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => "already exists".to_string(),
        Some(code) if *code == SqlState::FOREIGN_KEY_VIOLATION => {
            "referenced patient does not exist".to_string()
        }
        _ => err.to_string(),
    }
}

fn patient_from_row(row: &Row) -> CareResult<Patient> {
    Ok(Patient {
        patient_id: row.try_get("patient_id").map_err(query_failure)?,
        first_name: row.try_get("first_name").map_err(query_failure)?,
        last_name: row.try_get("last_name").map_err(query_failure)?,
        date_of_birth: row.try_get("date_of_birth").map_err(query_failure)?,
        created_at: row.try_get("created_at").map_err(query_failure)?,
        updated_at: row.try_get("updated_at").map_err(query_failure)?,
    })
}

fn dependent_from_row(table: DependentTable, row: &Row) -> CareResult<DependentRow> {
    Ok(DependentRow {
        record_id: row.try_get("id").map_err(query_failure)?,
        table,
        patient_id: row.try_get("patient_uuid").map_err(query_failure)?,
        patient_narrow_id: row.try_get("patient_id").map_err(query_failure)?,
        payload: row.try_get("payload").map_err(query_failure)?,
        created_at: row.try_get("created_at").map_err(query_failure)?,
        updated_at: row.try_get("updated_at").map_err(query_failure)?,
    })
}

// ============================================================================
// STORAGE BACKEND
// ============================================================================

#[async_trait]
impl AsyncStorageTrait for DbClient {
    async fn patient_insert(&self, p: &Patient) -> CareResult<()> {
        let conn = self.storage_conn().await?;
        conn.execute(
            "INSERT INTO patients (patient_id, first_name, last_name, date_of_birth, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &p.patient_id,
                &p.first_name,
                &p.last_name,
                &p.date_of_birth,
                &p.created_at,
                &p.updated_at,
            ],
        )
        .await
        .map_err(|e| {
            CareError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Patient,
                reason: write_failure_reason(&e),
            })
        })?;
        Ok(())
    }

    async fn patient_get(&self, id: WideId) -> CareResult<Option<Patient>> {
        let conn = self.storage_conn().await?;
        let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE patient_id = $1");
        let row = conn.query_opt(&sql, &[&id]).await.map_err(query_failure)?;
        row.as_ref().map(patient_from_row).transpose()
    }

    async fn patient_list(&self, limit: i64, offset: i64) -> CareResult<Vec<Patient>> {
        let conn = self.storage_conn().await?;
        let sql = format!(
            "SELECT {PATIENT_COLUMNS} FROM patients \
             ORDER BY created_at, patient_id LIMIT $1 OFFSET $2"
        );
        let rows = conn
            .query(&sql, &[&limit.max(0), &offset.max(0)])
            .await
            .map_err(query_failure)?;
        rows.iter().map(patient_from_row).collect()
    }

    async fn patient_find_by_narrow_id(&self, narrow: NarrowId) -> CareResult<Option<Patient>> {
        let conn = self.storage_conn().await?;
        // Collisions resolve to the oldest patient.
        let sql = format!(
            "SELECT {PATIENT_COLUMNS} FROM patients WHERE {} = $1 \
             ORDER BY created_at, patient_id LIMIT 1",
            narrow_id_sql("patient_id")
        );
        let row = conn.query_opt(&sql, &[&narrow]).await.map_err(query_failure)?;
        row.as_ref().map(patient_from_row).transpose()
    }

    async fn dependent_insert(&self, row: &DependentRow) -> CareResult<()> {
        let conn = self.storage_conn().await?;
        let sql = format!(
            "INSERT INTO {} ({DEPENDENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)",
            row.table.table_name()
        );
        conn.execute(
            &sql,
            &[
                &row.record_id,
                &row.patient_id,
                &row.patient_narrow_id,
                &row.payload,
                &row.created_at,
                &row.updated_at,
            ],
        )
        .await
        .map_err(|e| {
            CareError::Storage(StorageError::InsertFailed {
                entity_type: row.entity_type(),
                reason: write_failure_reason(&e),
            })
        })?;
        Ok(())
    }

    async fn dependent_update(&self, row: &DependentRow) -> CareResult<()> {
        let conn = self.storage_conn().await?;
        let sql = format!(
            "UPDATE {} SET patient_uuid = $2, patient_id = $3, payload = $4, updated_at = $5 \
             WHERE id = $1",
            row.table.table_name()
        );
        let updated = conn
            .execute(
                &sql,
                &[
                    &row.record_id,
                    &row.patient_id,
                    &row.patient_narrow_id,
                    &row.payload,
                    &row.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                CareError::Storage(StorageError::UpdateFailed {
                    entity_type: row.entity_type(),
                    id: row.record_id,
                    reason: write_failure_reason(&e),
                })
            })?;

        if updated == 0 {
            return Err(CareError::Storage(StorageError::NotFound {
                entity_type: row.entity_type(),
                id: row.record_id,
            }));
        }
        Ok(())
    }

    async fn dependent_get(
        &self,
        table: DependentTable,
        record_id: WideId,
    ) -> CareResult<Option<DependentRow>> {
        let conn = self.storage_conn().await?;
        let sql = format!(
            "SELECT {DEPENDENT_COLUMNS} FROM {} WHERE id = $1",
            table.table_name()
        );
        let row = conn.query_opt(&sql, &[&record_id]).await.map_err(query_failure)?;
        row.as_ref().map(|r| dependent_from_row(table, r)).transpose()
    }

    async fn dependent_list(
        &self,
        table: DependentTable,
        limit: i64,
        offset: i64,
    ) -> CareResult<Vec<DependentRow>> {
        let conn = self.storage_conn().await?;
        let sql = format!(
            "SELECT {DEPENDENT_COLUMNS} FROM {} ORDER BY created_at, id LIMIT $1 OFFSET $2",
            table.table_name()
        );
        let rows = conn
            .query(&sql, &[&limit.max(0), &offset.max(0)])
            .await
            .map_err(query_failure)?;
        rows.iter().map(|r| dependent_from_row(table, r)).collect()
    }

    async fn dependent_list_by_patient(
        &self,
        table: DependentTable,
        patient_id: WideId,
    ) -> CareResult<Vec<DependentRow>> {
        let conn = self.storage_conn().await?;
        let sql = format!(
            "SELECT {DEPENDENT_COLUMNS} FROM {} WHERE patient_uuid = $1 ORDER BY created_at, id",
            table.table_name()
        );
        let rows = conn.query(&sql, &[&patient_id]).await.map_err(query_failure)?;
        rows.iter().map(|r| dependent_from_row(table, r)).collect()
    }

    async fn dependent_page_for_backfill(
        &self,
        table: DependentTable,
        after: Option<WideId>,
        limit: usize,
    ) -> CareResult<Vec<DependentRow>> {
        let conn = self.storage_conn().await?;
        let sql = format!(
            "SELECT {DEPENDENT_COLUMNS} FROM {} \
             WHERE patient_uuid IS NOT NULL AND ($1::uuid IS NULL OR id > $1) \
             ORDER BY id LIMIT $2",
            table.table_name()
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = conn.query(&sql, &[&after, &limit]).await.map_err(query_failure)?;
        rows.iter().map(|r| dependent_from_row(table, r)).collect()
    }

    async fn dependent_set_narrow(
        &self,
        table: DependentTable,
        record_id: WideId,
        expected_wide: WideId,
        narrow: NarrowId,
    ) -> CareResult<bool> {
        let conn = self.storage_conn().await?;
        let sql = format!(
            "UPDATE {} SET patient_id = $3, updated_at = NOW() \
             WHERE id = $1 AND patient_uuid = $2",
            table.table_name()
        );
        let updated = conn
            .execute(&sql, &[&record_id, &expected_wide, &narrow])
            .await
            .map_err(|e| {
                CareError::Storage(StorageError::UpdateFailed {
                    entity_type: EntityType::Dependent(table),
                    id: record_id,
                    reason: write_failure_reason(&e),
                })
            })?;
        Ok(updated > 0)
    }

    async fn health_check(&self) -> CareResult<bool> {
        let conn = self.storage_conn().await?;
        conn.query_one("SELECT 1", &[]).await.map_err(query_failure)?;
        Ok(true)
    }
}
