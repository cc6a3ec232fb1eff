use crate::error::{StoreError, StoreResult};
use crate::sql_store::migrations::MigrationRunner;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use tenantflow_core::{
    CoreResult, CredentialDraft, CredentialRecord, CredentialRepository, IdempotencyEntry,
    IdempotencyState, IdempotencyStore, ReserveOutcome, RunStore, SealedSecret, WorkflowRun,
};

/// SQLite-based store implementation
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /// Create a new SqlStore with database URL and optional pool configuration
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        Self::new_with_config(database_url, None).await
    }

    /// Create SqlStore with custom pool configuration
    pub async fn new_with_config(
        database_url: &str,
        max_connections: Option<u32>,
    ) -> StoreResult<Self> {
        let mut max_conn = max_connections.unwrap_or_else(|| {
            std::env::var("TENANTFLOW_DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10)
        });

        let options = if let Some(path_str) = database_url.strip_prefix("sqlite://") {
            SqliteConnectOptions::new().filename(PathBuf::from(path_str)).create_if_missing(true)
        } else {
            // sqlite::memory: and other forms
            SqliteConnectOptions::from_str(database_url)?.create_if_missing(true)
        };

        // Every connection to an in-memory database sees its own empty database
        if database_url.contains(":memory:") {
            max_conn = 1;
        }

        let pool = SqlitePoolOptions::new().max_connections(max_conn).connect_with(options).await?;

        sqlx::query("PRAGMA journal_mode = WAL;").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL;").execute(&pool).await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(database_url, max_connections = max_conn, "sqlite store ready");
        Ok(store)
    }

    /// Create SqlStore from existing pool (for testing)
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run migrations manually, returns how many were applied
    pub async fn migrate(&self) -> StoreResult<usize> {
        MigrationRunner::new(self.pool.clone()).migrate().await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert, or take over an entry whose lease or ttl has passed. The
    /// conditional upsert is one write, so only one caller can succeed.
    async fn upsert_reservation(
        &self,
        key: &str,
        holder: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> CoreResult<bool> {
        let now_us = to_micros(now);
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_entries (idempotency_key, state, first_seen_at_us, reserved_until_us,
                                             holder, result_snapshot, ttl_seconds, expires_at_us)
            VALUES (?1, 'running', ?2, ?3, ?4, NULL, NULL, NULL)
            ON CONFLICT(idempotency_key) DO UPDATE SET
                state = 'running',
                first_seen_at_us = excluded.first_seen_at_us,
                reserved_until_us = excluded.reserved_until_us,
                holder = excluded.holder,
                result_snapshot = NULL,
                ttl_seconds = NULL,
                expires_at_us = NULL
            WHERE (idempotency_entries.state = 'running' AND idempotency_entries.reserved_until_us <= ?2)
               OR (idempotency_entries.state = 'completed'
                   AND idempotency_entries.expires_at_us IS NOT NULL
                   AND idempotency_entries.expires_at_us <= ?2)
            "#,
        )
        .bind(key)
        .bind(now_us)
        .bind(to_micros(now + lease))
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(result.rows_affected() == 1)
    }
}

/// What a live entry means for a caller that could not reserve it; `None`
/// when the entry disappeared after the upsert
fn blocking_outcome(entry: Option<IdempotencyEntry>) -> Option<ReserveOutcome> {
    entry.map(|entry| match entry.state {
        IdempotencyState::Completed => {
            ReserveOutcome::Completed(entry.result_snapshot.unwrap_or(JsonValue::Null))
        }
        IdempotencyState::Running => ReserveOutcome::InFlight { reserved_until: entry.reserved_until },
    })
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(us: i64) -> StoreResult<DateTime<Utc>> {
    let secs = us.div_euclid(1_000_000);
    let nanos = (us.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .ok_or_else(|| StoreError::CorruptRow(format!("timestamp {} out of range", us)))
}

fn row_to_credential(row: &SqliteRow) -> StoreResult<CredentialRecord> {
    let key_version: i64 = row.try_get("key_version")?;
    Ok(CredentialRecord {
        tenant_id: row.try_get("tenant_id")?,
        provider: row.try_get("provider")?,
        sealed_payload: SealedSecret {
            data: row.try_get("sealed_data")?,
            nonce: row.try_get("sealed_nonce")?,
            key_version: u32::try_from(key_version)
                .map_err(|_| StoreError::CorruptRow(format!("invalid key_version {}", key_version)))?,
        },
        created_at: from_micros(row.try_get("created_at_us")?)?,
        expires_at: from_micros(row.try_get("expires_at_us")?)?,
        rotation_version: row.try_get("rotation_version")?,
    })
}

fn row_to_entry(row: &SqliteRow) -> StoreResult<IdempotencyEntry> {
    let state: String = row.try_get("state")?;
    let result_snapshot: Option<String> = row.try_get("result_snapshot")?;
    let expires_at_us: Option<i64> = row.try_get("expires_at_us")?;

    Ok(IdempotencyEntry {
        idempotency_key: row.try_get("idempotency_key")?,
        state: IdempotencyState::from_str(&state)
            .map_err(|e| StoreError::CorruptRow(format!("{}: '{}'", e, state)))?,
        first_seen_at: from_micros(row.try_get("first_seen_at_us")?)?,
        reserved_until: from_micros(row.try_get("reserved_until_us")?)?,
        holder: row.try_get("holder")?,
        result_snapshot: result_snapshot.map(|s| serde_json::from_str(&s)).transpose()?,
        ttl_seconds: row.try_get("ttl_seconds")?,
        expires_at: expires_at_us.map(from_micros).transpose()?,
    })
}

const CREDENTIAL_COLUMNS: &str = "tenant_id, provider, sealed_data, sealed_nonce, key_version, \
     created_at_us, expires_at_us, rotation_version";

#[async_trait]
impl CredentialRepository for SqlStore {
    async fn put_rotating(&self, draft: CredentialDraft) -> CoreResult<CredentialRecord> {
        // Single upsert so concurrent rotations never hand out the same version
        let row = sqlx::query(
            r#"
            INSERT INTO credentials (tenant_id, provider, sealed_data, sealed_nonce, key_version,
                                     created_at_us, expires_at_us, rotation_version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
            ON CONFLICT(tenant_id, provider) DO UPDATE SET
                sealed_data = excluded.sealed_data,
                sealed_nonce = excluded.sealed_nonce,
                key_version = excluded.key_version,
                created_at_us = excluded.created_at_us,
                expires_at_us = excluded.expires_at_us,
                rotation_version = credentials.rotation_version + 1
            RETURNING rotation_version
            "#,
        )
        .bind(&draft.tenant_id)
        .bind(&draft.provider)
        .bind(&draft.sealed_payload.data)
        .bind(&draft.sealed_payload.nonce)
        .bind(i64::from(draft.sealed_payload.key_version))
        .bind(to_micros(draft.created_at))
        .bind(to_micros(draft.expires_at))
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        let rotation_version: i64 = row.try_get("rotation_version").map_err(StoreError::Database)?;
        Ok(draft.into_record(rotation_version))
    }

    async fn get(&self, tenant_id: &str, provider: &str) -> CoreResult<Option<CredentialRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM credentials WHERE tenant_id = ? AND provider = ?",
            CREDENTIAL_COLUMNS
        ))
        .bind(tenant_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(row.as_ref().map(row_to_credential).transpose()?)
    }

    async fn delete(&self, tenant_id: &str, provider: &str) -> CoreResult<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE tenant_id = ? AND provider = ?")
            .bind(tenant_id)
            .bind(provider)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_tenant(&self, tenant_id: &str) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM credentials WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(result.rows_affected())
    }

    async fn list_for_tenant(&self, tenant_id: &str) -> CoreResult<Vec<CredentialRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM credentials WHERE tenant_id = ? ORDER BY provider",
            CREDENTIAL_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(rows.iter().map(row_to_credential).collect::<StoreResult<Vec<_>>>()?)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM credentials WHERE expires_at_us <= ?")
            .bind(to_micros(now))
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl IdempotencyStore for SqlStore {
    async fn try_reserve(
        &self,
        key: &str,
        holder: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> CoreResult<ReserveOutcome> {
        // A row released between the upsert and the read is retried once
        for _ in 0..2 {
            if self.upsert_reservation(key, holder, now, lease).await? {
                return Ok(ReserveOutcome::Reserved);
            }
            if let Some(outcome) = blocking_outcome(IdempotencyStore::get(self, key).await?) {
                return Ok(outcome);
            }
        }
        Ok(ReserveOutcome::InFlight { reserved_until: now })
    }

    async fn complete(
        &self,
        key: &str,
        holder: &str,
        result: &JsonValue,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> CoreResult<bool> {
        let snapshot = serde_json::to_string(result).map_err(StoreError::Serialization)?;
        let updated = sqlx::query(
            r#"
            UPDATE idempotency_entries
            SET state = 'completed', result_snapshot = ?, ttl_seconds = ?, expires_at_us = ?
            WHERE idempotency_key = ? AND state = 'running' AND holder = ?
            "#,
        )
        .bind(snapshot)
        .bind(ttl.num_seconds())
        .bind(to_micros(now + ttl))
        .bind(key)
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(updated.rows_affected() == 1)
    }

    async fn release(&self, key: &str, holder: &str) -> CoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM idempotency_entries WHERE idempotency_key = ? AND state = 'running' AND holder = ?",
        )
        .bind(key)
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, key: &str) -> CoreResult<Option<IdempotencyEntry>> {
        let row = sqlx::query(
            r#"
            SELECT idempotency_key, state, first_seen_at_us, reserved_until_us, holder,
                   result_snapshot, ttl_seconds, expires_at_us
            FROM idempotency_entries WHERE idempotency_key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(row.as_ref().map(row_to_entry).transpose()?)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM idempotency_entries WHERE state = 'completed' AND expires_at_us <= ?",
        )
        .bind(to_micros(now))
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RunStore for SqlStore {
    async fn put(&self, run: &WorkflowRun) -> CoreResult<()> {
        let snapshot = serde_json::to_string(run).map_err(StoreError::Serialization)?;
        sqlx::query(
            r#"
            INSERT INTO workflow_runs (run_id, tenant_id, workflow_name, status, snapshot_json,
                                       started_at_us, updated_at_us)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                snapshot_json = excluded.snapshot_json,
                updated_at_us = excluded.updated_at_us
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.tenant_id)
        .bind(&run.workflow_name)
        .bind(run.status.as_str())
        .bind(snapshot)
        .bind(to_micros(run.started_at))
        .bind(to_micros(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn get(&self, run_id: &str) -> CoreResult<Option<WorkflowRun>> {
        let snapshot: Option<String> =
            sqlx::query_scalar("SELECT snapshot_json FROM workflow_runs WHERE run_id = ?")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::Database)?;

        Ok(snapshot
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(StoreError::Serialization)?)
    }

    async fn list_for_tenant(&self, tenant_id: &str) -> CoreResult<Vec<WorkflowRun>> {
        let snapshots: Vec<String> = sqlx::query_scalar(
            "SELECT snapshot_json FROM workflow_runs WHERE tenant_id = ? ORDER BY started_at_us DESC, run_id DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        snapshots
            .iter()
            .map(|s| serde_json::from_str(s).map_err(|e| StoreError::Serialization(e).into()))
            .collect()
    }
}
