use crate::error::StoreResult;
use sqlx::SqlitePool;
use tracing::info;

const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "001_initial_schema", include_str!("../../migrations/001_initial_schema.sql")),
    (2, "002_workflow_runs", include_str!("../../migrations/002_workflow_runs.sql")),
    (3, "003_reservation_holder", include_str!("../../migrations/003_reservation_holder.sql")),
];

/// Database migration manager
pub struct MigrationRunner {
    pool: SqlitePool,
}

impl MigrationRunner {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations, returns how many were applied
    pub async fn migrate(&self) -> StoreResult<usize> {
        // Create migrations tracking table if not exists
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let applied_versions: Vec<i64> =
            sqlx::query_scalar("SELECT version FROM _migrations ORDER BY version")
                .fetch_all(&self.pool)
                .await?;

        let mut applied = 0;
        for (version, name, sql) in MIGRATIONS {
            if applied_versions.contains(version) {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            for statement in split_statements(sql) {
                sqlx::query(&statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
                .bind(*version)
                .bind(*name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            info!(version, name, "applied migration");
            applied += 1;
        }

        Ok(applied)
    }

    /// Versions recorded in `_migrations`
    pub async fn applied_versions(&self) -> StoreResult<Vec<i64>> {
        Ok(sqlx::query_scalar("SELECT version FROM _migrations ORDER BY version")
            .fetch_all(&self.pool)
            .await?)
    }
}

/// Split a script into statements, dropping `--` comment lines
fn split_statements(sql: &str) -> Vec<String> {
    let stripped: String = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    stripped
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
