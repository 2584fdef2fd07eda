use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use pipeweave_domain::{IdempotencyEntry, IdempotencyRepository};
use pipeweave_errors::OrchestratorResult;

pub struct PostgresIdempotencyRepository {
    pool: PgPool,
}

impl PostgresIdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> OrchestratorResult<IdempotencyEntry> {
        Ok(IdempotencyEntry {
            key: row.try_get("key")?,
            task_id: row.try_get("task_id")?,
            task_run_id: row.try_get("task_run_id")?,
            code_version: row.try_get("code_version")?,
            output_path: row.try_get("output_path")?,
            output_size: row.try_get("output_size")?,
            assets: row.try_get("assets")?,
            cached_at: row.try_get("cached_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[async_trait]
impl IdempotencyRepository for PostgresIdempotencyRepository {
    async fn find_live(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Option<IdempotencyEntry>> {
        let row = sqlx::query("SELECT * FROM idempotency_cache WHERE key = $1 AND expires_at > $2")
            .bind(key)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn upsert(&self, entry: &IdempotencyEntry) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_cache (
                key, task_id, task_run_id, code_version, output_path,
                output_size, assets, cached_at, expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (key) DO UPDATE SET
                task_id = EXCLUDED.task_id,
                task_run_id = EXCLUDED.task_run_id,
                code_version = EXCLUDED.code_version,
                output_path = EXCLUDED.output_path,
                output_size = EXCLUDED.output_size,
                assets = EXCLUDED.assets,
                cached_at = EXCLUDED.cached_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&entry.key)
        .bind(&entry.task_id)
        .bind(&entry.task_run_id)
        .bind(entry.code_version)
        .bind(&entry.output_path)
        .bind(entry.output_size)
        .bind(&entry.assets)
        .bind(entry.cached_at)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> OrchestratorResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency_cache WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
