use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use pipeweave_domain::{AttemptRecord, DlqEntry, DlqRepository, UpstreamRef};
use pipeweave_errors::OrchestratorResult;

pub struct PostgresDlqRepository {
    pool: PgPool,
}

impl PostgresDlqRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> OrchestratorResult<DlqEntry> {
        Ok(DlqEntry {
            id: row.try_get("id")?,
            task_run_id: row.try_get("task_run_id")?,
            task_id: row.try_get("task_id")?,
            pipeline_run_id: row.try_get("pipeline_run_id")?,
            code_version: row.try_get("code_version")?,
            code_hash: row.try_get("code_hash")?,
            error: row.try_get("error")?,
            attempts: row.try_get("attempts")?,
            input_path: row.try_get("input_path")?,
            upstream_refs: row
                .try_get::<Json<HashMap<String, UpstreamRef>>, _>("upstream_refs")?
                .0,
            previous_attempts: row
                .try_get::<Json<Vec<AttemptRecord>>, _>("previous_attempts")?
                .0,
            failed_at: row.try_get("failed_at")?,
            retried_at: row.try_get("retried_at")?,
            retry_run_id: row.try_get("retry_run_id")?,
        })
    }
}

#[async_trait]
impl DlqRepository for PostgresDlqRepository {
    async fn insert(&self, entry: &DlqEntry) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dlq (
                id, task_run_id, task_id, pipeline_run_id, code_version, code_hash,
                error, attempts, input_path, upstream_refs, previous_attempts,
                failed_at, retried_at, retry_run_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.task_run_id)
        .bind(&entry.task_id)
        .bind(&entry.pipeline_run_id)
        .bind(entry.code_version)
        .bind(&entry.code_hash)
        .bind(&entry.error)
        .bind(entry.attempts)
        .bind(&entry.input_path)
        .bind(Json(&entry.upstream_refs))
        .bind(Json(&entry.previous_attempts))
        .bind(entry.failed_at)
        .bind(entry.retried_at)
        .bind(&entry.retry_run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> OrchestratorResult<Option<DlqEntry>> {
        let row = sqlx::query("SELECT * FROM dlq WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn list_unretried(&self, limit: i64, offset: i64) -> OrchestratorResult<Vec<DlqEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM dlq
            WHERE retried_at IS NULL
            ORDER BY failed_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit.max(1))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn mark_retried(
        &self,
        id: &str,
        retry_run_id: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        sqlx::query("UPDATE dlq SET retried_at = $2, retry_run_id = $3 WHERE id = $1")
            .bind(id)
            .bind(now)
            .bind(retry_run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> OrchestratorResult<u64> {
        let result = sqlx::query("DELETE FROM dlq WHERE failed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_unretried(&self) -> OrchestratorResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dlq WHERE retried_at IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
