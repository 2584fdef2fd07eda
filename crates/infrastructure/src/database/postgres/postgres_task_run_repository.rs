use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use pipeweave_domain::{
    AttemptRecord, HeartbeatProgress, QueueStatusSummary, TaskCompletion, TaskRun,
    TaskRunRepository, TaskRunStatus, UpstreamRef,
};
use pipeweave_errors::{OrchestratorError, OrchestratorResult};

pub struct PostgresTaskRunRepository {
    pool: PgPool,
}

impl PostgresTaskRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn row_to_task_run(row: &sqlx::postgres::PgRow) -> OrchestratorResult<TaskRun> {
    Ok(TaskRun {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        pipeline_run_id: row.try_get("pipeline_run_id")?,
        status: row.try_get("status")?,
        code_version: row.try_get("code_version")?,
        code_hash: row.try_get("code_hash")?,
        attempt: row.try_get("attempt")?,
        max_retries: row.try_get("max_retries")?,
        priority: row.try_get("priority")?,
        input_path: row.try_get("input_path")?,
        output_path: row.try_get("output_path")?,
        output_size: row.try_get("output_size")?,
        assets: row.try_get("assets")?,
        upstream_refs: row
            .try_get::<Json<HashMap<String, UpstreamRef>>, _>("upstream_refs")?
            .0,
        previous_attempts: row
            .try_get::<Json<Vec<AttemptRecord>>, _>("previous_attempts")?
            .0,
        idempotency_key: row.try_get("idempotency_key")?,
        scheduled_for: row.try_get("scheduled_for")?,
        heartbeat_at: row.try_get("heartbeat_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error: row.try_get("error")?,
        error_code: row.try_get("error_code")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

/// 供本仓储与流水线运行仓储（事务内）共用的插入语句
pub(crate) async fn insert_task_run(
    conn: &mut sqlx::PgConnection,
    run: &TaskRun,
) -> OrchestratorResult<()> {
    sqlx::query(
        r#"
        INSERT INTO task_runs (
            id, task_id, pipeline_run_id, status, code_version, code_hash,
            attempt, max_retries, priority, input_path, output_path, output_size,
            assets, upstream_refs, previous_attempts, idempotency_key,
            scheduled_for, heartbeat_at, started_at, completed_at,
            error, error_code, metadata, created_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
            $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24
        )
        "#,
    )
    .bind(&run.id)
    .bind(&run.task_id)
    .bind(&run.pipeline_run_id)
    .bind(run.status)
    .bind(run.code_version)
    .bind(&run.code_hash)
    .bind(run.attempt)
    .bind(run.max_retries)
    .bind(run.priority)
    .bind(&run.input_path)
    .bind(&run.output_path)
    .bind(run.output_size)
    .bind(&run.assets)
    .bind(Json(&run.upstream_refs))
    .bind(Json(&run.previous_attempts))
    .bind(&run.idempotency_key)
    .bind(run.scheduled_for)
    .bind(run.heartbeat_at)
    .bind(run.started_at)
    .bind(run.completed_at)
    .bind(&run.error)
    .bind(&run.error_code)
    .bind(&run.metadata)
    .bind(run.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

impl PostgresTaskRunRepository {
    async fn load_for_transition_error(
        &self,
        id: &str,
        to: TaskRunStatus,
    ) -> OrchestratorError {
        match self.get(id).await {
            Ok(Some(run)) => OrchestratorError::IllegalTransition {
                id: id.to_string(),
                from: run.status.as_str().to_string(),
                to: to.as_str().to_string(),
            },
            Ok(None) => OrchestratorError::task_run_not_found(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl TaskRunRepository for PostgresTaskRunRepository {
    async fn insert(&self, run: &TaskRun) -> OrchestratorResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_task_run(&mut conn, run).await
    }

    async fn get(&self, id: &str) -> OrchestratorResult<Option<TaskRun>> {
        let row = sqlx::query("SELECT * FROM task_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_task_run).transpose()
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> OrchestratorResult<Vec<TaskRun>> {
        // 单条查询完成准入判断：到期的 pending 行、按任务统计的 running
        // 数未达并发上限。SKIP LOCKED 让并行的领取方不会互相阻塞。
        let rows = sqlx::query(
            r#"
            SELECT tr.* FROM task_runs tr
            JOIN tasks t ON t.id = tr.task_id
            WHERE tr.status = 'pending'
              AND (tr.scheduled_for IS NULL OR tr.scheduled_for <= $1)
              AND (
                t.concurrency = 0
                OR (
                    SELECT COUNT(*) FROM task_runs r
                    WHERE r.task_id = tr.task_id AND r.status = 'running'
                ) < t.concurrency
              )
            ORDER BY tr.priority ASC, tr.created_at ASC
            LIMIT $2
            FOR UPDATE OF tr SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task_run).collect()
    }

    async fn mark_running(&self, id: &str, now: DateTime<Utc>) -> OrchestratorResult<TaskRun> {
        let row = sqlx::query(
            r#"
            UPDATE task_runs SET status = 'running', started_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row_to_task_run(&row),
            None => Err(self
                .load_for_transition_error(id, TaskRunStatus::Running)
                .await),
        }
    }

    async fn mark_completed(
        &self,
        id: &str,
        completion: &TaskCompletion,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<TaskRun> {
        let row = sqlx::query(
            r#"
            UPDATE task_runs SET
                status = 'completed',
                output_path = $2,
                output_size = $3,
                assets = $4,
                completed_at = $5,
                metadata = CASE
                    WHEN $6::text IS NULL THEN metadata
                    ELSE jsonb_set(metadata, '{logsPath}', to_jsonb($6::text))
                END
            WHERE id = $1 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&completion.output_path)
        .bind(completion.output_size)
        .bind(&completion.assets)
        .bind(now)
        .bind(&completion.logs_path)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row_to_task_run(&row),
            None => Err(self
                .load_for_transition_error(id, TaskRunStatus::Completed)
                .await),
        }
    }

    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        error_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<TaskRun> {
        // 心跳超时先行落了 timeout 的行保持 timeout，只补写错误信息
        let row = sqlx::query(
            r#"
            UPDATE task_runs SET
                status = CASE WHEN status = 'timeout' THEN 'timeout' ELSE 'failed' END,
                error = $2,
                error_code = $3,
                completed_at = COALESCE(completed_at, $4)
            WHERE id = $1 AND status IN ('running', 'timeout')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(error_code)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row_to_task_run(&row),
            None => Err(self
                .load_for_transition_error(id, TaskRunStatus::Failed)
                .await),
        }
    }

    async fn mark_timed_out(
        &self,
        id: &str,
        error: &str,
        error_code: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Option<TaskRun>> {
        let row = sqlx::query(
            r#"
            UPDATE task_runs SET
                status = 'timeout', error = $2, error_code = $3, completed_at = $4
            WHERE id = $1 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(error_code)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_task_run).transpose()
    }

    async fn schedule_retry(
        &self,
        id: &str,
        record: &AttemptRecord,
        next_attempt: i32,
        run_at: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            UPDATE task_runs SET
                status = 'pending',
                attempt = $2,
                scheduled_for = $3,
                error = NULL,
                error_code = NULL,
                started_at = NULL,
                heartbeat_at = NULL,
                completed_at = NULL,
                previous_attempts = previous_attempts || $4::jsonb
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next_attempt)
        .bind(run_at)
        .bind(Json(vec![record]))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_heartbeat(
        &self,
        id: &str,
        progress: Option<&HeartbeatProgress>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE task_runs SET
                heartbeat_at = $2,
                metadata = CASE
                    WHEN $3::jsonb IS NULL THEN metadata
                    ELSE jsonb_set(metadata, '{progress}', $3::jsonb)
                END
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(progress.map(Json))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_pending_for_pipeline(
        &self,
        pipeline_run_id: &str,
        error: &str,
    ) -> OrchestratorResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE task_runs SET status = 'cancelled', error = $2, completed_at = $3
            WHERE pipeline_run_id = $1 AND status = 'pending'
            "#,
        )
        .bind(pipeline_run_id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_running_for_task(&self, task_id: &str) -> OrchestratorResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM task_runs WHERE task_id = $1 AND status = 'running'",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn counts(&self) -> OrchestratorResult<QueueStatusSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending')   AS pending,
                COUNT(*) FILTER (WHERE status = 'running')   AS running,
                COUNT(*) FILTER (WHERE status = 'waiting')   AS waiting,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed')    AS failed,
                COUNT(*) FILTER (WHERE status = 'timeout')   AS timeout,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled,
                MIN(created_at) FILTER (WHERE status = 'pending') AS oldest_pending
            FROM task_runs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(QueueStatusSummary {
            pending: row.try_get("pending")?,
            running: row.try_get("running")?,
            waiting: row.try_get("waiting")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
            timeout: row.try_get("timeout")?,
            cancelled: row.try_get("cancelled")?,
            dlq: 0,
            oldest_pending: row.try_get("oldest_pending")?,
        })
    }

    async fn list_for_pipeline(&self, pipeline_run_id: &str) -> OrchestratorResult<Vec<TaskRun>> {
        let rows = sqlx::query(
            "SELECT * FROM task_runs WHERE pipeline_run_id = $1 ORDER BY created_at ASC",
        )
        .bind(pipeline_run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task_run).collect()
    }

    async fn latest_completed(
        &self,
        pipeline_run_id: &str,
        task_id: &str,
    ) -> OrchestratorResult<Option<TaskRun>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM task_runs
            WHERE pipeline_run_id = $1 AND task_id = $2 AND status = 'completed'
            ORDER BY completed_at DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(pipeline_run_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_task_run).transpose()
    }

    async fn active_run_exists(
        &self,
        pipeline_run_id: &str,
        task_id: &str,
    ) -> OrchestratorResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM task_runs
                WHERE pipeline_run_id = $1 AND task_id = $2
                  AND status IN ('pending', 'running', 'waiting')
            )
            "#,
        )
        .bind(pipeline_run_id)
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn find_stale_running(&self, now: DateTime<Utc>) -> OrchestratorResult<Vec<TaskRun>> {
        let rows = sqlx::query(
            r#"
            SELECT tr.* FROM task_runs tr
            JOIN tasks t ON t.id = tr.task_id
            WHERE tr.status = 'running'
              AND COALESCE(tr.heartbeat_at, tr.started_at, tr.created_at)
                  < $1 - t.heartbeat_interval_ms * 2 * INTERVAL '1 millisecond'
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task_run).collect()
    }
}
