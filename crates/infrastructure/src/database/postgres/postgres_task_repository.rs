use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use pipeweave_domain::{TaskCodeHistory, TaskDefinition, TaskRepository};
use pipeweave_errors::OrchestratorResult;

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> OrchestratorResult<TaskDefinition> {
        Ok(TaskDefinition {
            id: row.try_get("id")?,
            service_id: row.try_get("service_id")?,
            code_hash: row.try_get("code_hash")?,
            code_version: row.try_get("code_version")?,
            allowed_next: row.try_get::<Json<Vec<String>>, _>("allowed_next")?.0,
            timeout_sec: row.try_get("timeout_sec")?,
            max_retries: row.try_get("max_retries")?,
            retry_backoff: row.try_get("retry_backoff")?,
            retry_delay_ms: row.try_get("retry_delay_ms")?,
            max_retry_delay_ms: row.try_get("max_retry_delay_ms")?,
            heartbeat_interval_ms: row.try_get("heartbeat_interval_ms")?,
            concurrency: row.try_get("concurrency")?,
            priority: row.try_get("priority")?,
            idempotency_ttl_sec: row.try_get("idempotency_ttl_sec")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn get_task(&self, id: &str) -> OrchestratorResult<Option<TaskDefinition>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn get_tasks(&self, ids: &[String]) -> OrchestratorResult<Vec<TaskDefinition>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE id = ANY($1) ORDER BY id ASC")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn list_for_service(&self, service_id: &str) -> OrchestratorResult<Vec<TaskDefinition>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE service_id = $1 ORDER BY id ASC")
            .bind(service_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn code_history(&self, task_id: &str) -> OrchestratorResult<Vec<TaskCodeHistory>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM task_code_history
            WHERE task_id = $1
            ORDER BY code_version ASC, recorded_at ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(TaskCodeHistory {
                    task_id: row.try_get("task_id")?,
                    code_version: row.try_get("code_version")?,
                    code_hash: row.try_get("code_hash")?,
                    service_version: row.try_get("service_version")?,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }
}
