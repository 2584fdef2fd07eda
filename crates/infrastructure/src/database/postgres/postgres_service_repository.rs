use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;

use pipeweave_domain::{RegistrationPlan, Service, ServiceRepository};
use pipeweave_errors::OrchestratorResult;

pub struct PostgresServiceRepository {
    pool: PgPool,
}

impl PostgresServiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_service(row: &sqlx::postgres::PgRow) -> OrchestratorResult<Service> {
        Ok(Service {
            id: row.try_get("id")?,
            version: row.try_get("version")?,
            base_url: row.try_get("base_url")?,
            status: row.try_get("status")?,
            registered_at: row.try_get("registered_at")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
        })
    }
}

#[async_trait]
impl ServiceRepository for PostgresServiceRepository {
    async fn get_service(&self, id: &str) -> OrchestratorResult<Option<Service>> {
        let row = sqlx::query("SELECT * FROM services WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_service).transpose()
    }

    async fn list_services(&self) -> OrchestratorResult<Vec<Service>> {
        let rows = sqlx::query("SELECT * FROM services ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_service).collect()
    }

    async fn apply_registration(&self, plan: &RegistrationPlan) -> OrchestratorResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO services (id, version, base_url, status, registered_at, last_heartbeat)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                version = EXCLUDED.version,
                base_url = EXCLUDED.base_url,
                status = EXCLUDED.status,
                last_heartbeat = EXCLUDED.last_heartbeat
            "#,
        )
        .bind(&plan.service.id)
        .bind(&plan.service.version)
        .bind(&plan.service.base_url)
        .bind(plan.service.status)
        .bind(plan.service.registered_at)
        .bind(plan.service.last_heartbeat)
        .execute(&mut *tx)
        .await?;

        for task in &plan.tasks {
            sqlx::query(
                r#"
                INSERT INTO tasks (
                    id, service_id, code_hash, code_version, allowed_next,
                    timeout_sec, max_retries, retry_backoff, retry_delay_ms,
                    max_retry_delay_ms, heartbeat_interval_ms, concurrency,
                    priority, idempotency_ttl_sec, description, created_at, updated_at
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17
                )
                ON CONFLICT (id) DO UPDATE SET
                    service_id = EXCLUDED.service_id,
                    code_hash = EXCLUDED.code_hash,
                    code_version = EXCLUDED.code_version,
                    allowed_next = EXCLUDED.allowed_next,
                    timeout_sec = EXCLUDED.timeout_sec,
                    max_retries = EXCLUDED.max_retries,
                    retry_backoff = EXCLUDED.retry_backoff,
                    retry_delay_ms = EXCLUDED.retry_delay_ms,
                    max_retry_delay_ms = EXCLUDED.max_retry_delay_ms,
                    heartbeat_interval_ms = EXCLUDED.heartbeat_interval_ms,
                    concurrency = EXCLUDED.concurrency,
                    priority = EXCLUDED.priority,
                    idempotency_ttl_sec = EXCLUDED.idempotency_ttl_sec,
                    description = EXCLUDED.description,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(&task.id)
            .bind(&task.service_id)
            .bind(&task.code_hash)
            .bind(task.code_version)
            .bind(Json(&task.allowed_next))
            .bind(task.timeout_sec)
            .bind(task.max_retries)
            .bind(task.retry_backoff)
            .bind(task.retry_delay_ms)
            .bind(task.max_retry_delay_ms)
            .bind(task.heartbeat_interval_ms)
            .bind(task.concurrency)
            .bind(task.priority)
            .bind(task.idempotency_ttl_sec)
            .bind(&task.description)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        for entry in &plan.history {
            sqlx::query(
                r#"
                INSERT INTO task_code_history
                    (task_id, code_version, code_hash, service_version, recorded_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (task_id, code_hash) DO NOTHING
                "#,
            )
            .bind(&entry.task_id)
            .bind(entry.code_version)
            .bind(&entry.code_hash)
            .bind(&entry.service_version)
            .bind(entry.recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        if !plan.orphaned_task_ids.is_empty() {
            let cancelled = sqlx::query(
                r#"
                UPDATE task_runs SET status = 'cancelled', error = $2, completed_at = $3
                WHERE task_id = ANY($1) AND status = 'pending'
                "#,
            )
            .bind(&plan.orphaned_task_ids)
            .bind(&plan.orphan_error)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
            debug!(
                "注册事务取消了 {} 条孤儿任务的待执行运行",
                cancelled.rows_affected()
            );
        }

        tx.commit().await?;
        Ok(())
    }
}
