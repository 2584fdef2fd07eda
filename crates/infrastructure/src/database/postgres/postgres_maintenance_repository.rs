use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use pipeweave_domain::{MaintenanceMode, MaintenanceRepository, MaintenanceState};
use pipeweave_errors::OrchestratorResult;

pub struct PostgresMaintenanceRepository {
    pool: PgPool,
}

impl PostgresMaintenanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MaintenanceRepository for PostgresMaintenanceRepository {
    async fn load(&self, now: DateTime<Utc>) -> OrchestratorResult<MaintenanceState> {
        sqlx::query(
            r#"
            INSERT INTO maintenance_state (id, mode, mode_changed_at)
            VALUES (1, 'running', $1)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT mode, mode_changed_at FROM maintenance_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(MaintenanceState {
            mode: row.try_get("mode")?,
            mode_changed_at: row.try_get("mode_changed_at")?,
        })
    }

    async fn transition(
        &self,
        from: MaintenanceMode,
        to: MaintenanceMode,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<bool> {
        // 单写者语义：比较并交换，竞争者只有一个能赢
        let result = sqlx::query(
            r#"
            UPDATE maintenance_state SET mode = $2, mode_changed_at = $3
            WHERE id = 1 AND mode = $1
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
