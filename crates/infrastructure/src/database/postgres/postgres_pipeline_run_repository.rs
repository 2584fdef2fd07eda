use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::insert_task_run;
use pipeweave_domain::{
    PipelineRun, PipelineRunFilter, PipelineRunRepository, PipelineRunStatus, PipelineStructure,
    TaskRun,
};
use pipeweave_errors::OrchestratorResult;

const DEFAULT_LIST_LIMIT: i64 = 50;

pub struct PostgresPipelineRunRepository {
    pool: PgPool,
}

impl PostgresPipelineRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_run(row: &sqlx::postgres::PgRow) -> OrchestratorResult<PipelineRun> {
        Ok(PipelineRun {
            id: row.try_get("id")?,
            pipeline_id: row.try_get("pipeline_id")?,
            pipeline_version: row.try_get("pipeline_version")?,
            structure_snapshot: row
                .try_get::<Json<PipelineStructure>, _>("structure_snapshot")?
                .0,
            status: row.try_get("status")?,
            input_path: row.try_get("input_path")?,
            failure_mode: row.try_get("failure_mode")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
            metadata: row.try_get("metadata")?,
        })
    }
}

#[async_trait]
impl PipelineRunRepository for PostgresPipelineRunRepository {
    async fn create_with_tasks(
        &self,
        run: &PipelineRun,
        task_runs: &[TaskRun],
    ) -> OrchestratorResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (
                id, pipeline_id, pipeline_version, structure_snapshot, status,
                input_path, failure_mode, created_at, completed_at, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&run.id)
        .bind(&run.pipeline_id)
        .bind(run.pipeline_version)
        .bind(Json(&run.structure_snapshot))
        .bind(run.status)
        .bind(&run.input_path)
        .bind(run.failure_mode)
        .bind(run.created_at)
        .bind(run.completed_at)
        .bind(&run.metadata)
        .execute(&mut *tx)
        .await?;

        for task_run in task_runs {
            insert_task_run(&mut *tx, task_run).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> OrchestratorResult<Option<PipelineRun>> {
        let row = sqlx::query("SELECT * FROM pipeline_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn list(&self, filter: &PipelineRunFilter) -> OrchestratorResult<Vec<PipelineRun>> {
        let limit = if filter.limit > 0 {
            filter.limit
        } else {
            DEFAULT_LIST_LIMIT
        };
        let offset = filter.offset.max(0);

        let rows = match &filter.pipeline_id {
            Some(pipeline_id) => {
                sqlx::query(
                    r#"
                    SELECT * FROM pipeline_runs
                    WHERE pipeline_id = $1
                    ORDER BY created_at DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(pipeline_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM pipeline_runs
                    ORDER BY created_at DESC
                    LIMIT $1 OFFSET $2
                    "#,
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::row_to_run).collect()
    }

    async fn set_status(
        &self,
        id: &str,
        status: PipelineRunStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            UPDATE pipeline_runs SET status = $2, completed_at = $3
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
