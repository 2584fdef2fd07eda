use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use pipeweave_domain::{Pipeline, PipelineRepository, PipelineStructure};
use pipeweave_errors::OrchestratorResult;

pub struct PostgresPipelineRepository {
    pool: PgPool,
}

impl PostgresPipelineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_pipeline(row: &sqlx::postgres::PgRow) -> OrchestratorResult<Pipeline> {
        Ok(Pipeline {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            entry_tasks: row.try_get::<Json<Vec<String>>, _>("entry_tasks")?.0,
            structure: row.try_get::<Json<PipelineStructure>, _>("structure")?.0,
            version: row.try_get("version")?,
            failure_mode: row.try_get("failure_mode")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl PipelineRepository for PostgresPipelineRepository {
    async fn put(&self, pipeline: &Pipeline) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipelines (
                id, name, description, entry_tasks, structure,
                version, failure_mode, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                entry_tasks = EXCLUDED.entry_tasks,
                structure = EXCLUDED.structure,
                version = EXCLUDED.version,
                failure_mode = EXCLUDED.failure_mode,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&pipeline.id)
        .bind(&pipeline.name)
        .bind(&pipeline.description)
        .bind(Json(&pipeline.entry_tasks))
        .bind(Json(&pipeline.structure))
        .bind(pipeline.version)
        .bind(pipeline.failure_mode)
        .bind(pipeline.created_at)
        .bind(pipeline.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> OrchestratorResult<Option<Pipeline>> {
        let row = sqlx::query("SELECT * FROM pipelines WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_pipeline).transpose()
    }

    async fn list(&self) -> OrchestratorResult<Vec<Pipeline>> {
        let rows = sqlx::query("SELECT * FROM pipelines ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_pipeline).collect()
    }
}
