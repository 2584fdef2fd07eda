mod postgres_dlq_repository;
mod postgres_idempotency_repository;
mod postgres_maintenance_repository;
mod postgres_pipeline_repository;
mod postgres_pipeline_run_repository;
mod postgres_service_repository;
mod postgres_task_repository;
mod postgres_task_run_repository;

pub use postgres_dlq_repository::PostgresDlqRepository;
pub use postgres_idempotency_repository::PostgresIdempotencyRepository;
pub use postgres_maintenance_repository::PostgresMaintenanceRepository;
pub use postgres_pipeline_repository::PostgresPipelineRepository;
pub use postgres_pipeline_run_repository::PostgresPipelineRunRepository;
pub use postgres_service_repository::PostgresServiceRepository;
pub use postgres_task_repository::PostgresTaskRepository;
pub use postgres_task_run_repository::PostgresTaskRunRepository;

pub(crate) use postgres_task_run_repository::insert_task_run;
