use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use pipeweave_application::{
    DeadLetterService, HeartbeatMonitor, MaintenanceService, PipelineExecutor, QueueService,
    ServiceRegistry, TaskFailureService, TickDriver,
};
use pipeweave_domain::PipelineRunRepository;

use crate::handlers::{
    callbacks::{heartbeat, task_callback, tick},
    dlq::{list_dlq, purge_dlq, retry_dlq_entry},
    health::health_check,
    maintenance::{enter_maintenance, exit_maintenance, get_maintenance, request_maintenance},
    pipelines::{
        dry_run_pipeline, get_pipeline, get_pipeline_run, list_pipeline_runs, list_pipelines,
        trigger_pipeline, upsert_pipeline,
    },
    queue::queue_status,
    registry::{list_services, register_service},
};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub queue: Arc<QueueService>,
    pub executor: Arc<PipelineExecutor>,
    pub maintenance: Arc<MaintenanceService>,
    pub dlq: Arc<DeadLetterService>,
    pub heartbeats: Arc<HeartbeatMonitor>,
    pub failure: Arc<TaskFailureService>,
    pub ticker: Arc<dyn TickDriver>,
    pub pipeline_runs: Arc<dyn PipelineRunRepository>,
    pub dlq_retention_days: i64,
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/register", post(register_service))
        .route("/api/services", get(list_services))
        .route("/api/pipelines", get(list_pipelines).post(upsert_pipeline))
        .route("/api/pipelines/{id}", get(get_pipeline))
        .route("/api/pipelines/{id}/trigger", post(trigger_pipeline))
        .route("/api/pipelines/{id}/dry-run", post(dry_run_pipeline))
        .route("/api/pipeline-runs", get(list_pipeline_runs))
        .route("/api/pipeline-runs/{id}", get(get_pipeline_run))
        .route("/api/callback/{run_id}", post(task_callback))
        .route("/api/heartbeat", post(heartbeat))
        .route("/api/tick", post(tick))
        .route("/api/queue/status", get(queue_status))
        .route("/api/dlq", get(list_dlq))
        .route("/api/dlq/purge", post(purge_dlq))
        .route("/api/dlq/{id}/retry", post(retry_dlq_entry))
        .route("/api/maintenance", get(get_maintenance))
        .route("/api/maintenance/request", post(request_maintenance))
        .route("/api/maintenance/enter", post(enter_maintenance))
        .route("/api/maintenance/exit", post(exit_maintenance))
        .with_state(state)
}
