//! Shared wiring for application integration tests
#![allow(dead_code)]

use std::sync::Arc;

use pipeweave_application::{
    DeadLetterService, HeartbeatMonitor, IdempotencyService, MaintenanceService, PipelineExecutor,
    PipelineValidator, QueueService, RetryService, ServiceRegistry, TaskFailureService,
};
use pipeweave_domain::{TaskCompletion, TaskDefinition, TaskRun};
use pipeweave_testing_utils::InMemoryStore;

pub const DEFAULT_IDEMPOTENCY_TTL_SEC: i64 = 3_600;

pub struct TestHarness {
    pub store: InMemoryStore,
    pub registry: Arc<ServiceRegistry>,
    pub queue: Arc<QueueService>,
    pub executor: Arc<PipelineExecutor>,
    pub maintenance: Arc<MaintenanceService>,
    pub dlq: Arc<DeadLetterService>,
    pub failure: Arc<TaskFailureService>,
    pub heartbeats: Arc<HeartbeatMonitor>,
    pub idempotency: Arc<IdempotencyService>,
}

pub fn harness() -> TestHarness {
    let store = InMemoryStore::new();
    let repo = Arc::new(store.clone());

    let registry = Arc::new(ServiceRegistry::new(repo.clone(), repo.clone()));
    let idempotency = Arc::new(IdempotencyService::new(repo.clone()));
    let maintenance = Arc::new(MaintenanceService::new(repo.clone(), repo.clone()));
    let queue = Arc::new(QueueService::new(
        repo.clone(),
        repo.clone(),
        repo.clone(),
        Arc::clone(&idempotency),
        Arc::clone(&maintenance),
        DEFAULT_IDEMPOTENCY_TTL_SEC,
    ));
    let validator = Arc::new(PipelineValidator::new(repo.clone()));
    let executor = Arc::new(PipelineExecutor::new(
        repo.clone(),
        repo.clone(),
        repo.clone(),
        repo.clone(),
        validator,
        Arc::clone(&queue),
    ));
    let retry = Arc::new(RetryService::new(repo.clone()));
    let dlq = Arc::new(DeadLetterService::new(repo.clone(), Arc::clone(&queue)));
    let failure = Arc::new(TaskFailureService::new(
        repo.clone(),
        repo.clone(),
        retry,
        Arc::clone(&dlq),
        Arc::clone(&queue),
        Arc::clone(&executor),
    ));
    let heartbeats = Arc::new(HeartbeatMonitor::new(repo.clone(), Arc::clone(&failure)));

    TestHarness {
        store,
        registry,
        queue,
        executor,
        maintenance,
        dlq,
        failure,
        heartbeats,
        idempotency,
    }
}

impl TestHarness {
    /// Seed task definitions directly into the store
    pub fn seed_tasks(&self, defs: Vec<TaskDefinition>) {
        for def in defs {
            self.store.seed_task(def);
        }
    }

    /// Drive one run through the worker success path: claim → run → complete
    /// → queue downstream, the way the dispatcher and callback handler do.
    pub async fn complete_run(&self, run_id: &str, output_path: &str) -> Vec<String> {
        self.queue.mark_running(run_id).await.expect("mark running");
        self.queue
            .mark_completed(
                run_id,
                &TaskCompletion {
                    output_path: output_path.to_string(),
                    ..Default::default()
                },
            )
            .await
            .expect("mark completed");
        self.executor
            .queue_downstream_tasks(run_id, None)
            .await
            .expect("queue downstream")
    }

    /// Drive one run through the worker failure path
    pub async fn fail_run(&self, run_id: &str, error: &str, error_code: &str) {
        self.queue.mark_running(run_id).await.expect("mark running");
        self.failure
            .handle_failure(run_id, error, Some(error_code))
            .await
            .expect("handle failure");
    }

    /// The single pending run of a task, if any
    pub fn pending_run_of(&self, task_id: &str) -> Option<TaskRun> {
        self.store
            .task_runs_for_task(task_id)
            .into_iter()
            .find(|r| r.status == pipeweave_domain::TaskRunStatus::Pending)
    }
}
