//! Shared wiring for dispatcher integration tests
#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use pipeweave_application::{
    DeadLetterService, HeartbeatMonitor, IdempotencyService, MaintenanceService, PipelineExecutor,
    PipelineValidator, QueueService, RetryService, TaskFailureService,
};
use pipeweave_dispatcher::{DispatchService, RecoveryService};
use pipeweave_domain::{Service, ServiceStatus};
use pipeweave_testing_utils::{InMemoryStore, MockCredentialIssuer, MockWorkerTransport};

pub struct DispatchHarness {
    pub store: InMemoryStore,
    pub queue: Arc<QueueService>,
    pub dispatch: Arc<DispatchService>,
    pub recovery: RecoveryService,
    pub transport: Arc<MockWorkerTransport>,
    pub heartbeats: Arc<HeartbeatMonitor>,
    pub maintenance: Arc<MaintenanceService>,
}

pub fn dispatch_harness(max_concurrency: i64) -> DispatchHarness {
    let store = InMemoryStore::new();
    let repo = Arc::new(store.clone());

    let idempotency = Arc::new(IdempotencyService::new(repo.clone()));
    let maintenance = Arc::new(MaintenanceService::new(repo.clone(), repo.clone()));
    let queue = Arc::new(QueueService::new(
        repo.clone(),
        repo.clone(),
        repo.clone(),
        idempotency,
        Arc::clone(&maintenance),
        3_600,
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
        dlq,
        Arc::clone(&queue),
        executor,
    ));
    let heartbeats = Arc::new(HeartbeatMonitor::new(repo.clone(), Arc::clone(&failure)));

    let transport = Arc::new(MockWorkerTransport::new());
    let dispatch = Arc::new(DispatchService::new(
        Arc::clone(&queue),
        repo.clone(),
        repo.clone(),
        transport.clone(),
        Arc::new(MockCredentialIssuer),
        Arc::clone(&heartbeats),
        Arc::clone(&failure),
        Arc::clone(&maintenance),
        max_concurrency,
    ));
    let recovery = RecoveryService::new(repo.clone(), failure);

    // 任务定义默认挂在 svc-test 服务下
    store.seed_service(Service {
        id: "svc-test".to_string(),
        version: "1.0.0".to_string(),
        base_url: "http://worker:8080".to_string(),
        status: ServiceStatus::Active,
        registered_at: Utc::now(),
        last_heartbeat: Utc::now(),
    });

    DispatchHarness {
        store,
        queue,
        dispatch,
        recovery,
        transport,
        heartbeats,
        maintenance,
    }
}
