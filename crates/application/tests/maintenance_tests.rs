//! 维护状态机：请求、排空、自动进入与退出

mod common;

use common::harness;
use pipeweave_application::EnqueueRequest;
use pipeweave_domain::{MaintenanceMode, ServiceRegistration, TaskCompletion};
use pipeweave_testing_utils::TaskDefinitionBuilder;

/// S5：排空流程——等在途任务清零后自动进入维护，注册始终放行
#[tokio::test]
async fn test_maintenance_drain() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("work").build()]);

    // 2 pending + 1 running
    h.queue.enqueue(EnqueueRequest::new("work")).await.unwrap();
    h.queue.enqueue(EnqueueRequest::new("work")).await.unwrap();
    let running = h.queue.enqueue(EnqueueRequest::new("work")).await.unwrap();
    h.queue.mark_running(&running.run_id).await.unwrap();

    let state = h.maintenance.request_maintenance().await.unwrap();
    assert_eq!(state.mode, MaintenanceMode::WaitingForMaintenance);
    assert!(!h.maintenance.can_accept_tasks().await.unwrap());

    // 在途任务完成 ⇒ markCompleted 钩子检测到 running 清零，自动进入维护
    h.queue
        .mark_completed(
            &running.run_id,
            &TaskCompletion {
                output_path: "o".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let state = h.maintenance.current().await.unwrap();
    assert_eq!(state.mode, MaintenanceMode::Maintenance);

    // 维护期间注册照常放行
    h.registry
        .register(ServiceRegistration {
            service_id: "svc-new".to_string(),
            version: "1.0.0".to_string(),
            base_url: "http://new:8080".to_string(),
            tasks: vec![serde_json::from_value(serde_json::json!({"id": "fresh"})).unwrap()],
        })
        .await
        .unwrap();

    let state = h.maintenance.exit_maintenance().await.unwrap();
    assert_eq!(state.mode, MaintenanceMode::Running);
    assert!(h.maintenance.can_accept_tasks().await.unwrap());
}

/// 没有待执行/在途任务时直接进入维护
#[tokio::test]
async fn test_request_with_idle_queue_enters_directly() {
    let h = harness();
    let state = h.maintenance.request_maintenance().await.unwrap();
    assert_eq!(state.mode, MaintenanceMode::Maintenance);
}

/// 仍有任务时 enter 被409语义拒绝
#[tokio::test]
async fn test_enter_rejected_while_tasks_remain() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("work").build()]);
    h.queue.enqueue(EnqueueRequest::new("work")).await.unwrap();

    let err = h.maintenance.enter_maintenance().await.unwrap_err();
    assert!(matches!(
        err,
        pipeweave_errors::OrchestratorError::MaintenanceConflict(_)
    ));
    assert_eq!(
        h.maintenance.current().await.unwrap().mode,
        MaintenanceMode::Running
    );
}

/// 重复请求维护是幂等的
#[tokio::test]
async fn test_request_is_idempotent() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("work").build()]);
    let r = h.queue.enqueue(EnqueueRequest::new("work")).await.unwrap();
    h.queue.mark_running(&r.run_id).await.unwrap();

    let first = h.maintenance.request_maintenance().await.unwrap();
    let second = h.maintenance.request_maintenance().await.unwrap();
    assert_eq!(first.mode, MaintenanceMode::WaitingForMaintenance);
    assert_eq!(second.mode, MaintenanceMode::WaitingForMaintenance);
}

/// waiting 状态下也可以直接退出，恢复准入
#[tokio::test]
async fn test_exit_from_waiting() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("work").build()]);
    let r = h.queue.enqueue(EnqueueRequest::new("work")).await.unwrap();
    h.queue.mark_running(&r.run_id).await.unwrap();

    h.maintenance.request_maintenance().await.unwrap();
    let state = h.maintenance.exit_maintenance().await.unwrap();
    assert_eq!(state.mode, MaintenanceMode::Running);
}
