//! 启动恢复：心跳超期的滞留运行被标记超时并走失败路径

mod common;

use chrono::{Duration, Utc};
use common::dispatch_harness;
use pipeweave_domain::{RetryBackoff, TaskRunRepository, TaskRunStatus};
use pipeweave_testing_utils::{TaskDefinitionBuilder, TaskRunBuilder};

/// 滞留的 running 运行：无预算 ⇒ timeout + 死信
#[tokio::test]
async fn test_recover_stale_running_to_dlq() {
    let h = dispatch_harness(10);
    h.store.seed_task(
        TaskDefinitionBuilder::new("lost")
            .with_heartbeat_interval_ms(30_000)
            .build(),
    );

    // 进程崩溃前启动、心跳早已超过 2×30s 的运行
    let stale = TaskRunBuilder::new("trun_stale", "lost")
        .with_status(TaskRunStatus::Running)
        .with_started_at(Utc::now() - Duration::minutes(5))
        .build();
    let repo: &dyn TaskRunRepository = &h.store;
    repo.insert(&stale).await.unwrap();

    let recovered = h.recovery.recover_stale_runs().await.unwrap();
    assert_eq!(recovered, 1);

    let run = h.store.task_run("trun_stale").unwrap();
    assert_eq!(run.status, TaskRunStatus::Timeout);
    assert_eq!(run.error_code.as_deref(), Some("TIMEOUT"));
    assert_eq!(h.store.dlq_entries().len(), 1);
}

/// 有预算的滞留运行回到 pending 等待重新分发
#[tokio::test]
async fn test_recover_stale_running_to_retry() {
    let h = dispatch_harness(10);
    h.store.seed_task(
        TaskDefinitionBuilder::new("lost")
            .with_heartbeat_interval_ms(30_000)
            .with_max_retries(2)
            .with_backoff(RetryBackoff::Fixed, 100, 100)
            .build(),
    );

    let stale = TaskRunBuilder::new("trun_stale", "lost")
        .with_status(TaskRunStatus::Running)
        .with_max_retries(2)
        .with_started_at(Utc::now() - Duration::minutes(5))
        .build();
    let repo: &dyn TaskRunRepository = &h.store;
    repo.insert(&stale).await.unwrap();

    assert_eq!(h.recovery.recover_stale_runs().await.unwrap(), 1);

    let run = h.store.task_run("trun_stale").unwrap();
    assert_eq!(run.status, TaskRunStatus::Pending);
    assert_eq!(run.attempt, 2);
    assert_eq!(
        run.previous_attempts[0].error.as_str(),
        "Task heartbeat timeout"
    );
}

/// 心跳仍新鲜的 running 运行不受恢复扫描影响
#[tokio::test]
async fn test_recovery_ignores_fresh_runs() {
    let h = dispatch_harness(10);
    h.store.seed_task(
        TaskDefinitionBuilder::new("alive")
            .with_heartbeat_interval_ms(30_000)
            .build(),
    );

    let fresh = TaskRunBuilder::new("trun_fresh", "alive")
        .with_status(TaskRunStatus::Running)
        .with_started_at(Utc::now() - Duration::seconds(10))
        .build();
    let repo: &dyn TaskRunRepository = &h.store;
    repo.insert(&fresh).await.unwrap();

    assert_eq!(h.recovery.recover_stale_runs().await.unwrap(), 0);
    assert_eq!(
        h.store.task_run("trun_fresh").unwrap().status,
        TaskRunStatus::Running
    );
}
