//! 心跳监控：超时落盘、心跳续命与撤防

mod common;

use std::time::Duration;

use common::harness;
use pipeweave_application::EnqueueRequest;
use pipeweave_domain::{HeartbeatProgress, RetryBackoff, TaskRunStatus};
use pipeweave_testing_utils::TaskDefinitionBuilder;

/// 心跳缺席超过 2×interval ⇒ timeout，无重试预算时直接死信
#[tokio::test]
async fn test_heartbeat_timeout_dead_letters_without_retries() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("slow")
        .with_heartbeat_interval_ms(25)
        .build()]);

    let receipt = h.queue.enqueue(EnqueueRequest::new("slow")).await.unwrap();
    h.queue.mark_running(&receipt.run_id).await.unwrap();
    h.heartbeats.start_tracking(receipt.run_id.clone(), 25);
    assert_eq!(h.heartbeats.tracked_count(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let run = h.store.task_run(&receipt.run_id).unwrap();
    assert_eq!(run.status, TaskRunStatus::Timeout);
    assert_eq!(run.error.as_deref(), Some("Task heartbeat timeout"));
    assert_eq!(run.error_code.as_deref(), Some("TIMEOUT"));
    assert_eq!(h.heartbeats.tracked_count(), 0);

    let dlq = h.store.dlq_entries();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].error, "Task heartbeat timeout");
}

/// 有重试预算的超时重新回到 pending
#[tokio::test]
async fn test_heartbeat_timeout_schedules_retry() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("slow")
        .with_heartbeat_interval_ms(25)
        .with_max_retries(1)
        .with_backoff(RetryBackoff::Fixed, 10, 10)
        .build()]);

    let receipt = h.queue.enqueue(EnqueueRequest::new("slow")).await.unwrap();
    h.queue.mark_running(&receipt.run_id).await.unwrap();
    h.heartbeats.start_tracking(receipt.run_id.clone(), 25);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let run = h.store.task_run(&receipt.run_id).unwrap();
    assert_eq!(run.status, TaskRunStatus::Pending);
    assert_eq!(run.attempt, 2);
    assert_eq!(run.previous_attempts.len(), 1);
    assert_eq!(
        run.previous_attempts[0].error_code.as_deref(),
        Some("TIMEOUT")
    );
    assert!(h.store.dlq_entries().is_empty());
}

/// 周期心跳不断续命，撤防后定时器不再触发
#[tokio::test]
async fn test_heartbeat_keeps_run_alive_and_cancel_disarms() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("steady")
        .with_heartbeat_interval_ms(40)
        .build()]);

    let receipt = h.queue.enqueue(EnqueueRequest::new("steady")).await.unwrap();
    h.queue.mark_running(&receipt.run_id).await.unwrap();
    h.heartbeats.start_tracking(receipt.run_id.clone(), 40);

    // 超时阈值是 80ms；每 50ms 一次心跳让它一直活着
    for percent in [25.0, 50.0, 75.0] {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let alive = h
            .heartbeats
            .record_heartbeat(
                &receipt.run_id,
                Some(&HeartbeatProgress {
                    percent: Some(percent),
                    message: Some(format!("{percent}%")),
                }),
            )
            .await
            .unwrap();
        assert!(alive);
    }

    let run = h.store.task_run(&receipt.run_id).unwrap();
    assert_eq!(run.status, TaskRunStatus::Running);
    assert!(run.heartbeat_at.is_some());
    assert_eq!(run.metadata["progress"]["percent"], 75.0);

    // 结果送达后撤防，之后不会再有超时落盘
    h.heartbeats.cancel_tracking(&receipt.run_id);
    assert_eq!(h.heartbeats.tracked_count(), 0);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        h.store.task_run(&receipt.run_id).unwrap().status,
        TaskRunStatus::Running
    );
}

/// 已终态的运行心跳被忽略
#[tokio::test]
async fn test_heartbeat_ignored_after_terminal_state() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("steady").build()]);

    let receipt = h.queue.enqueue(EnqueueRequest::new("steady")).await.unwrap();
    h.complete_run(&receipt.run_id, "o").await;

    let alive = h
        .heartbeats
        .record_heartbeat(&receipt.run_id, None)
        .await
        .unwrap();
    assert!(!alive);
}
