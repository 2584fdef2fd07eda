//! 队列：重试与死信、幂等快路径、并发准入与排序

mod common;

use chrono::{Duration, Utc};
use common::harness;
use pipeweave_application::EnqueueRequest;
use pipeweave_domain::{RetryBackoff, TaskRunStatus};
use pipeweave_testing_utils::TaskDefinitionBuilder;

/// S3：指数退避重试两次后进入死信
#[tokio::test]
async fn test_retry_backoff_then_dead_letter() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("x")
        .with_max_retries(2)
        .with_backoff(RetryBackoff::Exponential, 100, 10_000)
        .build()]);

    let receipt = h.queue.enqueue(EnqueueRequest::new("x")).await.unwrap();
    let run_id = receipt.run_id;

    // 第1次失败：第2次尝试调度在 now+100ms
    let before = Utc::now();
    h.fail_run(&run_id, "boom", "E1").await;
    let run = h.store.task_run(&run_id).unwrap();
    assert_eq!(run.status, TaskRunStatus::Pending);
    assert_eq!(run.attempt, 2);
    assert!(run.error.is_none());
    assert_eq!(run.previous_attempts.len(), 1);
    assert_eq!(run.previous_attempts[0].attempt, 1);
    assert_eq!(run.previous_attempts[0].error_code.as_deref(), Some("E1"));
    let delay = run.scheduled_for.unwrap() - before;
    assert!(delay >= Duration::milliseconds(100) && delay < Duration::milliseconds(500));

    // 第2次失败：now+200ms
    let before = Utc::now();
    h.fail_run(&run_id, "boom", "E1").await;
    let run = h.store.task_run(&run_id).unwrap();
    assert_eq!(run.attempt, 3);
    assert_eq!(run.previous_attempts.len(), 2);
    let delay = run.scheduled_for.unwrap() - before;
    assert!(delay >= Duration::milliseconds(200) && delay < Duration::milliseconds(600));

    // 第3次失败：重试预算耗尽 ⇒ 死信 + failed
    h.fail_run(&run_id, "boom", "E1").await;
    let run = h.store.task_run(&run_id).unwrap();
    assert_eq!(run.status, TaskRunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("boom"));
    assert_eq!(run.error_code.as_deref(), Some("E1"));
    // 最后一次失败记录在运行本身，历史里只有前两次
    assert_eq!(run.previous_attempts.len(), 2);
    assert!(run.attempt <= run.max_retries + 1);

    let dlq = h.store.dlq_entries();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].task_run_id, run_id);
    assert_eq!(dlq[0].attempts, 3);
    assert_eq!(dlq[0].previous_attempts.len(), 2);

    let status = h.queue.status().await.unwrap();
    assert_eq!(status.dlq, 1);
    assert_eq!(status.failed, 1);
}

/// S4：幂等命中返回缓存产物，不插入新运行
#[tokio::test]
async fn test_idempotency_fast_path() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("pay")
        .with_idempotency_ttl(3_600)
        .build()]);

    let mut request = EnqueueRequest::new("pay");
    request.input = serde_json::json!({"order": "o1"});
    request.idempotency_key = Some("v1-o1".to_string());
    let first = h.queue.enqueue(request.clone()).await.unwrap();
    assert!(!first.deduplicated);

    // 第一次正常执行并缓存产物
    h.complete_run(&first.run_id, "o_pay").await;

    // 同key第二次入队：返回首次运行与其产物，不插入新行
    let second = h.queue.enqueue(request).await.unwrap();
    assert!(second.deduplicated);
    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.status, TaskRunStatus::Completed);
    assert_eq!(second.input_path, "o_pay");
    assert_eq!(h.store.task_run_count(), 1);
}

/// 幂等缓存过期后不再命中，清理驱动删除过期行
#[tokio::test]
async fn test_idempotency_expiry_and_cleanup() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("pay")
        .with_idempotency_ttl(0)
        .build()]);

    let mut request = EnqueueRequest::new("pay");
    request.idempotency_key = Some("v1-o2".to_string());
    let first = h.queue.enqueue(request.clone()).await.unwrap();
    h.complete_run(&first.run_id, "o_pay").await;

    // ttl=0 的缓存立即过期
    let second = h.queue.enqueue(request).await.unwrap();
    assert!(!second.deduplicated);
    assert_ne!(second.run_id, first.run_id);

    let removed = h.idempotency.cleanup_expired().await.unwrap();
    assert_eq!(removed, 1);
}

/// 每任务并发上限约束领取
#[tokio::test]
async fn test_per_task_concurrency_cap() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("narrow")
        .with_concurrency(1)
        .build()]);

    let r1 = h.queue.enqueue(EnqueueRequest::new("narrow")).await.unwrap();
    let _r2 = h.queue.enqueue(EnqueueRequest::new("narrow")).await.unwrap();

    let claimed = h.queue.get_next(10).await.unwrap();
    assert_eq!(claimed.len(), 2); // 还没有 running，两条都可领

    h.queue.mark_running(&r1.run_id).await.unwrap();
    // narrow 已有1条 running，并发上限1 ⇒ 不再放行
    let claimed = h.queue.get_next(10).await.unwrap();
    assert!(claimed.is_empty());
    assert!(!h.queue.can_run_task("narrow").await.unwrap());

    h.queue
        .mark_completed(
            &r1.run_id,
            &pipeweave_domain::TaskCompletion {
                output_path: "o".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let claimed = h.queue.get_next(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert!(h.queue.can_run_task("narrow").await.unwrap());
}

/// 领取顺序：priority 升序，同优先级按入队先后
#[tokio::test]
async fn test_claim_ordering_priority_then_fifo() {
    let h = harness();
    h.seed_tasks(vec![
        TaskDefinitionBuilder::new("low").with_priority(200).build(),
        TaskDefinitionBuilder::new("high").with_priority(1).build(),
    ]);

    let low1 = h.queue.enqueue(EnqueueRequest::new("low")).await.unwrap();
    let low2 = h.queue.enqueue(EnqueueRequest::new("low")).await.unwrap();
    let high = h.queue.enqueue(EnqueueRequest::new("high")).await.unwrap();

    let claimed = h.queue.get_next(10).await.unwrap();
    let ids: Vec<&str> = claimed.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![&high.run_id, &low1.run_id, &low2.run_id]);
}

/// scheduled_for 未到期的运行不可领取
#[tokio::test]
async fn test_scheduled_for_gates_claim() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("later").build()]);

    let mut request = EnqueueRequest::new("later");
    request.scheduled_for = Some(Utc::now() + Duration::hours(1));
    h.queue.enqueue(request).await.unwrap();

    assert!(h.queue.get_next(10).await.unwrap().is_empty());

    let mut due = EnqueueRequest::new("later");
    due.scheduled_for = Some(Utc::now() - Duration::seconds(1));
    let due_receipt = h.queue.enqueue(due).await.unwrap();

    let claimed = h.queue.get_next(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, due_receipt.run_id);
}

/// 批量入队按输入顺序逐项处理
#[tokio::test]
async fn test_enqueue_batch_preserves_order() {
    let h = harness();
    h.seed_tasks(vec![
        TaskDefinitionBuilder::new("a").build(),
        TaskDefinitionBuilder::new("b").build(),
    ]);

    let receipts = h
        .queue
        .enqueue_batch(vec![
            EnqueueRequest::new("a"),
            EnqueueRequest::new("b"),
            EnqueueRequest::new("a"),
        ])
        .await
        .unwrap();
    let tasks: Vec<&str> = receipts.iter().map(|r| r.task_id.as_str()).collect();
    assert_eq!(tasks, vec!["a", "b", "a"]);
    assert_eq!(h.store.task_run_count(), 3);
}

/// 未注册任务的入队报 TaskNotFound
#[tokio::test]
async fn test_enqueue_unknown_task_fails() {
    let h = harness();
    let err = h
        .queue
        .enqueue(EnqueueRequest::new("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        pipeweave_errors::OrchestratorError::TaskNotFound { .. }
    ));
}

/// 死信重放：复用原始输入路径并记录重放关系
#[tokio::test]
async fn test_dlq_replay() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("x").build()]);

    let receipt = h.queue.enqueue(EnqueueRequest::new("x")).await.unwrap();
    h.fail_run(&receipt.run_id, "boom", "E1").await;

    let entries = h.dlq.list(10, 0).await.unwrap();
    assert_eq!(entries.len(), 1);
    let dlq_id = entries[0].id.clone();

    let replay = h.dlq.retry(&dlq_id).await.unwrap();
    assert_ne!(replay.run_id, receipt.run_id);
    let new_run = h.store.task_run(&replay.run_id).unwrap();
    assert_eq!(new_run.input_path, entries[0].input_path);
    assert_eq!(new_run.attempt, 1);

    // 已重放的记录不再出现在列表里，也不能二次重放
    assert!(h.dlq.list(10, 0).await.unwrap().is_empty());
    assert!(h.dlq.retry(&dlq_id).await.is_err());
}
