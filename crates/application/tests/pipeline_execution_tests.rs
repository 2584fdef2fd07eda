//! 流水线执行的端到端场景（内存仓储）

mod common;

use common::harness;
use pipeweave_application::TriggerRequest;
use pipeweave_domain::{FailureMode, PipelineRunStatus, TaskRunStatus};
use pipeweave_testing_utils::{PipelineBuilder, TaskDefinitionBuilder};

fn trigger_request(pipeline_id: &str) -> TriggerRequest {
    TriggerRequest {
        pipeline_id: pipeline_id.to_string(),
        input: serde_json::json!({"x": 1}),
        failure_mode: None,
        priority: None,
        metadata: serde_json::json!({}),
    }
}

/// 线性流水线 A → B → C 的快乐路径
#[tokio::test]
async fn test_linear_pipeline_happy_path() {
    let h = harness();
    h.seed_tasks(vec![
        TaskDefinitionBuilder::new("a").with_allowed_next(&["b"]).build(),
        TaskDefinitionBuilder::new("b").with_allowed_next(&["c"]).build(),
        TaskDefinitionBuilder::new("c").build(),
    ]);
    h.store.seed_pipeline(
        PipelineBuilder::new("lin")
            .with_entry_tasks(&["a"])
            .with_edge("a", &["b"])
            .with_edge("b", &["c"])
            .with_edge("c", &[])
            .with_failure_mode(FailureMode::FailFast)
            .build(),
    );

    let receipt = h.executor.trigger_pipeline(trigger_request("lin")).await.unwrap();
    assert_eq!(receipt.entry_task_ids, vec!["a"]);
    assert_eq!(receipt.queued_task_run_ids.len(), 1);
    assert!(receipt.input_path.starts_with("runs/"));

    let run = h.store.pipeline_run(&receipt.pipeline_run_id).unwrap();
    assert_eq!(run.status, PipelineRunStatus::Running);

    let a_run = &receipt.queued_task_run_ids[0];
    assert_eq!(h.store.task_run(a_run).unwrap().status, TaskRunStatus::Pending);

    // A 完成后 B 入队，携带 A 的产物引用
    let queued = h.complete_run(a_run, "o_A").await;
    assert_eq!(queued.len(), 1);
    let b_run = h.store.task_run(&queued[0]).unwrap();
    assert_eq!(b_run.task_id, "b");
    assert_eq!(b_run.upstream_refs["a"].output_path, "o_A");
    // 下游继承完成任务的优先级
    assert_eq!(b_run.priority, 100);

    let queued = h.complete_run(&queued[0], "o_B").await;
    assert_eq!(queued.len(), 1);
    let c_run = h.store.task_run(&queued[0]).unwrap();
    assert_eq!(c_run.task_id, "c");
    assert_eq!(c_run.upstream_refs["b"].output_path, "o_B");

    // C 完成后流水线终态 completed
    let queued = h.complete_run(&queued[0], "o_C").await;
    assert!(queued.is_empty());
    let run = h.store.pipeline_run(&receipt.pipeline_run_id).unwrap();
    assert_eq!(run.status, PipelineRunStatus::Completed);
    assert!(run.completed_at.is_some());
}

/// 菱形 A → {B, C} → D：join 只在第二个前驱完成时入队一次
#[tokio::test]
async fn test_diamond_join_waits_for_all_predecessors() {
    let h = harness();
    h.seed_tasks(vec![
        TaskDefinitionBuilder::new("a").with_allowed_next(&["b", "c"]).build(),
        TaskDefinitionBuilder::new("b").with_allowed_next(&["d"]).build(),
        TaskDefinitionBuilder::new("c").with_allowed_next(&["d"]).build(),
        TaskDefinitionBuilder::new("d").build(),
    ]);
    h.store.seed_pipeline(
        PipelineBuilder::new("diamond")
            .with_entry_tasks(&["a"])
            .with_edge("a", &["b", "c"])
            .with_edge("b", &["d"])
            .with_edge("c", &["d"])
            .with_edge("d", &[])
            .build(),
    );

    let receipt = h
        .executor
        .trigger_pipeline(trigger_request("diamond"))
        .await
        .unwrap();
    let a_run = &receipt.queued_task_run_ids[0];

    // A 完成 ⇒ B、C 同时入队
    let queued = h.complete_run(a_run, "o_A").await;
    assert_eq!(queued.len(), 2);
    let tasks: Vec<String> = queued
        .iter()
        .map(|id| h.store.task_run(id).unwrap().task_id)
        .collect();
    assert!(tasks.contains(&"b".to_string()) && tasks.contains(&"c".to_string()));

    let b_run = queued
        .iter()
        .find(|id| h.store.task_run(id).unwrap().task_id == "b")
        .unwrap();
    let c_run = queued
        .iter()
        .find(|id| h.store.task_run(id).unwrap().task_id == "c")
        .unwrap();

    // 只有 B 完成时 D 不入队
    let queued_after_b = h.complete_run(b_run, "o_B").await;
    assert!(queued_after_b.is_empty());
    assert!(h.pending_run_of("d").is_none());

    // C 完成后 D 恰好入队一次，上游引用包含 B 与 C
    let queued_after_c = h.complete_run(c_run, "o_C").await;
    assert_eq!(queued_after_c.len(), 1);
    let d_run = h.store.task_run(&queued_after_c[0]).unwrap();
    assert_eq!(d_run.task_id, "d");
    assert_eq!(d_run.upstream_refs["b"].output_path, "o_B");
    assert_eq!(d_run.upstream_refs["c"].output_path, "o_C");
    assert_eq!(h.store.task_runs_for_task("d").len(), 1);
}

/// S6：fail-fast 下 B 失败 ⇒ pending 的 C 被取消，D 永不入队
#[tokio::test]
async fn test_fail_fast_cancels_pending_and_blocks_join() {
    let h = harness();
    h.seed_tasks(vec![
        TaskDefinitionBuilder::new("a").with_allowed_next(&["b", "c"]).build(),
        TaskDefinitionBuilder::new("b").with_allowed_next(&["d"]).build(),
        TaskDefinitionBuilder::new("c").with_allowed_next(&["d"]).build(),
        TaskDefinitionBuilder::new("d").build(),
    ]);
    h.store.seed_pipeline(
        PipelineBuilder::new("diamond")
            .with_entry_tasks(&["a"])
            .with_edge("a", &["b", "c"])
            .with_edge("b", &["d"])
            .with_edge("c", &["d"])
            .with_edge("d", &[])
            .with_failure_mode(FailureMode::FailFast)
            .build(),
    );

    let receipt = h
        .executor
        .trigger_pipeline(trigger_request("diamond"))
        .await
        .unwrap();
    let queued = h.complete_run(&receipt.queued_task_run_ids[0], "o_A").await;
    let b_run = queued
        .iter()
        .find(|id| h.store.task_run(id).unwrap().task_id == "b")
        .unwrap();

    // B 失败（无重试预算）
    h.fail_run(b_run, "boom", "E_BOOM").await;

    let run = h.store.pipeline_run(&receipt.pipeline_run_id).unwrap();
    assert_eq!(run.status, PipelineRunStatus::Failed);

    let c_run = h
        .store
        .task_runs_for_task("c")
        .into_iter()
        .next()
        .unwrap();
    assert_eq!(c_run.status, TaskRunStatus::Cancelled);
    assert_eq!(
        c_run.error.as_deref(),
        Some("Pipeline failed in fail-fast mode")
    );
    assert!(h.store.task_runs_for_task("d").is_empty());

    // fail-fast 后没有任何 pending 运行残留
    let all = h.store.task_runs_for_pipeline(&receipt.pipeline_run_id);
    assert!(all.iter().all(|r| r.status != TaskRunStatus::Pending));
}

/// continue 模式：失败不取消兄弟任务，终态在全部离开活跃后判 failed
#[tokio::test]
async fn test_continue_mode_lets_siblings_finish() {
    let h = harness();
    h.seed_tasks(vec![
        TaskDefinitionBuilder::new("a").with_allowed_next(&["b", "c"]).build(),
        TaskDefinitionBuilder::new("b").build(),
        TaskDefinitionBuilder::new("c").build(),
    ]);
    h.store.seed_pipeline(
        PipelineBuilder::new("fanout")
            .with_entry_tasks(&["a"])
            .with_edge("a", &["b", "c"])
            .with_edge("b", &[])
            .with_edge("c", &[])
            .with_failure_mode(FailureMode::Continue)
            .build(),
    );

    let receipt = h
        .executor
        .trigger_pipeline(trigger_request("fanout"))
        .await
        .unwrap();
    let queued = h.complete_run(&receipt.queued_task_run_ids[0], "o_A").await;
    let b_run = queued
        .iter()
        .find(|id| h.store.task_run(id).unwrap().task_id == "b")
        .unwrap();
    let c_run = queued
        .iter()
        .find(|id| h.store.task_run(id).unwrap().task_id == "c")
        .unwrap();

    h.fail_run(b_run, "boom", "E_BOOM").await;
    // C 仍然 pending，流水线还在 running
    assert_eq!(
        h.store.task_run(c_run).unwrap().status,
        TaskRunStatus::Pending
    );
    assert_eq!(
        h.store.pipeline_run(&receipt.pipeline_run_id).unwrap().status,
        PipelineRunStatus::Running
    );

    // C 完成后流水线因 B 的失败判 failed
    h.complete_run(c_run, "o_C").await;
    assert_eq!(
        h.store.pipeline_run(&receipt.pipeline_run_id).unwrap().status,
        PipelineRunStatus::Failed
    );
}

/// 程序化路由：合法子集生效，非法选择被丢弃
#[tokio::test]
async fn test_selected_next_intersects_allowed_next() {
    let h = harness();
    h.seed_tasks(vec![
        TaskDefinitionBuilder::new("route").with_allowed_next(&["x", "y"]).build(),
        TaskDefinitionBuilder::new("x").build(),
        TaskDefinitionBuilder::new("y").build(),
        TaskDefinitionBuilder::new("z").build(),
    ]);
    h.store.seed_pipeline(
        PipelineBuilder::new("routing")
            .with_entry_tasks(&["route"])
            .with_edge("route", &["x", "y"])
            .with_edge("x", &[])
            .with_edge("y", &[])
            .build(),
    );

    let receipt = h
        .executor
        .trigger_pipeline(trigger_request("routing"))
        .await
        .unwrap();
    let route_run = &receipt.queued_task_run_ids[0];
    h.queue.mark_running(route_run).await.unwrap();
    h.queue
        .mark_completed(
            route_run,
            &pipeweave_domain::TaskCompletion {
                output_path: "o_route".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Worker 选择 x 与未声明的 z：z 被丢弃，只有 x 入队
    let queued = h
        .executor
        .queue_downstream_tasks(route_run, Some(vec!["x".to_string(), "z".to_string()]))
        .await
        .unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(h.store.task_run(&queued[0]).unwrap().task_id, "x");
    assert!(h.store.task_runs_for_task("y").is_empty());
    assert!(h.store.task_runs_for_task("z").is_empty());
}

/// 独立运行（无流水线）完成时不入队任何下游
#[tokio::test]
async fn test_standalone_run_has_no_downstream() {
    let h = harness();
    h.seed_tasks(vec![TaskDefinitionBuilder::new("solo")
        .with_allowed_next(&["other"])
        .build()]);

    let receipt = h
        .queue
        .enqueue(pipeweave_application::EnqueueRequest::new("solo"))
        .await
        .unwrap();
    assert!(receipt.input_path.starts_with("standalone/"));

    let queued = h.complete_run(&receipt.run_id, "o_solo").await;
    assert!(queued.is_empty());
    assert_eq!(h.store.task_run_count(), 1);
}

/// 校验失败的流水线无法触发
#[tokio::test]
async fn test_trigger_rejects_invalid_pipeline() {
    let h = harness();
    h.seed_tasks(vec![
        TaskDefinitionBuilder::new("a").with_allowed_next(&["b"]).build(),
        TaskDefinitionBuilder::new("b").with_allowed_next(&["a"]).build(),
    ]);
    h.store.seed_pipeline(
        PipelineBuilder::new("cyclic")
            .with_entry_tasks(&["a"])
            .with_edge("a", &["b"])
            .with_edge("b", &["a"])
            .build(),
    );

    let err = h
        .executor
        .trigger_pipeline(trigger_request("cyclic"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cycle"));
    // 没有任何运行被创建
    assert_eq!(h.store.task_run_count(), 0);
}

/// dry-run 纯函数性：两次调用计划一致且无写入
#[tokio::test]
async fn test_dry_run_is_pure_and_repeatable() {
    let h = harness();
    h.seed_tasks(vec![
        TaskDefinitionBuilder::new("a").with_allowed_next(&["b", "c"]).build(),
        TaskDefinitionBuilder::new("b").with_allowed_next(&["d"]).build(),
        TaskDefinitionBuilder::new("c").with_allowed_next(&["d"]).build(),
        TaskDefinitionBuilder::new("d").build(),
    ]);
    h.store.seed_pipeline(
        PipelineBuilder::new("diamond")
            .with_entry_tasks(&["a"])
            .with_edge("a", &["b", "c"])
            .with_edge("b", &["d"])
            .with_edge("c", &["d"])
            .with_edge("d", &[])
            .build(),
    );

    let first = h.executor.dry_run("diamond").await.unwrap();
    let second = h.executor.dry_run("diamond").await.unwrap();
    assert!(first.validation.is_valid());
    assert_eq!(
        serde_json::to_value(&first.plan).unwrap(),
        serde_json::to_value(&second.plan).unwrap()
    );
    assert_eq!(first.plan.len(), 3);
    assert_eq!(h.store.task_run_count(), 0);
}
