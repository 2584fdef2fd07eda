//! 流水线执行
//!
//! 触发运行（校验 + 一个事务内写入运行实例与入口任务）、任务完成后的
//! join 感知下游入队、fail-fast 取消与终态判定，以及 dry-run 执行计划。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::pipeline_graph::{ExecutionLevel, PipelineGraph};
use crate::pipeline_validator::{PipelineValidator, ValidationReport};
use crate::queue_service::{EnqueueRequest, QueueService};
use pipeweave_domain::{
    ids, FailureMode, Pipeline, PipelineRepository, PipelineRun, PipelineRunRepository,
    PipelineRunStatus, PipelineStructure, TaskRepository, TaskRun, TaskRunRepository,
    TaskRunStatus, UpstreamRef,
};
use pipeweave_errors::{OrchestratorError, OrchestratorResult};

/// fail-fast 取消 pending 运行时写入的错误文案
const FAIL_FAST_CANCEL_ERROR: &str = "Pipeline failed in fail-fast mode";

/// 触发请求
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub pipeline_id: String,
    pub input: serde_json::Value,
    pub failure_mode: Option<FailureMode>,
    pub priority: Option<i32>,
    pub metadata: serde_json::Value,
}

/// 触发回执
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerReceipt {
    pub pipeline_run_id: String,
    pub status: PipelineRunStatus,
    pub input_path: String,
    pub entry_task_ids: Vec<String>,
    pub queued_task_run_ids: Vec<String>,
}

/// 流水线定义的写入请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineUpsert {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub entry_tasks: Vec<String>,
    pub structure: PipelineStructure,
    pub failure_mode: FailureMode,
}

/// dry-run 结果：校验报告 + 拓扑执行计划
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunReport {
    pub validation: ValidationReport,
    pub plan: Vec<ExecutionLevel>,
}

pub struct PipelineExecutor {
    pipelines: Arc<dyn PipelineRepository>,
    pipeline_runs: Arc<dyn PipelineRunRepository>,
    task_runs: Arc<dyn TaskRunRepository>,
    tasks: Arc<dyn TaskRepository>,
    validator: Arc<PipelineValidator>,
    queue: Arc<QueueService>,
}

impl PipelineExecutor {
    pub fn new(
        pipelines: Arc<dyn PipelineRepository>,
        pipeline_runs: Arc<dyn PipelineRunRepository>,
        task_runs: Arc<dyn TaskRunRepository>,
        tasks: Arc<dyn TaskRepository>,
        validator: Arc<PipelineValidator>,
        queue: Arc<QueueService>,
    ) -> Self {
        Self {
            pipelines,
            pipeline_runs,
            task_runs,
            tasks,
            validator,
            queue,
        }
    }

    /// 写入或更新流水线定义；结构在此刻拍快照，内容变化时版本递增
    pub async fn upsert_pipeline(&self, upsert: PipelineUpsert) -> OrchestratorResult<Pipeline> {
        let now = Utc::now();
        let existing = self.pipelines.get(&upsert.id).await?;
        let version = match &existing {
            Some(p)
                if p.structure == upsert.structure
                    && p.entry_tasks == upsert.entry_tasks
                    && p.failure_mode == upsert.failure_mode =>
            {
                p.version
            }
            Some(p) => p.version + 1,
            None => 1,
        };

        let pipeline = Pipeline {
            id: upsert.id,
            name: upsert.name,
            description: upsert.description,
            entry_tasks: upsert.entry_tasks,
            structure: upsert.structure,
            version,
            failure_mode: upsert.failure_mode,
            created_at: existing.as_ref().map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.pipelines.put(&pipeline).await?;
        info!("流水线 {} 已保存: 版本={}", pipeline.id, pipeline.version);
        Ok(pipeline)
    }

    /// 触发一次流水线运行
    ///
    /// 校验通过后，运行实例与全部入口任务运行在一个事务里创建，
    /// 不会出现没有入口任务的流水线运行。
    pub async fn trigger_pipeline(
        &self,
        request: TriggerRequest,
    ) -> OrchestratorResult<TriggerReceipt> {
        let pipeline = self
            .pipelines
            .get(&request.pipeline_id)
            .await?
            .ok_or_else(|| OrchestratorError::pipeline_not_found(&request.pipeline_id))?;

        let report = self.validator.validate_pipeline(&pipeline).await?;
        if !report.is_valid() {
            return Err(OrchestratorError::PipelineInvalid(
                report.errors.join("; "),
            ));
        }

        let run_id = ids::pipeline_run_id();
        let input_path = format!("runs/{run_id}/input.json");
        let run = PipelineRun {
            id: run_id.clone(),
            pipeline_id: pipeline.id.clone(),
            pipeline_version: pipeline.version,
            structure_snapshot: pipeline.structure.clone(),
            status: PipelineRunStatus::Running,
            input_path: input_path.clone(),
            failure_mode: request.failure_mode.unwrap_or(pipeline.failure_mode),
            created_at: Utc::now(),
            completed_at: None,
            metadata: request.metadata.clone(),
        };

        let mut entry_runs: Vec<TaskRun> = Vec::with_capacity(pipeline.entry_tasks.len());
        for entry_task in &pipeline.entry_tasks {
            let mut enqueue = EnqueueRequest::new(entry_task);
            enqueue.input = request.input.clone();
            enqueue.pipeline_run_id = Some(run_id.clone());
            enqueue.priority = request.priority;
            enqueue.metadata = request.metadata.clone();
            entry_runs.push(self.queue.prepare_run(&enqueue).await?);
        }

        self.pipeline_runs.create_with_tasks(&run, &entry_runs).await?;

        info!(
            "流水线 {} 触发运行 {}: 入口任务 {} 个",
            pipeline.id,
            run_id,
            entry_runs.len()
        );

        Ok(TriggerReceipt {
            pipeline_run_id: run_id,
            status: PipelineRunStatus::Running,
            input_path,
            entry_task_ids: pipeline.entry_tasks.clone(),
            queued_task_run_ids: entry_runs.into_iter().map(|r| r.id).collect(),
        })
    }

    /// 任务成功后的下游入队
    ///
    /// `selected_next` 是Worker的程序化路由：与声明后继求交集，
    /// 非法选择记日志后丢弃。join 任务只有在所有前驱都至少有一次
    /// completed 运行时才入队；最近一次完成的运行胜出提供上游引用。
    pub async fn queue_downstream_tasks(
        &self,
        completed_run_id: &str,
        selected_next: Option<Vec<String>>,
    ) -> OrchestratorResult<Vec<String>> {
        let run = self
            .task_runs
            .get(completed_run_id)
            .await?
            .ok_or_else(|| OrchestratorError::task_run_not_found(completed_run_id))?;

        // 独立运行没有下游，也不参与终态判定
        let Some(pipeline_run_id) = run.pipeline_run_id.clone() else {
            return Ok(Vec::new());
        };

        let pipeline_run = self
            .pipeline_runs
            .get(&pipeline_run_id)
            .await?
            .ok_or_else(|| OrchestratorError::PipelineRunNotFound {
                id: pipeline_run_id.clone(),
            })?;
        let def = self
            .tasks
            .get_task(&run.task_id)
            .await?
            .ok_or_else(|| OrchestratorError::task_not_found(&run.task_id))?;

        let next_tasks: Vec<String> = match selected_next {
            Some(selection) => selection
                .into_iter()
                .filter(|t| {
                    let allowed = def.allows_next(t);
                    if !allowed {
                        warn!(
                            "任务 {} 的程序化路由选择 {} 不在声明后继里，已丢弃",
                            run.task_id, t
                        );
                    }
                    allowed
                })
                .collect(),
            None => def.allowed_next.clone(),
        };

        if next_tasks.is_empty() {
            self.check_pipeline_completion(&pipeline_run).await?;
            return Ok(Vec::new());
        }

        let mut queued = Vec::new();
        for next_task in next_tasks {
            let predecessors = predecessors_in_snapshot(&pipeline_run.structure_snapshot, &next_task);

            if predecessors.len() > 1 {
                let mut ready = true;
                for pred in &predecessors {
                    if self
                        .task_runs
                        .latest_completed(&pipeline_run_id, pred)
                        .await?
                        .is_none()
                    {
                        ready = false;
                        break;
                    }
                }
                if !ready {
                    debug!(
                        "join 任务 {} 未就绪，等待其余前驱完成: run={}",
                        next_task, pipeline_run_id
                    );
                    continue;
                }
                // 前驱重复完成时避免重复入队
                if self
                    .task_runs
                    .active_run_exists(&pipeline_run_id, &next_task)
                    .await?
                {
                    debug!(
                        "join 任务 {} 已有未终态运行，跳过重复入队: run={}",
                        next_task, pipeline_run_id
                    );
                    continue;
                }
            }

            let mut upstream_refs: HashMap<String, UpstreamRef> = HashMap::new();
            for pred in &predecessors {
                if let Some(pred_run) = self
                    .task_runs
                    .latest_completed(&pipeline_run_id, pred)
                    .await?
                {
                    upstream_refs.insert(
                        pred.clone(),
                        UpstreamRef {
                            output_path: pred_run.output_path.unwrap_or_default(),
                            assets: pred_run.assets.unwrap_or_else(|| serde_json::json!({})),
                        },
                    );
                }
            }
            if upstream_refs.is_empty() {
                // 快照里无人声明该后继时退化为以完成任务自身作为上游
                upstream_refs.insert(
                    run.task_id.clone(),
                    UpstreamRef {
                        output_path: run.output_path.clone().unwrap_or_default(),
                        assets: run.assets.clone().unwrap_or_else(|| serde_json::json!({})),
                    },
                );
            }

            let mut enqueue = EnqueueRequest::new(&next_task);
            enqueue.pipeline_run_id = Some(pipeline_run_id.clone());
            enqueue.priority = Some(run.priority);
            enqueue.upstream_refs = upstream_refs;
            let receipt = self.queue.enqueue(enqueue).await?;
            debug!(
                "下游任务 {} 已入队: run={} 来自 {}",
                next_task, receipt.run_id, run.task_id
            );
            queued.push(receipt.run_id);
        }

        Ok(queued)
    }

    /// 任务终态失败后的流水线处理
    ///
    /// fail-fast：取消所有 pending 运行并把流水线标记为 failed；
    /// continue：等全部运行离开活跃状态后按结果判定终态。
    pub async fn handle_task_failure(&self, failed_run: &TaskRun) -> OrchestratorResult<()> {
        let Some(pipeline_run_id) = failed_run.pipeline_run_id.clone() else {
            return Ok(());
        };
        let pipeline_run = self
            .pipeline_runs
            .get(&pipeline_run_id)
            .await?
            .ok_or_else(|| OrchestratorError::PipelineRunNotFound {
                id: pipeline_run_id.clone(),
            })?;
        if pipeline_run.is_finished() {
            return Ok(());
        }

        match pipeline_run.failure_mode {
            FailureMode::FailFast => {
                let cancelled = self
                    .task_runs
                    .cancel_pending_for_pipeline(&pipeline_run_id, FAIL_FAST_CANCEL_ERROR)
                    .await?;
                self.pipeline_runs
                    .set_status(&pipeline_run_id, PipelineRunStatus::Failed, Some(Utc::now()))
                    .await?;
                info!(
                    "流水线运行 {} 因任务 {} 失败而终止（fail-fast），取消了 {} 个待执行运行",
                    pipeline_run_id, failed_run.task_id, cancelled
                );
            }
            FailureMode::Continue => {
                self.check_pipeline_completion(&pipeline_run).await?;
            }
        }
        Ok(())
    }

    /// 没有活跃运行时判定流水线终态；返回是否已终态
    pub async fn check_pipeline_completion(
        &self,
        pipeline_run: &PipelineRun,
    ) -> OrchestratorResult<bool> {
        let runs = self.task_runs.list_for_pipeline(&pipeline_run.id).await?;
        if runs.iter().any(|r| r.status.is_active()) {
            return Ok(false);
        }

        let any_failed = runs.iter().any(|r| {
            matches!(
                r.status,
                TaskRunStatus::Failed | TaskRunStatus::Timeout | TaskRunStatus::Cancelled
            )
        });
        let status = if any_failed {
            PipelineRunStatus::Failed
        } else {
            PipelineRunStatus::Completed
        };

        if !pipeline_run.is_finished() {
            self.pipeline_runs
                .set_status(&pipeline_run.id, status, Some(Utc::now()))
                .await?;
            info!(
                "流水线运行 {} 达到终态: {}",
                pipeline_run.id,
                status.as_str()
            );
        }
        Ok(true)
    }

    /// 纯校验 + 执行计划，不产生任何写入
    pub async fn dry_run(&self, pipeline_id: &str) -> OrchestratorResult<DryRunReport> {
        let pipeline = self
            .pipelines
            .get(pipeline_id)
            .await?
            .ok_or_else(|| OrchestratorError::pipeline_not_found(pipeline_id))?;
        let validation = self.validator.validate_pipeline(&pipeline).await?;
        let plan = if validation.is_valid() {
            PipelineGraph::from_structure(&pipeline.structure)
                .topological_levels(&pipeline.entry_tasks)
        } else {
            Vec::new()
        };
        Ok(DryRunReport { validation, plan })
    }

    pub async fn get_pipeline(&self, id: &str) -> OrchestratorResult<Option<Pipeline>> {
        self.pipelines.get(id).await
    }

    pub async fn list_pipelines(&self) -> OrchestratorResult<Vec<Pipeline>> {
        self.pipelines.list().await
    }
}

/// 快照里声明了 `task_id` 为后继的所有任务，排序保证确定性
fn predecessors_in_snapshot(snapshot: &PipelineStructure, task_id: &str) -> Vec<String> {
    let mut predecessors: Vec<String> = snapshot
        .iter()
        .filter(|(_, node)| node.allowed_next.iter().any(|n| n == task_id))
        .map(|(id, _)| id.clone())
        .collect();
    predecessors.sort();
    predecessors
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeweave_domain::PipelineNode;

    #[test]
    fn test_predecessors_in_snapshot() {
        let mut snapshot = PipelineStructure::new();
        snapshot.insert(
            "a".to_string(),
            PipelineNode {
                allowed_next: vec!["b".to_string(), "c".to_string()],
            },
        );
        snapshot.insert(
            "b".to_string(),
            PipelineNode {
                allowed_next: vec!["d".to_string()],
            },
        );
        snapshot.insert(
            "c".to_string(),
            PipelineNode {
                allowed_next: vec!["d".to_string()],
            },
        );
        snapshot.insert("d".to_string(), PipelineNode::default());

        assert_eq!(predecessors_in_snapshot(&snapshot, "d"), vec!["b", "c"]);
        assert_eq!(predecessors_in_snapshot(&snapshot, "b"), vec!["a"]);
        assert!(predecessors_in_snapshot(&snapshot, "a").is_empty());
    }
}
