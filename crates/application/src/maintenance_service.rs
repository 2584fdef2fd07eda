//! 维护状态机
//!
//! 单例状态行：running → waiting_for_maintenance → maintenance → running。
//! 维护只拒绝新任务的准入，不抢占已运行的任务；
//! waiting 状态下活跃任务清零时由任务完成钩子自动进入 maintenance。

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use pipeweave_domain::{
    MaintenanceMode, MaintenanceRepository, MaintenanceState, TaskRunRepository,
};
use pipeweave_errors::{OrchestratorError, OrchestratorResult};

pub struct MaintenanceService {
    repo: Arc<dyn MaintenanceRepository>,
    task_runs: Arc<dyn TaskRunRepository>,
}

impl MaintenanceService {
    pub fn new(repo: Arc<dyn MaintenanceRepository>, task_runs: Arc<dyn TaskRunRepository>) -> Self {
        Self { repo, task_runs }
    }

    pub async fn current(&self) -> OrchestratorResult<MaintenanceState> {
        self.repo.load(Utc::now()).await
    }

    /// 调度器每个tick检查：只有 running 模式接收新任务
    pub async fn can_accept_tasks(&self) -> OrchestratorResult<bool> {
        Ok(self.current().await?.mode == MaintenanceMode::Running)
    }

    /// 请求进入维护：没有活跃任务时直接进入，否则先排空
    pub async fn request_maintenance(&self) -> OrchestratorResult<MaintenanceState> {
        let state = self.current().await?;
        if state.mode != MaintenanceMode::Running {
            return Ok(state);
        }

        let counts = self.task_runs.counts().await?;
        let target = if counts.pending + counts.running == 0 {
            MaintenanceMode::Maintenance
        } else {
            MaintenanceMode::WaitingForMaintenance
        };
        self.repo
            .transition(MaintenanceMode::Running, target, Utc::now())
            .await?;
        let state = self.current().await?;
        info!("维护请求已受理，当前模式: {}", state.mode.as_str());
        Ok(state)
    }

    /// 强制进入维护：仍有活跃任务时拒绝
    pub async fn enter_maintenance(&self) -> OrchestratorResult<MaintenanceState> {
        let counts = self.task_runs.counts().await?;
        if counts.pending + counts.running > 0 {
            return Err(OrchestratorError::MaintenanceConflict(format!(
                "仍有 {} 个待执行、{} 个运行中的任务，无法进入维护模式",
                counts.pending, counts.running
            )));
        }

        let now = Utc::now();
        let moved = self
            .repo
            .transition(MaintenanceMode::Running, MaintenanceMode::Maintenance, now)
            .await?
            || self
                .repo
                .transition(
                    MaintenanceMode::WaitingForMaintenance,
                    MaintenanceMode::Maintenance,
                    now,
                )
                .await?;

        let state = self.current().await?;
        if moved || state.mode == MaintenanceMode::Maintenance {
            info!("已进入维护模式");
            Ok(state)
        } else {
            Err(OrchestratorError::MaintenanceConflict(format!(
                "当前模式 {} 无法进入维护",
                state.mode.as_str()
            )))
        }
    }

    /// 退出维护，恢复任务准入
    pub async fn exit_maintenance(&self) -> OrchestratorResult<MaintenanceState> {
        let now = Utc::now();
        let moved = self
            .repo
            .transition(MaintenanceMode::Maintenance, MaintenanceMode::Running, now)
            .await?
            || self
                .repo
                .transition(
                    MaintenanceMode::WaitingForMaintenance,
                    MaintenanceMode::Running,
                    now,
                )
                .await?;

        let state = self.current().await?;
        if moved {
            info!("已退出维护模式，恢复任务准入");
        }
        Ok(state)
    }

    /// 任务状态变更钩子
    ///
    /// 排空只等待在途（running）的任务：pending 运行已被准入门挡住，
    /// 不会再被领取，因此 running 清零即可进入维护。
    pub async fn on_task_status_change(&self) -> OrchestratorResult<()> {
        let state = self.current().await?;
        if state.mode != MaintenanceMode::WaitingForMaintenance {
            return Ok(());
        }
        let counts = self.task_runs.counts().await?;
        if counts.running == 0 {
            let moved = self
                .repo
                .transition(
                    MaintenanceMode::WaitingForMaintenance,
                    MaintenanceMode::Maintenance,
                    Utc::now(),
                )
                .await?;
            if moved {
                info!("排空完成，自动进入维护模式");
            }
        } else {
            debug!("维护排空中，剩余 {} 个在途任务", counts.running);
        }
        Ok(())
    }
}
