//! 启动恢复
//!
//! 进程重启会丢失所有内存中的心跳定时器。启动时扫描心跳超期
//! 仍停留在 running 的运行，标记为 timeout 并走常规失败路径，
//! 避免出现永远滞留的运行。

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use pipeweave_application::heartbeat_service::{
    HEARTBEAT_TIMEOUT_CODE, HEARTBEAT_TIMEOUT_ERROR,
};
use pipeweave_application::TaskFailureService;
use pipeweave_domain::TaskRunRepository;
use pipeweave_errors::OrchestratorResult;

pub struct RecoveryService {
    task_runs: Arc<dyn TaskRunRepository>,
    failure: Arc<TaskFailureService>,
}

impl RecoveryService {
    pub fn new(task_runs: Arc<dyn TaskRunRepository>, failure: Arc<TaskFailureService>) -> Self {
        Self { task_runs, failure }
    }

    /// 扫描并恢复滞留的 running 运行，返回处理条数
    pub async fn recover_stale_runs(&self) -> OrchestratorResult<usize> {
        let stale = self.task_runs.find_stale_running(Utc::now()).await?;
        if stale.is_empty() {
            info!("启动恢复扫描：没有滞留的运行");
            return Ok(0);
        }

        warn!("启动恢复扫描：发现 {} 条心跳超期的运行", stale.len());
        let mut recovered = 0usize;
        for run in stale {
            match self
                .task_runs
                .mark_timed_out(
                    &run.id,
                    HEARTBEAT_TIMEOUT_ERROR,
                    HEARTBEAT_TIMEOUT_CODE,
                    Utc::now(),
                )
                .await
            {
                Ok(Some(_)) => {
                    if let Err(e) = self
                        .failure
                        .handle_failure(
                            &run.id,
                            HEARTBEAT_TIMEOUT_ERROR,
                            Some(HEARTBEAT_TIMEOUT_CODE),
                        )
                        .await
                    {
                        error!("恢复运行 {} 的失败处理出错: {}", run.id, e);
                    } else {
                        recovered += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => error!("标记滞留运行 {} 超时失败: {}", run.id, e),
            }
        }
        info!("启动恢复完成：处理了 {} 条滞留运行", recovered);
        Ok(recovered)
    }
}
