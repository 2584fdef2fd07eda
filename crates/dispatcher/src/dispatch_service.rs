//! 调度循环
//!
//! 每个tick：维护模式放行 → 领取可分发运行 → 每条运行独立并行分发。
//! 单条运行的分发失败只影响它自己；循环体本身的错误记日志后
//! 等下一个tick继续。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use pipeweave_application::{
    CredentialIssuer, DispatchRequest, HeartbeatMonitor, MaintenanceService, QueueService,
    TaskFailureService, TickDriver, WorkerTransport,
};
use pipeweave_domain::{ServiceRepository, TaskRepository, TaskRun};
use pipeweave_errors::{OrchestratorError, OrchestratorResult};

/// 分发失败的错误码
pub const DISPATCH_FAILED_CODE: &str = "DISPATCH_FAILED";

struct DispatchInner {
    queue: Arc<QueueService>,
    services: Arc<dyn ServiceRepository>,
    tasks: Arc<dyn TaskRepository>,
    transport: Arc<dyn WorkerTransport>,
    credentials: Arc<dyn CredentialIssuer>,
    heartbeats: Arc<HeartbeatMonitor>,
    failure: Arc<TaskFailureService>,
    maintenance: Arc<MaintenanceService>,
}

#[derive(Clone)]
pub struct DispatchService {
    inner: Arc<DispatchInner>,
    max_concurrency: i64,
}

impl DispatchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<QueueService>,
        services: Arc<dyn ServiceRepository>,
        tasks: Arc<dyn TaskRepository>,
        transport: Arc<dyn WorkerTransport>,
        credentials: Arc<dyn CredentialIssuer>,
        heartbeats: Arc<HeartbeatMonitor>,
        failure: Arc<TaskFailureService>,
        maintenance: Arc<MaintenanceService>,
        max_concurrency: i64,
    ) -> Self {
        Self {
            inner: Arc::new(DispatchInner {
                queue,
                services,
                tasks,
                transport,
                credentials,
                heartbeats,
                failure,
                maintenance,
            }),
            max_concurrency,
        }
    }

    /// 一次调度循环体，返回成功分发的运行数
    pub async fn run_tick(&self) -> OrchestratorResult<usize> {
        if !self.inner.maintenance.can_accept_tasks().await? {
            debug!("维护模式生效，本tick不领取任务");
            return Ok(0);
        }

        let claimed = self.inner.queue.get_next(self.max_concurrency).await?;
        if claimed.is_empty() {
            return Ok(0);
        }
        debug!("本tick领取了 {} 条可分发运行", claimed.len());

        let mut handles = Vec::with_capacity(claimed.len());
        for run in claimed {
            let inner = Arc::clone(&self.inner);
            handles.push(tokio::spawn(async move { inner.dispatch_one(run).await }));
        }

        let mut dispatched = 0usize;
        for handle in handles {
            match handle.await {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => error!("分发子任务panic: {}", e),
            }
        }
        Ok(dispatched)
    }

    /// 持续模式：按固定间隔执行tick，直到收到关闭信号
    pub async fn run_loop(&self, poll_interval_ms: u64, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(poll_interval_ms.max(1)));
        info!("调度循环启动: 间隔 {}ms", poll_interval_ms);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_tick().await {
                        Ok(0) => {}
                        Ok(n) => info!("本tick分发了 {} 条运行", n),
                        Err(e) => error!("调度tick失败: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("调度循环收到关闭信号");
                    break;
                }
            }
        }
    }
}

impl DispatchInner {
    /// 单条运行的隔离分发：任何错误走失败路径，不向外传播
    async fn dispatch_one(&self, run: TaskRun) -> bool {
        let run_id = run.id.clone();
        match self.try_dispatch(run).await {
            Ok(()) => true,
            Err(e) => {
                error!("运行 {} 分发失败: {}", run_id, e);
                if let Err(follow_up) = self
                    .failure
                    .handle_failure(&run_id, &e.to_string(), Some(DISPATCH_FAILED_CODE))
                    .await
                {
                    error!("运行 {} 的分发失败处理出错: {}", run_id, follow_up);
                }
                false
            }
        }
    }

    async fn try_dispatch(&self, run: TaskRun) -> OrchestratorResult<()> {
        let run = self.queue.mark_running(&run.id).await?;
        let def = self
            .tasks
            .get_task(&run.task_id)
            .await?
            .ok_or_else(|| OrchestratorError::task_not_found(&run.task_id))?;
        let service = self
            .services
            .get_service(&def.service_id)
            .await?
            .ok_or_else(|| OrchestratorError::ServiceNotFound {
                id: def.service_id.clone(),
            })?;

        let storage_token = self.credentials.issue(&run)?;
        let request = DispatchRequest {
            run_id: run.id.clone(),
            task_id: run.task_id.clone(),
            code_version: run.code_version,
            code_hash: run.code_hash.clone(),
            input_path: run.input_path.clone(),
            upstream_refs: run.upstream_refs.clone(),
            storage_token,
            attempt: run.attempt,
            previous_attempts: run.previous_attempts.clone(),
            metadata: run.metadata.clone(),
        };

        self.transport.dispatch(&service, &request).await?;
        self.heartbeats
            .start_tracking(run.id.clone(), def.heartbeat_interval_ms);
        debug!(
            "运行 {} 已交给服务 {}: attempt={}",
            run.id, service.id, run.attempt
        );
        Ok(())
    }
}

#[async_trait]
impl TickDriver for DispatchService {
    async fn tick(&self) -> OrchestratorResult<usize> {
        self.run_tick().await
    }
}
