use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};

use pipeweave_api::{create_routes, AppState};
use pipeweave_application::{
    DeadLetterService, HeartbeatMonitor, IdempotencyService, MaintenanceService, PipelineExecutor,
    PipelineValidator, QueueService, RetryService, ServiceRegistry, TaskFailureService,
};
use pipeweave_config::{AppConfig, DispatchMode};
use pipeweave_dispatcher::{
    DispatchService, HttpWorkerTransport, RecoveryService, StorageTokenIssuer,
};
use pipeweave_domain::{
    DlqRepository, IdempotencyRepository, MaintenanceRepository, PipelineRepository,
    PipelineRunRepository, ServiceRepository, TaskRepository, TaskRunRepository,
};
use pipeweave_infrastructure::{
    create_database_pool, PostgresDlqRepository, PostgresIdempotencyRepository,
    PostgresMaintenanceRepository, PostgresPipelineRepository, PostgresPipelineRunRepository,
    PostgresServiceRepository, PostgresTaskRepository, PostgresTaskRunRepository,
};

use crate::shutdown::ShutdownManager;

/// 主应用程序：装配仓储、服务与HTTP路由
pub struct Application {
    config: AppConfig,
    state: AppState,
    dispatch: DispatchService,
    recovery: RecoveryService,
    idempotency: Arc<IdempotencyService>,
    dlq: Arc<DeadLetterService>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = create_database_pool(&config.database).await?;

        let services_repo: Arc<dyn ServiceRepository> =
            Arc::new(PostgresServiceRepository::new(pool.clone()));
        let tasks_repo: Arc<dyn TaskRepository> =
            Arc::new(PostgresTaskRepository::new(pool.clone()));
        let pipelines_repo: Arc<dyn PipelineRepository> =
            Arc::new(PostgresPipelineRepository::new(pool.clone()));
        let pipeline_runs_repo: Arc<dyn PipelineRunRepository> =
            Arc::new(PostgresPipelineRunRepository::new(pool.clone()));
        let task_runs_repo: Arc<dyn TaskRunRepository> =
            Arc::new(PostgresTaskRunRepository::new(pool.clone()));
        let dlq_repo: Arc<dyn DlqRepository> = Arc::new(PostgresDlqRepository::new(pool.clone()));
        let idempotency_repo: Arc<dyn IdempotencyRepository> =
            Arc::new(PostgresIdempotencyRepository::new(pool.clone()));
        let maintenance_repo: Arc<dyn MaintenanceRepository> =
            Arc::new(PostgresMaintenanceRepository::new(pool));

        let registry = Arc::new(ServiceRegistry::new(
            Arc::clone(&services_repo),
            Arc::clone(&tasks_repo),
        ));
        let idempotency = Arc::new(IdempotencyService::new(Arc::clone(&idempotency_repo)));
        let maintenance = Arc::new(MaintenanceService::new(
            Arc::clone(&maintenance_repo),
            Arc::clone(&task_runs_repo),
        ));
        let queue = Arc::new(QueueService::new(
            Arc::clone(&tasks_repo),
            Arc::clone(&task_runs_repo),
            Arc::clone(&dlq_repo),
            Arc::clone(&idempotency),
            Arc::clone(&maintenance),
            config.retention.default_idempotency_ttl_sec,
        ));
        let validator = Arc::new(PipelineValidator::new(Arc::clone(&tasks_repo)));
        let executor = Arc::new(PipelineExecutor::new(
            Arc::clone(&pipelines_repo),
            Arc::clone(&pipeline_runs_repo),
            Arc::clone(&task_runs_repo),
            Arc::clone(&tasks_repo),
            validator,
            Arc::clone(&queue),
        ));
        let retry = Arc::new(RetryService::new(Arc::clone(&task_runs_repo)));
        let dlq = Arc::new(DeadLetterService::new(
            Arc::clone(&dlq_repo),
            Arc::clone(&queue),
        ));
        let failure = Arc::new(TaskFailureService::new(
            Arc::clone(&tasks_repo),
            Arc::clone(&task_runs_repo),
            retry,
            Arc::clone(&dlq),
            Arc::clone(&queue),
            Arc::clone(&executor),
        ));
        let heartbeats = Arc::new(HeartbeatMonitor::new(
            Arc::clone(&task_runs_repo),
            Arc::clone(&failure),
        ));

        let transport = Arc::new(HttpWorkerTransport::new(Duration::from_secs(
            config.api.request_timeout_seconds,
        ))?);
        let credentials = Arc::new(StorageTokenIssuer::new(
            &config.security.secret_key,
            config.security.storage_token_ttl_seconds,
        ));
        let dispatch = DispatchService::new(
            Arc::clone(&queue),
            Arc::clone(&services_repo),
            Arc::clone(&tasks_repo),
            transport,
            credentials,
            Arc::clone(&heartbeats),
            Arc::clone(&failure),
            Arc::clone(&maintenance),
            config.dispatcher.max_concurrency,
        );
        let recovery = RecoveryService::new(Arc::clone(&task_runs_repo), Arc::clone(&failure));

        let state = AppState {
            registry,
            queue,
            executor,
            maintenance,
            dlq: Arc::clone(&dlq),
            heartbeats,
            failure,
            ticker: Arc::new(dispatch.clone()),
            pipeline_runs: pipeline_runs_repo,
            dlq_retention_days: config.retention.dlq_retention_days,
        };

        Ok(Self {
            config,
            state,
            dispatch,
            recovery,
            idempotency,
            dlq,
        })
    }

    /// 启动编排器：恢复扫描 → 调度循环（continuous模式）→ HTTP服务
    pub async fn run(&self, shutdown: ShutdownManager) -> Result<()> {
        self.recovery.recover_stale_runs().await?;

        let dispatcher_handle = match self.config.dispatcher.mode {
            DispatchMode::Continuous => {
                let dispatch = self.dispatch.clone();
                let interval = self.config.dispatcher.poll_interval_ms;
                let shutdown_rx = shutdown.subscribe();
                Some(tokio::spawn(async move {
                    dispatch.run_loop(interval, shutdown_rx).await;
                }))
            }
            DispatchMode::TickDriven => {
                info!("tick-driven 模式：调度循环由 POST /api/tick 驱动");
                None
            }
        };

        let app = create_routes(self.state.clone());
        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        let mut server_shutdown = shutdown.subscribe();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = server_shutdown.recv().await;
        });
        if let Err(e) = server.await {
            error!("API服务器运行失败: {}", e);
        }

        if let Some(handle) = dispatcher_handle {
            let _ = handle.await;
        }
        info!("编排器已停止");
        Ok(())
    }

    /// 周期清理：过期幂等缓存 + 超保留期死信
    pub async fn run_cleanup(&self) -> Result<()> {
        let expired = self.idempotency.cleanup_expired().await?;
        let purged = self.dlq.purge(self.config.retention.dlq_retention_days).await?;
        info!(
            "数据库清理完成: 幂等缓存清理 {} 条, 死信清理 {} 条",
            expired, purged
        );
        Ok(())
    }
}
