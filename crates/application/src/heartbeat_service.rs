//! 心跳监控
//!
//! 进程内按运行ID维护协作式定时器，超时阈值是心跳间隔的两倍。
//! 定时器表是系统里仅有的进程内共享可变状态之一，由互斥锁保护：
//! 分发方布防、回调方撤防、定时器自身到期三方并发写。
//! 进程重启会丢失所有定时器，由启动时的恢复扫描兜底。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::failure_service::TaskFailureService;
use pipeweave_domain::{HeartbeatProgress, TaskRunRepository};
use pipeweave_errors::OrchestratorResult;

/// 心跳超时写入的错误文案与错误码
pub const HEARTBEAT_TIMEOUT_ERROR: &str = "Task heartbeat timeout";
pub const HEARTBEAT_TIMEOUT_CODE: &str = "TIMEOUT";

struct TimerEntry {
    interval_ms: i64,
    handle: JoinHandle<()>,
}

struct MonitorInner {
    task_runs: Arc<dyn TaskRunRepository>,
    failure: Arc<TaskFailureService>,
    timers: Mutex<HashMap<String, TimerEntry>>,
}

pub struct HeartbeatMonitor {
    inner: Arc<MonitorInner>,
}

impl HeartbeatMonitor {
    pub fn new(task_runs: Arc<dyn TaskRunRepository>, failure: Arc<TaskFailureService>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                task_runs,
                failure,
                timers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// 布防：`2 × heartbeat_interval_ms` 内没有心跳则判超时
    pub fn start_tracking(&self, run_id: String, heartbeat_interval_ms: i64) {
        let deadline_ms = (heartbeat_interval_ms.max(1) as u64).saturating_mul(2);
        let inner = Arc::clone(&self.inner);
        let timer_run_id = run_id.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(deadline_ms)).await;
            inner.on_timer_fired(&timer_run_id).await;
        });

        let mut timers = self.inner.timers.lock().expect("heartbeat timer map poisoned");
        if let Some(previous) = timers.insert(
            run_id,
            TimerEntry {
                interval_ms: heartbeat_interval_ms,
                handle,
            },
        ) {
            previous.handle.abort();
        }
    }

    /// 心跳上报：刷新心跳时间与进度，重置定时器
    pub async fn record_heartbeat(
        &self,
        run_id: &str,
        progress: Option<&HeartbeatProgress>,
    ) -> OrchestratorResult<bool> {
        let alive = self
            .inner
            .task_runs
            .record_heartbeat(run_id, progress, Utc::now())
            .await?;
        if !alive {
            debug!("运行 {} 已不在 running 状态，心跳被忽略", run_id);
            return Ok(false);
        }

        let interval_ms = {
            let timers = self.inner.timers.lock().expect("heartbeat timer map poisoned");
            timers.get(run_id).map(|t| t.interval_ms)
        };
        if let Some(interval_ms) = interval_ms {
            self.start_tracking(run_id.to_string(), interval_ms);
        }
        Ok(true)
    }

    /// 撤防（任务结果已送达）
    pub fn cancel_tracking(&self, run_id: &str) {
        let removed = {
            let mut timers = self.inner.timers.lock().expect("heartbeat timer map poisoned");
            timers.remove(run_id)
        };
        if let Some(entry) = removed {
            entry.handle.abort();
            debug!("运行 {} 的心跳定时器已撤销", run_id);
        }
    }

    /// 当前布防中的运行数
    pub fn tracked_count(&self) -> usize {
        self.inner
            .timers
            .lock()
            .expect("heartbeat timer map poisoned")
            .len()
    }
}

impl MonitorInner {
    async fn on_timer_fired(&self, run_id: &str) {
        {
            let mut timers = self.timers.lock().expect("heartbeat timer map poisoned");
            timers.remove(run_id);
        }

        // 只在仍然 running 时落超时，避免覆盖已到达的终态
        match self
            .task_runs
            .mark_timed_out(
                run_id,
                HEARTBEAT_TIMEOUT_ERROR,
                HEARTBEAT_TIMEOUT_CODE,
                Utc::now(),
            )
            .await
        {
            Ok(Some(_)) => {
                warn!("运行 {} 心跳超时", run_id);
                if let Err(e) = self
                    .failure
                    .handle_failure(run_id, HEARTBEAT_TIMEOUT_ERROR, Some(HEARTBEAT_TIMEOUT_CODE))
                    .await
                {
                    error!("运行 {} 超时后的失败处理出错: {}", run_id, e);
                }
            }
            Ok(None) => {
                debug!("运行 {} 已离开 running 状态，超时定时器空转", run_id);
            }
            Err(e) => {
                error!("标记运行 {} 超时失败: {}", run_id, e);
            }
        }
    }
}
