//! 重试调度
//!
//! 失败的任务运行按固定或指数退避重置回 pending，
//! 超出重试预算则交由调用方写入死信队列。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use pipeweave_domain::{AttemptRecord, RetryBackoff, TaskDefinition, TaskRun, TaskRunRepository};
use pipeweave_errors::OrchestratorResult;

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// 已调度下一次尝试
    Scheduled {
        run_at: DateTime<Utc>,
        next_attempt: i32,
    },
    /// 重试预算已耗尽
    Exhausted,
}

pub struct RetryService {
    task_runs: Arc<dyn TaskRunRepository>,
}

impl RetryService {
    pub fn new(task_runs: Arc<dyn TaskRunRepository>) -> Self {
        Self { task_runs }
    }

    /// 为失败的运行调度重试
    ///
    /// `attempt` 从1开始，最多允许 `max_retries` 次重试，
    /// 即 attempt 最大到 `max_retries + 1`。本次失败的错误信息
    /// 作为历史记录追加，错误字段随状态一起清空。
    pub async fn schedule_retry(
        &self,
        run: &TaskRun,
        def: &TaskDefinition,
        error: &str,
        error_code: Option<&str>,
    ) -> OrchestratorResult<RetryOutcome> {
        if run.attempt > run.max_retries {
            debug!(
                "任务运行 {} 已达到最大重试次数 {}，不再重试",
                run.id, run.max_retries
            );
            return Ok(RetryOutcome::Exhausted);
        }

        let delay = backoff_delay(
            def.retry_backoff,
            run.attempt,
            def.retry_delay_ms,
            def.max_retry_delay_ms,
        );
        let now = Utc::now();
        let run_at = now + delay;
        let next_attempt = run.attempt + 1;

        let record = AttemptRecord {
            attempt: run.attempt,
            error: error.to_string(),
            error_code: error_code.map(str::to_string),
            timestamp: now,
        };

        self.task_runs
            .schedule_retry(&run.id, &record, next_attempt, run_at)
            .await?;

        info!(
            "任务运行 {} 第 {} 次尝试失败，第 {} 次尝试调度到 {}",
            run.id,
            run.attempt,
            next_attempt,
            run_at.format("%Y-%m-%d %H:%M:%S%.3f UTC")
        );

        Ok(RetryOutcome::Scheduled {
            run_at,
            next_attempt,
        })
    }
}

/// 计算退避延迟
///
/// fixed ⇒ retry_delay_ms；exponential ⇒ min(retry_delay_ms × 2^(attempt−1), max)。
pub fn backoff_delay(
    backoff: RetryBackoff,
    attempt: i32,
    retry_delay_ms: i64,
    max_retry_delay_ms: i64,
) -> Duration {
    let millis = match backoff {
        RetryBackoff::Fixed => retry_delay_ms,
        RetryBackoff::Exponential => {
            let shift = (attempt - 1).clamp(0, 62) as u32;
            let factor = 1i64.checked_shl(shift).unwrap_or(i64::MAX);
            retry_delay_ms
                .saturating_mul(factor)
                .min(max_retry_delay_ms)
        }
    };
    Duration::milliseconds(millis.max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        for attempt in 1..=5 {
            let d = backoff_delay(RetryBackoff::Fixed, attempt, 500, 10_000);
            assert_eq!(d.num_milliseconds(), 500);
        }
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        assert_eq!(
            backoff_delay(RetryBackoff::Exponential, 1, 100, 10_000).num_milliseconds(),
            100
        );
        assert_eq!(
            backoff_delay(RetryBackoff::Exponential, 2, 100, 10_000).num_milliseconds(),
            200
        );
        assert_eq!(
            backoff_delay(RetryBackoff::Exponential, 3, 100, 10_000).num_milliseconds(),
            400
        );
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        assert_eq!(
            backoff_delay(RetryBackoff::Exponential, 10, 100, 10_000).num_milliseconds(),
            10_000
        );
        // 大attempt不能溢出
        assert_eq!(
            backoff_delay(RetryBackoff::Exponential, 200, 100, 10_000).num_milliseconds(),
            10_000
        );
    }
}
