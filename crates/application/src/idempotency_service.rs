//! 幂等缓存
//!
//! `(key → 已完成产物)` 的TTL缓存。指纹由Worker侧SDK在入队前计算，
//! 核心不参与哈希；同一key在TTL窗口内最多返回同一份缓存产物一次性结果。

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use pipeweave_domain::{IdempotencyEntry, IdempotencyRepository};
use pipeweave_errors::OrchestratorResult;

/// 缓存写入请求
#[derive(Debug, Clone)]
pub struct CacheStoreRequest {
    pub key: String,
    pub task_id: String,
    pub task_run_id: String,
    pub code_version: i32,
    pub output_path: String,
    pub ttl_sec: i64,
    pub output_size: Option<i64>,
    pub assets: Option<serde_json::Value>,
}

pub struct IdempotencyService {
    repo: Arc<dyn IdempotencyRepository>,
}

impl IdempotencyService {
    pub fn new(repo: Arc<dyn IdempotencyRepository>) -> Self {
        Self { repo }
    }

    /// 未过期的缓存命中
    pub async fn lookup(&self, key: &str) -> OrchestratorResult<Option<IdempotencyEntry>> {
        let hit = self.repo.find_live(key, Utc::now()).await?;
        if let Some(entry) = &hit {
            debug!("幂等缓存命中: key={} run={}", key, entry.task_run_id);
        }
        Ok(hit)
    }

    /// upsert 写入：同一key只保留最新一条
    pub async fn store(&self, request: CacheStoreRequest) -> OrchestratorResult<()> {
        let now = Utc::now();
        let entry = IdempotencyEntry {
            key: request.key,
            task_id: request.task_id,
            task_run_id: request.task_run_id,
            code_version: request.code_version,
            output_path: request.output_path,
            output_size: request.output_size,
            assets: request.assets,
            cached_at: now,
            expires_at: now + Duration::seconds(request.ttl_sec.max(0)),
        };
        self.repo.upsert(&entry).await
    }

    /// 批量清理过期条目（由 `db cleanup` 周期驱动）
    pub async fn cleanup_expired(&self) -> OrchestratorResult<u64> {
        let removed = self.repo.delete_expired(Utc::now()).await?;
        if removed > 0 {
            info!("清理了 {} 条过期幂等缓存", removed);
        }
        Ok(removed)
    }
}
