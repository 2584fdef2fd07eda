//! 服务注册
//!
//! Worker服务上报自身与其任务配置。注册是幂等的：配置摘要不变则
//! 版本号不动；摘要变化时版本单调递增并追加代码历史；服务版本变更
//! 时消失的任务成为孤儿，其 pending 运行被取消但定义保留。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use pipeweave_domain::{
    CodeChange, RegistrationOutcome, RegistrationPlan, Service, ServiceRegistration,
    ServiceRepository, ServiceStatus, TaskCodeHistory, TaskDefinition, TaskRepository, TaskSpec,
};
use pipeweave_errors::OrchestratorResult;

/// 摘要取SHA-256十六进制的前16位
const CODE_HASH_LEN: usize = 16;

/// 任务配置的内容摘要
///
/// 规范化形式是 `TaskSpec` 的JSON序列化（字段顺序稳定）。
/// 改变序列化方式会使所有已存在的摘要失效，等价于一次全量版本升级。
pub fn compute_code_hash(spec: &TaskSpec) -> OrchestratorResult<String> {
    let canonical = serde_json::to_vec(spec)?;
    let digest = Sha256::digest(&canonical);
    let hex = format!("{digest:x}");
    Ok(hex[..CODE_HASH_LEN].to_string())
}

pub struct ServiceRegistry {
    services: Arc<dyn ServiceRepository>,
    tasks: Arc<dyn TaskRepository>,
}

impl ServiceRegistry {
    pub fn new(services: Arc<dyn ServiceRepository>, tasks: Arc<dyn TaskRepository>) -> Self {
        Self { services, tasks }
    }

    /// 注册或更新一个服务及其任务
    ///
    /// 先读出既有状态计算写入计划，再由仓储在一个事务里原子落盘。
    pub async fn register(
        &self,
        registration: ServiceRegistration,
    ) -> OrchestratorResult<RegistrationOutcome> {
        let now = Utc::now();
        let previous = self.services.get_service(&registration.service_id).await?;
        let version_changed = previous
            .as_ref()
            .map(|p| p.version != registration.version)
            .unwrap_or(false);

        let existing: HashMap<String, TaskDefinition> = self
            .tasks
            .list_for_service(&registration.service_id)
            .await?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        // 服务版本变更时，存量任务里不在本次上报中的成为孤儿
        let orphaned_task_ids: Vec<String> = if version_changed {
            let incoming: HashMap<&str, ()> = registration
                .tasks
                .iter()
                .map(|t| (t.id.as_str(), ()))
                .collect();
            let mut orphans: Vec<String> = existing
                .keys()
                .filter(|id| !incoming.contains_key(id.as_str()))
                .cloned()
                .collect();
            orphans.sort();
            orphans
        } else {
            Vec::new()
        };

        if !orphaned_task_ids.is_empty() {
            warn!(
                "服务 {} 版本 {} 移除了 {} 个任务: {:?}",
                registration.service_id,
                registration.version,
                orphaned_task_ids.len(),
                orphaned_task_ids
            );
        }

        let mut code_changes: Vec<CodeChange> = Vec::new();
        let mut history: Vec<TaskCodeHistory> = Vec::new();
        let mut task_rows: Vec<TaskDefinition> = Vec::with_capacity(registration.tasks.len());

        for spec in &registration.tasks {
            let code_hash = compute_code_hash(spec)?;
            let old = existing.get(&spec.id);
            let (code_version, changed) = match old {
                Some(def) if def.code_hash == code_hash => (def.code_version, false),
                Some(def) => (def.code_version + 1, true),
                None => (1, true),
            };

            if changed {
                code_changes.push(CodeChange {
                    task_id: spec.id.clone(),
                    old_version: old.map(|d| d.code_version),
                    new_version: code_version,
                    code_hash: code_hash.clone(),
                });
                history.push(TaskCodeHistory {
                    task_id: spec.id.clone(),
                    code_version,
                    code_hash: code_hash.clone(),
                    service_version: registration.version.clone(),
                    recorded_at: now,
                });
            }

            task_rows.push(TaskDefinition {
                id: spec.id.clone(),
                service_id: registration.service_id.clone(),
                code_hash,
                code_version,
                allowed_next: spec.allowed_next.clone(),
                timeout_sec: spec.timeout_sec,
                max_retries: spec.max_retries,
                retry_backoff: spec.retry_backoff,
                retry_delay_ms: spec.retry_delay_ms,
                max_retry_delay_ms: spec.max_retry_delay_ms,
                heartbeat_interval_ms: spec.heartbeat_interval_ms,
                concurrency: spec.concurrency,
                priority: spec.priority,
                idempotency_ttl_sec: spec.idempotency_ttl_sec,
                description: spec.description.clone(),
                created_at: old.map(|d| d.created_at).unwrap_or(now),
                updated_at: now,
            });
        }

        let plan = RegistrationPlan {
            service: Service {
                id: registration.service_id.clone(),
                version: registration.version.clone(),
                base_url: registration.base_url.clone(),
                status: ServiceStatus::Active,
                registered_at: previous.as_ref().map(|p| p.registered_at).unwrap_or(now),
                last_heartbeat: now,
            },
            tasks: task_rows,
            history,
            orphaned_task_ids: orphaned_task_ids.clone(),
            orphan_error: format!(
                "Task type removed in version {}",
                registration.version
            ),
        };

        self.services.apply_registration(&plan).await?;

        info!(
            "服务 {} 注册完成: 版本={} 任务数={} 代码变更={} 孤儿={}",
            registration.service_id,
            registration.version,
            registration.tasks.len(),
            code_changes.len(),
            orphaned_task_ids.len()
        );

        Ok(RegistrationOutcome {
            code_changes,
            orphaned_tasks: if orphaned_task_ids.is_empty() {
                None
            } else {
                Some(orphaned_task_ids)
            },
        })
    }

    pub async fn get_service(&self, id: &str) -> OrchestratorResult<Option<Service>> {
        self.services.get_service(id).await
    }

    pub async fn list_services(&self) -> OrchestratorResult<Vec<Service>> {
        self.services.list_services().await
    }

    pub async fn get_task(&self, id: &str) -> OrchestratorResult<Option<TaskDefinition>> {
        self.tasks.get_task(id).await
    }

    pub async fn list_tasks_for_service(
        &self,
        service_id: &str,
    ) -> OrchestratorResult<Vec<TaskDefinition>> {
        self.tasks.list_for_service(service_id).await
    }

    pub async fn get_task_code_history(
        &self,
        task_id: &str,
    ) -> OrchestratorResult<Vec<pipeweave_domain::TaskCodeHistory>> {
        self.tasks.code_history(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> TaskSpec {
        serde_json::from_value(serde_json::json!({ "id": id })).unwrap()
    }

    #[test]
    fn test_code_hash_is_stable() {
        let a = compute_code_hash(&spec("resize")).unwrap();
        let b = compute_code_hash(&spec("resize")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_code_hash_tracks_config_changes() {
        let base = spec("resize");
        let mut changed = spec("resize");
        changed.timeout_sec = 600;
        assert_ne!(
            compute_code_hash(&base).unwrap(),
            compute_code_hash(&changed).unwrap()
        );

        let mut reordered_next = spec("resize");
        reordered_next.allowed_next = vec!["b".to_string(), "a".to_string()];
        let mut ordered_next = spec("resize");
        ordered_next.allowed_next = vec!["a".to_string(), "b".to_string()];
        // allowed_next 是有序列表，顺序变化就是配置变化
        assert_ne!(
            compute_code_hash(&reordered_next).unwrap(),
            compute_code_hash(&ordered_next).unwrap()
        );
    }
}
