//! Mock implementations for repository and port traits
//!
//! `InMemoryStore` is a single shared store implementing every repository
//! trait; cross-aggregate operations (registration plans, transactional
//! pipeline-run creation) mutate one map set under one lock, mirroring the
//! atomicity the Postgres implementations get from transactions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use pipeweave_application::{CredentialIssuer, DispatchRequest, WorkerTransport};
use pipeweave_domain::{
    AttemptRecord, DlqEntry, DlqRepository, HeartbeatProgress, IdempotencyEntry,
    IdempotencyRepository, MaintenanceMode, MaintenanceRepository, MaintenanceState, Pipeline,
    PipelineRepository, PipelineRun, PipelineRunFilter, PipelineRunRepository, PipelineRunStatus,
    QueueStatusSummary, RegistrationPlan, Service, ServiceRepository, TaskCodeHistory,
    TaskCompletion, TaskDefinition, TaskRepository, TaskRun, TaskRunRepository, TaskRunStatus,
};
use pipeweave_errors::{OrchestratorError, OrchestratorResult};

#[derive(Default)]
struct StoreInner {
    services: HashMap<String, Service>,
    tasks: HashMap<String, TaskDefinition>,
    history: Vec<TaskCodeHistory>,
    pipelines: HashMap<String, Pipeline>,
    pipeline_runs: HashMap<String, PipelineRun>,
    task_runs: HashMap<String, TaskRun>,
    dlq: HashMap<String, DlqEntry>,
    idempotency: HashMap<String, IdempotencyEntry>,
    maintenance: Option<MaintenanceState>,
}

/// Shared in-memory store implementing all repository traits
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("in-memory store poisoned")
    }

    /// Seed a task definition directly (bypassing registration)
    pub fn seed_task(&self, def: TaskDefinition) {
        self.lock().tasks.insert(def.id.clone(), def);
    }

    /// Seed a registered service row directly
    pub fn seed_service(&self, service: Service) {
        self.lock().services.insert(service.id.clone(), service);
    }

    /// Seed a pipeline definition directly
    pub fn seed_pipeline(&self, pipeline: Pipeline) {
        self.lock().pipelines.insert(pipeline.id.clone(), pipeline);
    }

    /// Snapshot of a task run for assertions
    pub fn task_run(&self, id: &str) -> Option<TaskRun> {
        self.lock().task_runs.get(id).cloned()
    }

    /// Snapshot of a pipeline run for assertions
    pub fn pipeline_run(&self, id: &str) -> Option<PipelineRun> {
        self.lock().pipeline_runs.get(id).cloned()
    }

    /// All task runs belonging to a pipeline run
    pub fn task_runs_for_pipeline(&self, pipeline_run_id: &str) -> Vec<TaskRun> {
        let mut runs: Vec<TaskRun> = self
            .lock()
            .task_runs
            .values()
            .filter(|r| r.pipeline_run_id.as_deref() == Some(pipeline_run_id))
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        runs
    }

    /// All task runs for a task id, oldest first
    pub fn task_runs_for_task(&self, task_id: &str) -> Vec<TaskRun> {
        let mut runs: Vec<TaskRun> = self
            .lock()
            .task_runs
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        runs
    }

    pub fn task_run_count(&self) -> usize {
        self.lock().task_runs.len()
    }

    pub fn dlq_entries(&self) -> Vec<DlqEntry> {
        self.lock().dlq.values().cloned().collect()
    }

    pub fn history_rows(&self) -> Vec<TaskCodeHistory> {
        self.lock().history.clone()
    }

    /// Force a maintenance mode without going through the state machine
    pub fn force_maintenance_mode(&self, mode: MaintenanceMode) {
        self.lock().maintenance = Some(MaintenanceState {
            mode,
            mode_changed_at: Utc::now(),
        });
    }
}

#[async_trait]
impl ServiceRepository for InMemoryStore {
    async fn get_service(&self, id: &str) -> OrchestratorResult<Option<Service>> {
        Ok(self.lock().services.get(id).cloned())
    }

    async fn list_services(&self) -> OrchestratorResult<Vec<Service>> {
        let mut services: Vec<Service> = self.lock().services.values().cloned().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(services)
    }

    async fn apply_registration(&self, plan: &RegistrationPlan) -> OrchestratorResult<()> {
        let mut inner = self.lock();
        inner
            .services
            .insert(plan.service.id.clone(), plan.service.clone());
        for task in &plan.tasks {
            inner.tasks.insert(task.id.clone(), task.clone());
        }
        for entry in &plan.history {
            let exists = inner
                .history
                .iter()
                .any(|h| h.task_id == entry.task_id && h.code_hash == entry.code_hash);
            if !exists {
                inner.history.push(entry.clone());
            }
        }
        let now = Utc::now();
        for run in inner.task_runs.values_mut() {
            if run.status == TaskRunStatus::Pending
                && plan.orphaned_task_ids.contains(&run.task_id)
            {
                run.status = TaskRunStatus::Cancelled;
                run.error = Some(plan.orphan_error.clone());
                run.completed_at = Some(now);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for InMemoryStore {
    async fn get_task(&self, id: &str) -> OrchestratorResult<Option<TaskDefinition>> {
        Ok(self.lock().tasks.get(id).cloned())
    }

    async fn get_tasks(&self, ids: &[String]) -> OrchestratorResult<Vec<TaskDefinition>> {
        let inner = self.lock();
        let mut found: Vec<TaskDefinition> = ids
            .iter()
            .filter_map(|id| inner.tasks.get(id).cloned())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found.dedup_by(|a, b| a.id == b.id);
        Ok(found)
    }

    async fn list_for_service(&self, service_id: &str) -> OrchestratorResult<Vec<TaskDefinition>> {
        let mut tasks: Vec<TaskDefinition> = self
            .lock()
            .tasks
            .values()
            .filter(|t| t.service_id == service_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    async fn code_history(&self, task_id: &str) -> OrchestratorResult<Vec<TaskCodeHistory>> {
        let mut rows: Vec<TaskCodeHistory> = self
            .lock()
            .history
            .iter()
            .filter(|h| h.task_id == task_id)
            .cloned()
            .collect();
        rows.sort_by_key(|h| h.code_version);
        Ok(rows)
    }
}

#[async_trait]
impl PipelineRepository for InMemoryStore {
    async fn put(&self, pipeline: &Pipeline) -> OrchestratorResult<()> {
        self.lock()
            .pipelines
            .insert(pipeline.id.clone(), pipeline.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> OrchestratorResult<Option<Pipeline>> {
        Ok(self.lock().pipelines.get(id).cloned())
    }

    async fn list(&self) -> OrchestratorResult<Vec<Pipeline>> {
        let mut pipelines: Vec<Pipeline> = self.lock().pipelines.values().cloned().collect();
        pipelines.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pipelines)
    }
}

#[async_trait]
impl PipelineRunRepository for InMemoryStore {
    async fn create_with_tasks(
        &self,
        run: &PipelineRun,
        task_runs: &[TaskRun],
    ) -> OrchestratorResult<()> {
        let mut inner = self.lock();
        inner.pipeline_runs.insert(run.id.clone(), run.clone());
        for task_run in task_runs {
            inner.task_runs.insert(task_run.id.clone(), task_run.clone());
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> OrchestratorResult<Option<PipelineRun>> {
        Ok(self.lock().pipeline_runs.get(id).cloned())
    }

    async fn list(&self, filter: &PipelineRunFilter) -> OrchestratorResult<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self
            .lock()
            .pipeline_runs
            .values()
            .filter(|r| {
                filter
                    .pipeline_id
                    .as_ref()
                    .map(|p| &r.pipeline_id == p)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = filter.offset.max(0) as usize;
        let limit = if filter.limit > 0 {
            filter.limit as usize
        } else {
            50
        };
        Ok(runs.into_iter().skip(offset).take(limit).collect())
    }

    async fn set_status(
        &self,
        id: &str,
        status: PipelineRunStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> OrchestratorResult<()> {
        let mut inner = self.lock();
        if let Some(run) = inner.pipeline_runs.get_mut(id) {
            if run.status == PipelineRunStatus::Running {
                run.status = status;
                run.completed_at = completed_at;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRunRepository for InMemoryStore {
    async fn insert(&self, run: &TaskRun) -> OrchestratorResult<()> {
        self.lock().task_runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> OrchestratorResult<Option<TaskRun>> {
        Ok(self.lock().task_runs.get(id).cloned())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> OrchestratorResult<Vec<TaskRun>> {
        let inner = self.lock();
        let mut running_per_task: HashMap<&str, i64> = HashMap::new();
        for run in inner.task_runs.values() {
            if run.status == TaskRunStatus::Running {
                *running_per_task.entry(run.task_id.as_str()).or_default() += 1;
            }
        }

        let mut due: Vec<&TaskRun> = inner
            .task_runs
            .values()
            .filter(|r| r.status == TaskRunStatus::Pending && r.is_due(now))
            .filter(|r| {
                let concurrency = inner
                    .tasks
                    .get(&r.task_id)
                    .map(|t| t.concurrency)
                    .unwrap_or(0);
                concurrency == 0
                    || running_per_task
                        .get(r.task_id.as_str())
                        .copied()
                        .unwrap_or(0)
                        < concurrency as i64
            })
            .collect();
        due.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_running(&self, id: &str, now: DateTime<Utc>) -> OrchestratorResult<TaskRun> {
        let mut inner = self.lock();
        let run = inner
            .task_runs
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::task_run_not_found(id))?;
        if run.status != TaskRunStatus::Pending {
            return Err(OrchestratorError::IllegalTransition {
                id: id.to_string(),
                from: run.status.as_str().to_string(),
                to: TaskRunStatus::Running.as_str().to_string(),
            });
        }
        run.status = TaskRunStatus::Running;
        run.started_at = Some(now);
        Ok(run.clone())
    }

    async fn mark_completed(
        &self,
        id: &str,
        completion: &TaskCompletion,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<TaskRun> {
        let mut inner = self.lock();
        let run = inner
            .task_runs
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::task_run_not_found(id))?;
        if run.status != TaskRunStatus::Running {
            return Err(OrchestratorError::IllegalTransition {
                id: id.to_string(),
                from: run.status.as_str().to_string(),
                to: TaskRunStatus::Completed.as_str().to_string(),
            });
        }
        run.status = TaskRunStatus::Completed;
        run.output_path = Some(completion.output_path.clone());
        run.output_size = completion.output_size;
        run.assets = completion.assets.clone();
        run.completed_at = Some(now);
        if let Some(logs_path) = &completion.logs_path {
            if let Some(map) = run.metadata.as_object_mut() {
                map.insert(
                    "logsPath".to_string(),
                    serde_json::Value::String(logs_path.clone()),
                );
            }
        }
        Ok(run.clone())
    }

    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        error_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<TaskRun> {
        let mut inner = self.lock();
        let run = inner
            .task_runs
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::task_run_not_found(id))?;
        match run.status {
            TaskRunStatus::Running => run.status = TaskRunStatus::Failed,
            TaskRunStatus::Timeout => {}
            other => {
                return Err(OrchestratorError::IllegalTransition {
                    id: id.to_string(),
                    from: other.as_str().to_string(),
                    to: TaskRunStatus::Failed.as_str().to_string(),
                });
            }
        }
        run.error = Some(error.to_string());
        run.error_code = error_code.map(str::to_string);
        if run.completed_at.is_none() {
            run.completed_at = Some(now);
        }
        Ok(run.clone())
    }

    async fn mark_timed_out(
        &self,
        id: &str,
        error: &str,
        error_code: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Option<TaskRun>> {
        let mut inner = self.lock();
        let Some(run) = inner.task_runs.get_mut(id) else {
            return Ok(None);
        };
        if run.status != TaskRunStatus::Running {
            return Ok(None);
        }
        run.status = TaskRunStatus::Timeout;
        run.error = Some(error.to_string());
        run.error_code = Some(error_code.to_string());
        run.completed_at = Some(now);
        Ok(Some(run.clone()))
    }

    async fn schedule_retry(
        &self,
        id: &str,
        record: &AttemptRecord,
        next_attempt: i32,
        run_at: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        let mut inner = self.lock();
        let run = inner
            .task_runs
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::task_run_not_found(id))?;
        run.status = TaskRunStatus::Pending;
        run.attempt = next_attempt;
        run.scheduled_for = Some(run_at);
        run.error = None;
        run.error_code = None;
        run.started_at = None;
        run.heartbeat_at = None;
        run.completed_at = None;
        run.previous_attempts.push(record.clone());
        Ok(())
    }

    async fn record_heartbeat(
        &self,
        id: &str,
        progress: Option<&HeartbeatProgress>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<bool> {
        let mut inner = self.lock();
        let Some(run) = inner.task_runs.get_mut(id) else {
            return Ok(false);
        };
        if run.status != TaskRunStatus::Running {
            return Ok(false);
        }
        run.heartbeat_at = Some(now);
        if let Some(progress) = progress {
            if let Some(map) = run.metadata.as_object_mut() {
                map.insert(
                    "progress".to_string(),
                    serde_json::to_value(progress).unwrap_or(serde_json::Value::Null),
                );
            }
        }
        Ok(true)
    }

    async fn cancel_pending_for_pipeline(
        &self,
        pipeline_run_id: &str,
        error: &str,
    ) -> OrchestratorResult<u64> {
        let mut inner = self.lock();
        let now = Utc::now();
        let mut cancelled = 0u64;
        for run in inner.task_runs.values_mut() {
            if run.pipeline_run_id.as_deref() == Some(pipeline_run_id)
                && run.status == TaskRunStatus::Pending
            {
                run.status = TaskRunStatus::Cancelled;
                run.error = Some(error.to_string());
                run.completed_at = Some(now);
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn count_running_for_task(&self, task_id: &str) -> OrchestratorResult<i64> {
        Ok(self
            .lock()
            .task_runs
            .values()
            .filter(|r| r.task_id == task_id && r.status == TaskRunStatus::Running)
            .count() as i64)
    }

    async fn counts(&self) -> OrchestratorResult<QueueStatusSummary> {
        let inner = self.lock();
        let mut summary = QueueStatusSummary::default();
        for run in inner.task_runs.values() {
            match run.status {
                TaskRunStatus::Pending => {
                    summary.pending += 1;
                    summary.oldest_pending = match summary.oldest_pending {
                        Some(oldest) if oldest <= run.created_at => Some(oldest),
                        _ => Some(run.created_at),
                    };
                }
                TaskRunStatus::Running => summary.running += 1,
                TaskRunStatus::Waiting => summary.waiting += 1,
                TaskRunStatus::Completed => summary.completed += 1,
                TaskRunStatus::Failed => summary.failed += 1,
                TaskRunStatus::Timeout => summary.timeout += 1,
                TaskRunStatus::Cancelled => summary.cancelled += 1,
            }
        }
        Ok(summary)
    }

    async fn list_for_pipeline(&self, pipeline_run_id: &str) -> OrchestratorResult<Vec<TaskRun>> {
        Ok(self.task_runs_for_pipeline(pipeline_run_id))
    }

    async fn latest_completed(
        &self,
        pipeline_run_id: &str,
        task_id: &str,
    ) -> OrchestratorResult<Option<TaskRun>> {
        Ok(self
            .lock()
            .task_runs
            .values()
            .filter(|r| {
                r.pipeline_run_id.as_deref() == Some(pipeline_run_id)
                    && r.task_id == task_id
                    && r.status == TaskRunStatus::Completed
            })
            .max_by_key(|r| r.completed_at)
            .cloned())
    }

    async fn active_run_exists(
        &self,
        pipeline_run_id: &str,
        task_id: &str,
    ) -> OrchestratorResult<bool> {
        Ok(self.lock().task_runs.values().any(|r| {
            r.pipeline_run_id.as_deref() == Some(pipeline_run_id)
                && r.task_id == task_id
                && r.status.is_active()
        }))
    }

    async fn find_stale_running(&self, now: DateTime<Utc>) -> OrchestratorResult<Vec<TaskRun>> {
        let inner = self.lock();
        Ok(inner
            .task_runs
            .values()
            .filter(|r| r.status == TaskRunStatus::Running)
            .filter(|r| {
                let interval_ms = inner
                    .tasks
                    .get(&r.task_id)
                    .map(|t| t.heartbeat_interval_ms)
                    .unwrap_or(30_000);
                let last_seen = r.heartbeat_at.or(r.started_at).unwrap_or(r.created_at);
                last_seen < now - Duration::milliseconds(interval_ms * 2)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DlqRepository for InMemoryStore {
    async fn insert(&self, entry: &DlqEntry) -> OrchestratorResult<()> {
        self.lock().dlq.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> OrchestratorResult<Option<DlqEntry>> {
        Ok(self.lock().dlq.get(id).cloned())
    }

    async fn list_unretried(&self, limit: i64, offset: i64) -> OrchestratorResult<Vec<DlqEntry>> {
        let mut entries: Vec<DlqEntry> = self
            .lock()
            .dlq
            .values()
            .filter(|e| e.retried_at.is_none())
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(entries
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(1) as usize)
            .collect())
    }

    async fn mark_retried(
        &self,
        id: &str,
        retry_run_id: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        let mut inner = self.lock();
        let entry = inner
            .dlq
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::DlqEntryNotFound { id: id.to_string() })?;
        entry.retried_at = Some(now);
        entry.retry_run_id = Some(retry_run_id.to_string());
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> OrchestratorResult<u64> {
        let mut inner = self.lock();
        let before = inner.dlq.len();
        inner.dlq.retain(|_, e| e.failed_at >= cutoff);
        Ok((before - inner.dlq.len()) as u64)
    }

    async fn count_unretried(&self) -> OrchestratorResult<i64> {
        Ok(self
            .lock()
            .dlq
            .values()
            .filter(|e| e.retried_at.is_none())
            .count() as i64)
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryStore {
    async fn find_live(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Option<IdempotencyEntry>> {
        Ok(self
            .lock()
            .idempotency
            .get(key)
            .filter(|e| !e.is_expired(now))
            .cloned())
    }

    async fn upsert(&self, entry: &IdempotencyEntry) -> OrchestratorResult<()> {
        self.lock()
            .idempotency
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> OrchestratorResult<u64> {
        let mut inner = self.lock();
        let before = inner.idempotency.len();
        inner.idempotency.retain(|_, e| !e.is_expired(now));
        Ok((before - inner.idempotency.len()) as u64)
    }
}

#[async_trait]
impl MaintenanceRepository for InMemoryStore {
    async fn load(&self, now: DateTime<Utc>) -> OrchestratorResult<MaintenanceState> {
        let mut inner = self.lock();
        Ok(inner
            .maintenance
            .get_or_insert_with(|| MaintenanceState::running(now))
            .clone())
    }

    async fn transition(
        &self,
        from: MaintenanceMode,
        to: MaintenanceMode,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<bool> {
        let mut inner = self.lock();
        let state = inner
            .maintenance
            .get_or_insert_with(|| MaintenanceState::running(now));
        if state.mode == from {
            state.mode = to;
            state.mode_changed_at = now;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Recording mock of the worker transport
///
/// Dispatches are captured for assertions; `fail_next` makes the next
/// dispatch return a transport error, `fail_always` makes all of them fail.
#[derive(Default)]
pub struct MockWorkerTransport {
    dispatched: Mutex<Vec<DispatchRequest>>,
    fail_next: Mutex<bool>,
    fail_always: Mutex<bool>,
}

impl MockWorkerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self) {
        *self.fail_next.lock().expect("mock transport poisoned") = true;
    }

    pub fn fail_always(&self, fail: bool) {
        *self.fail_always.lock().expect("mock transport poisoned") = fail;
    }

    pub fn dispatched(&self) -> Vec<DispatchRequest> {
        self.dispatched
            .lock()
            .expect("mock transport poisoned")
            .clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched
            .lock()
            .expect("mock transport poisoned")
            .len()
    }
}

#[async_trait]
impl WorkerTransport for MockWorkerTransport {
    async fn dispatch(
        &self,
        _service: &pipeweave_domain::Service,
        request: &DispatchRequest,
    ) -> OrchestratorResult<()> {
        let fail = {
            let mut fail_next = self.fail_next.lock().expect("mock transport poisoned");
            let fail = *fail_next || *self.fail_always.lock().expect("mock transport poisoned");
            *fail_next = false;
            fail
        };
        if fail {
            return Err(OrchestratorError::DispatchFailed(
                "mock transport failure".to_string(),
            ));
        }
        self.dispatched
            .lock()
            .expect("mock transport poisoned")
            .push(request.clone());
        Ok(())
    }
}

/// Credential issuer that returns a fixed token
pub struct MockCredentialIssuer;

impl CredentialIssuer for MockCredentialIssuer {
    fn issue(&self, run: &TaskRun) -> OrchestratorResult<String> {
        Ok(format!("test-token-{}", run.id))
    }
}
