//! Test data builders with sensible defaults

use std::collections::HashMap;

use chrono::Utc;

use pipeweave_domain::{
    FailureMode, Pipeline, PipelineNode, PipelineStructure, RetryBackoff, TaskDefinition, TaskRun,
    TaskRunStatus,
};

/// Builder for task definitions
pub struct TaskDefinitionBuilder {
    def: TaskDefinition,
}

impl TaskDefinitionBuilder {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            def: TaskDefinition {
                id: id.to_string(),
                service_id: "svc-test".to_string(),
                code_hash: "0123456789abcdef".to_string(),
                code_version: 1,
                allowed_next: Vec::new(),
                timeout_sec: 300,
                max_retries: 0,
                retry_backoff: RetryBackoff::Exponential,
                retry_delay_ms: 100,
                max_retry_delay_ms: 10_000,
                heartbeat_interval_ms: 30_000,
                concurrency: 0,
                priority: 100,
                idempotency_ttl_sec: None,
                description: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn with_service(mut self, service_id: &str) -> Self {
        self.def.service_id = service_id.to_string();
        self
    }

    pub fn with_allowed_next(mut self, next: &[&str]) -> Self {
        self.def.allowed_next = next.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.def.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: RetryBackoff, delay_ms: i64, max_delay_ms: i64) -> Self {
        self.def.retry_backoff = backoff;
        self.def.retry_delay_ms = delay_ms;
        self.def.max_retry_delay_ms = max_delay_ms;
        self
    }

    pub fn with_concurrency(mut self, concurrency: i32) -> Self {
        self.def.concurrency = concurrency;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.def.priority = priority;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, interval_ms: i64) -> Self {
        self.def.heartbeat_interval_ms = interval_ms;
        self
    }

    pub fn with_idempotency_ttl(mut self, ttl_sec: i64) -> Self {
        self.def.idempotency_ttl_sec = Some(ttl_sec);
        self
    }

    pub fn with_code(mut self, code_hash: &str, code_version: i32) -> Self {
        self.def.code_hash = code_hash.to_string();
        self.def.code_version = code_version;
        self
    }

    pub fn build(self) -> TaskDefinition {
        self.def
    }
}

/// Builder for pipeline definitions from an edge list
pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            pipeline: Pipeline {
                id: id.to_string(),
                name: id.to_string(),
                description: None,
                entry_tasks: Vec::new(),
                structure: PipelineStructure::new(),
                version: 1,
                failure_mode: FailureMode::FailFast,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn with_entry_tasks(mut self, entries: &[&str]) -> Self {
        self.pipeline.entry_tasks = entries.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_edge(mut self, task_id: &str, allowed_next: &[&str]) -> Self {
        self.pipeline.structure.insert(
            task_id.to_string(),
            PipelineNode {
                allowed_next: allowed_next.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.pipeline.failure_mode = failure_mode;
        self
    }

    pub fn build(self) -> Pipeline {
        self.pipeline
    }
}

/// Builder for task runs
pub struct TaskRunBuilder {
    run: TaskRun,
}

impl TaskRunBuilder {
    pub fn new(id: &str, task_id: &str) -> Self {
        Self {
            run: TaskRun {
                id: id.to_string(),
                task_id: task_id.to_string(),
                pipeline_run_id: None,
                status: TaskRunStatus::Pending,
                code_version: 1,
                code_hash: "0123456789abcdef".to_string(),
                attempt: 1,
                max_retries: 0,
                priority: 100,
                input_path: format!("standalone/{id}/input.json"),
                output_path: None,
                output_size: None,
                assets: None,
                upstream_refs: HashMap::new(),
                previous_attempts: Vec::new(),
                idempotency_key: None,
                scheduled_for: None,
                heartbeat_at: None,
                started_at: None,
                completed_at: None,
                error: None,
                error_code: None,
                metadata: serde_json::json!({}),
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_pipeline_run(mut self, pipeline_run_id: &str) -> Self {
        self.run.pipeline_run_id = Some(pipeline_run_id.to_string());
        self
    }

    pub fn with_status(mut self, status: TaskRunStatus) -> Self {
        self.run.status = status;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.run.max_retries = max_retries;
        self
    }

    pub fn with_started_at(mut self, started_at: chrono::DateTime<Utc>) -> Self {
        self.run.started_at = Some(started_at);
        self
    }

    pub fn build(self) -> TaskRun {
        self.run
    }
}
