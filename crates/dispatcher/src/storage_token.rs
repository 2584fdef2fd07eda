//! 存储凭证令牌
//!
//! 为每次分发签发短期HS256令牌，携带该运行的Blob存储坐标。
//! Worker凭它直接读输入、写产物，编排器自身不接触Blob内容。

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use pipeweave_application::CredentialIssuer;
use pipeweave_domain::TaskRun;
use pipeweave_errors::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageTokenClaims {
    /// 运行ID
    pub sub: String,
    pub task_id: String,
    pub input_path: String,
    /// 允许写入的前缀目录
    pub output_prefix: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct StorageTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_seconds: i64,
}

impl StorageTokenIssuer {
    pub fn new(secret: &str, ttl_seconds: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_seconds,
        }
    }

    /// 校验并解出声明（测试与网关侧使用）
    pub fn verify(&self, token: &str) -> OrchestratorResult<StorageTokenClaims> {
        decode::<StorageTokenClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| OrchestratorError::TokenError(e.to_string()))
    }
}

impl CredentialIssuer for StorageTokenIssuer {
    fn issue(&self, run: &TaskRun) -> OrchestratorResult<String> {
        let now = Utc::now().timestamp();
        let output_prefix = match &run.pipeline_run_id {
            Some(prun) => format!("runs/{}/tasks/{}", prun, run.id),
            None => format!("standalone/{}", run.id),
        };
        let claims = StorageTokenClaims {
            sub: run.id.clone(),
            task_id: run.task_id.clone(),
            input_path: run.input_path.clone(),
            output_prefix,
            iat: now,
            exp: now + self.ttl_seconds,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| OrchestratorError::TokenError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use pipeweave_domain::{TaskRun, TaskRunStatus};

    fn run(pipeline_run_id: Option<&str>) -> TaskRun {
        TaskRun {
            id: "trun_token".to_string(),
            task_id: "resize".to_string(),
            pipeline_run_id: pipeline_run_id.map(str::to_string),
            status: TaskRunStatus::Pending,
            code_version: 1,
            code_hash: "abcd1234abcd1234".to_string(),
            attempt: 1,
            max_retries: 0,
            priority: 100,
            input_path: "standalone/trun_token/input.json".to_string(),
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
        }
    }

    #[test]
    fn test_token_round_trip() {
        let issuer = StorageTokenIssuer::new("test-secret", 900);
        let token = issuer.issue(&run(None)).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "trun_token");
        assert_eq!(claims.task_id, "resize");
        assert_eq!(claims.output_prefix, "standalone/trun_token");
        assert!(claims.exp - claims.iat == 900);
    }

    #[test]
    fn test_pipeline_run_output_prefix() {
        let issuer = StorageTokenIssuer::new("test-secret", 900);
        let token = issuer.issue(&run(Some("prun_1"))).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.output_prefix, "runs/prun_1/tasks/trun_token");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let issuer = StorageTokenIssuer::new("test-secret", 900);
        let other = StorageTokenIssuer::new("other-secret", 900);
        let token = issuer.issue(&run(None)).unwrap();
        assert!(other.verify(&token).is_err());
    }
}
