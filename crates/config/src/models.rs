use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub retention: RetentionConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

/// 调度器运行模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DispatchMode {
    /// 后台循环，按 poll_interval_ms 周期执行
    #[serde(rename = "continuous")]
    Continuous,
    /// 由外部调度器通过 POST /api/tick 驱动
    #[serde(rename = "tick-driven")]
    TickDriven,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub mode: DispatchMode,
    pub poll_interval_ms: u64,
    /// 每个 tick 领取的运行数上限
    pub max_concurrency: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub bind_address: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// 仅用于为Worker签发短期存储凭证令牌
    pub secret_key: String,
    pub storage_token_ttl_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub dlq_retention_days: i64,
    /// 任务定义未指定时使用的幂等缓存TTL
    pub default_idempotency_ttl_sec: i64,
    pub default_max_retry_delay_ms: i64,
}

/// 日志详细程度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "minimal")]
    Minimal,
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "detailed")]
    Detailed,
}

impl LogLevel {
    /// 映射为 tracing EnvFilter 指令
    pub fn filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Minimal => "warn",
            LogLevel::Normal => "info",
            LogLevel::Detailed => "debug",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: LogLevel,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/pipeweave".to_string(),
                max_connections: 10,
                min_connections: 1,
                connection_timeout_seconds: 30,
                idle_timeout_seconds: 600,
            },
            dispatcher: DispatcherConfig {
                mode: DispatchMode::Continuous,
                poll_interval_ms: 1_000,
                max_concurrency: 10,
            },
            api: ApiConfig {
                bind_address: "0.0.0.0:8700".to_string(),
                request_timeout_seconds: 30,
            },
            security: SecurityConfig {
                secret_key: "dev-secret-change-me".to_string(),
                storage_token_ttl_seconds: 900,
            },
            retention: RetentionConfig {
                dlq_retention_days: 30,
                default_idempotency_ttl_sec: 3_600,
                default_max_retry_delay_ms: 60_000,
            },
            observability: ObservabilityConfig {
                log_level: LogLevel::Normal,
            },
        }
    }
}

impl AppConfig {
    /// 加载配置：显式路径 > 默认路径 > 内置默认值，环境变量始终可覆盖
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/pipeweave.toml",
                "pipeweave.toml",
                "/etc/pipeweave/config.toml",
            ];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder
            .set_default("database.url", "postgresql://localhost/pipeweave")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connection_timeout_seconds", 30)?
            .set_default("database.idle_timeout_seconds", 600)?
            .set_default("dispatcher.mode", "continuous")?
            .set_default("dispatcher.poll_interval_ms", 1_000)?
            .set_default("dispatcher.max_concurrency", 10)?
            .set_default("api.bind_address", "0.0.0.0:8700")?
            .set_default("api.request_timeout_seconds", 30)?
            .set_default("security.secret_key", "dev-secret-change-me")?
            .set_default("security.storage_token_ttl_seconds", 900)?
            .set_default("retention.dlq_retention_days", 30)?
            .set_default("retention.default_idempotency_ttl_sec", 3_600)?
            .set_default("retention.default_max_retry_delay_ms", 60_000)?
            .set_default("observability.log_level", "normal")?;

        let config = builder
            .add_source(Environment::with_prefix("PIPEWEAVE").separator("__"))
            .build()
            .context("构建配置失败")?;

        let app_config: AppConfig = config.try_deserialize().context("解析配置失败")?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(anyhow::anyhow!("database.url 不能为空"));
        }
        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "database.max_connections 不能小于 min_connections"
            ));
        }
        if self.dispatcher.max_concurrency <= 0 {
            return Err(anyhow::anyhow!("dispatcher.max_concurrency 必须大于0"));
        }
        if self.dispatcher.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("dispatcher.poll_interval_ms 必须大于0"));
        }
        if self.security.secret_key.is_empty() {
            return Err(anyhow::anyhow!("security.secret_key 不能为空"));
        }
        if self.retention.dlq_retention_days <= 0 {
            return Err(anyhow::anyhow!("retention.dlq_retention_days 必须大于0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatcher.mode, DispatchMode::Continuous);
        assert_eq!(config.dispatcher.poll_interval_ms, 1_000);
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.dispatcher.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_secret() {
        let mut config = AppConfig::default();
        config.security.secret_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_directives() {
        assert_eq!(LogLevel::Minimal.filter_directive(), "warn");
        assert_eq!(LogLevel::Normal.filter_directive(), "info");
        assert_eq!(LogLevel::Detailed.filter_directive(), "debug");
    }

    #[test]
    fn test_mode_serde_forms() {
        assert_eq!(
            serde_json::to_string(&DispatchMode::TickDriven).unwrap(),
            "\"tick-driven\""
        );
    }
}
