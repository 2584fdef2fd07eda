use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeweave_config::LogLevel;

/// 初始化结构化日志
///
/// RUST_LOG 优先，否则用配置里的日志级别。
pub fn init_logging(log_level: LogLevel) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_level.filter_directive().into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
    Ok(())
}
