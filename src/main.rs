use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use pipeweave::app::Application;
use pipeweave::shutdown::ShutdownManager;
use pipeweave::telemetry::init_logging;
use pipeweave_config::AppConfig;

#[derive(Parser)]
#[command(name = "pipeweave", about = "持久化流水线编排器", version)]
struct Cli {
    /// 配置文件路径（默认依次查找 config/pipeweave.toml 等）
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// 启动编排器（API + 调度循环）
    Serve,
    /// 数据库维护操作
    Db {
        #[command(subcommand)]
        action: DbCommand,
    },
}

#[derive(Subcommand)]
enum DbCommand {
    /// 清理过期幂等缓存与超保留期死信
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(config.observability.log_level)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let app = Application::new(config).await?;
            let shutdown = ShutdownManager::new();

            let signal_shutdown = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("收到 Ctrl-C，开始优雅关闭");
                    signal_shutdown.shutdown();
                } else {
                    error!("监听关闭信号失败");
                }
            });

            app.run(shutdown).await
        }
        Command::Db {
            action: DbCommand::Cleanup,
        } => {
            let app = Application::new(config).await?;
            app.run_cleanup().await
        }
    }
}
