use anyhow::Result;
use clap::Parser;

use watertruck::app::Application;
use watertruck::shutdown;
use watertruck_core::AppConfig;

/// 按需送水调度系统
#[derive(Debug, Parser)]
#[command(name = "watertruck", version, about = "按需送水调度系统")]
struct Cli {
    /// 配置文件路径（TOML）
    #[arg(short, long)]
    config: Option<String>,

    /// 覆盖配置中的日志级别
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;

    let log_level = cli
        .log_level
        .unwrap_or_else(|| config.observability.log_level.clone());
    watertruck_core::logging::init_logging(&log_level);

    let app = Application::new(config).await?;
    let shutdown_rx = shutdown::shutdown_channel();
    app.run(shutdown_rx).await
}
