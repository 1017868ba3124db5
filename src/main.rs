use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mealprep_core::{init_logging, AppConfig};
use mealprep_jobs::app::Application;
use mealprep_jobs::cli::{CliApp, Commands};
use mealprep_jobs::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use serde::Serialize;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliApp::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.observability.log_format = format.clone();
    }
    if let Commands::Run {
        worker_id: Some(id),
    } = &cli.command
    {
        config.worker.worker_id = Some(id.clone());
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    if let Some(listen) = &config.observability.metrics_listen {
        init_metrics(listen)?;
    }

    let app = Arc::new(Application::new(config).context("初始化应用失败")?);
    let result = execute(&app, cli.command).await;
    if let Err(e) = &result {
        error!("命令执行失败: {e:#}");
    }
    app.close().await;
    result
}

async fn execute(app: &Arc<Application>, command: Commands) -> Result<()> {
    match command {
        Commands::Run { .. } => run(app).await,
        Commands::Submit {
            season,
            webhook_url,
        } => print_json(&app.submit(&season, webhook_url).await?),
        Commands::Status { job_id } => print_json(&app.status(&job_id).await?),
        Commands::List { status, limit } => {
            print_json(&app.list(status.as_deref(), limit).await?)
        }
        Commands::Retry { job_id } => print_json(&app.retry(&job_id).await?),
        Commands::Queue { head } => print_json(&app.queue_overview(head).await?),
        Commands::Health => print_json(&app.health().await),
        Commands::Recover => {
            let recovered = app.recover().await;
            print_json(&serde_json::json!({ "recovered": recovered }))?;
            if recovered {
                Ok(())
            } else {
                Err(anyhow::anyhow!("存储恢复失败"))
            }
        }
    }
}

async fn run(app: &Arc<Application>) -> Result<()> {
    let worker_id = app.config().worker.resolve_worker_id();
    info!(worker_id = %worker_id, "启动食谱生成Worker");

    let shutdown_manager = ShutdownManager::new();
    let app_handle = {
        let app = Arc::clone(app);
        let shutdown_manager = shutdown_manager.clone();
        tokio::spawn(async move { app.run(worker_id, &shutdown_manager).await })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match app_handle.await {
        Ok(Ok(())) => info!("Worker已优雅关闭"),
        Ok(Err(e)) => return Err(e),
        Err(e) => warn!("Worker任务异常退出: {e}"),
    }
    Ok(())
}

fn init_metrics(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("无效的指标监听地址: {listen}"))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("安装Prometheus指标导出器失败")?;
    info!("Prometheus指标导出器监听 {addr}");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
