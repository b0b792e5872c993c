use anyhow::{Context, Result};
use bulk_uploader::{
    config::DEFAULT_CONFIG_PATH, logging, AppConfig, BatchCallbacks, FileCollector, HttpBackend,
    SessionSignal, UploadBatch, UploadEvent, UploadItemStatus,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(author, version, about = "有界并发的批量文件上传工具", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 上传文件或文件夹（文件夹保留目录结构）
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// 配置文件路径
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
        /// 失败项自动重试轮数
        #[arg(long, default_value_t = 0)]
        retry_failed: u32,
        /// 覆盖配置中的并发数
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Upload {
            paths,
            config,
            retry_failed,
            concurrency,
        } => upload(paths, &config, retry_failed, concurrency).await,
    }
}

async fn upload(
    paths: Vec<PathBuf>,
    config_path: &str,
    retry_rounds: u32,
    concurrency: Option<usize>,
) -> Result<()> {
    let mut config = AppConfig::load_or_default(config_path).await;
    if let Some(concurrency) = concurrency {
        config.upload.concurrency = concurrency.max(1);
    }

    // 必须保持 _log_guard 存活
    let _log_guard = logging::init_logging(&config.log);
    info!("Bulk Uploader v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let backend = Arc::new(HttpBackend::new(&config.backend).context("创建后端客户端失败")?);

    // 会话过期只提示，由用户重新登录
    let session = SessionSignal::new();
    let mut expired = session.subscribe();
    tokio::spawn(async move {
        if let Ok(event) = expired.recv().await {
            error!("会话已过期，请重新登录后再上传（触发文件: {}）", event.source);
        }
    });

    let callbacks = BatchCallbacks::new(
        |records| {
            for record in records {
                match serde_json::to_string(&record) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("序列化上传记录失败: {}", e),
                }
            }
        },
        |err| error!("{}", err),
    );
    let batch = UploadBatch::new(&config.upload, backend, session.clone(), callbacks);
    spawn_event_renderer(&batch);

    let collector = FileCollector::new(config.upload.skip_hidden);
    let dropped = collector
        .from_local_paths(&paths)
        .await
        .context("收集文件失败")?;
    if dropped.degraded {
        warn!("部分文件夹读取失败，只上传了顶层文件");
    }

    batch.add_files(dropped.files);
    if batch.items().is_empty() {
        anyhow::bail!("没有可上传的文件");
    }

    let mut report = batch.start().await?;
    for round in 1..=retry_rounds {
        if !report.has_failures() || session.is_expired() {
            break;
        }
        info!("第 {} 轮重试失败项", round);
        report = batch.retry_failed().await?;
    }

    println!("{}", report.outcome.message());

    let failed: Vec<_> = batch
        .items()
        .iter()
        .filter(|item| item.status == UploadItemStatus::Error)
        .map(|item| {
            format!(
                "{}: {}",
                item.relative_path,
                item.error.as_deref().unwrap_or_default()
            )
        })
        .collect();
    if !failed.is_empty() {
        for line in &failed {
            eprintln!("{}", line);
        }
        anyhow::bail!("{} 个文件上传失败", failed.len());
    }

    Ok(())
}

/// 渲染批次事件
fn spawn_event_renderer(batch: &UploadBatch) {
    let mut events = batch.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(UploadEvent::Notice { message }) => info!("{}", message),
                Ok(UploadEvent::Failed {
                    relative_path,
                    error,
                    ..
                }) => warn!("上传失败: {} ({})", relative_path, error),
                Ok(UploadEvent::Completed {
                    relative_path,
                    object_path,
                    ..
                }) => info!("上传成功: {} -> {}", relative_path, object_path),
                Ok(UploadEvent::Progress { item_id, progress }) => {
                    debug!("进度: {} {}%", item_id, progress)
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!("事件积压，跳过 {} 条", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
