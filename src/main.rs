#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use transcribe_sync::{
    config::{ServerConfig, LOG_DIR},
    media::{AudioConverter, CommandDownloader, CommandTranscriber},
    schedule::{MediaPipeline, TaskRegistry, TaskScheduler},
    utils::logger,
    AppContext, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    transcribe_sync::init_env();
    // 初始化日志系统
    let _guard = logger::init(LOG_DIR.as_str(), "transcribe-server.log")?;

    info!("Starting transcription service ({})...", VERSION);
    let config = ServerConfig::from_env()?;
    info!("Loaded configuration: {:?}", config);

    // 初始化转写流水线
    info!("Initializing media pipeline...");
    let transcriber = CommandTranscriber::from_command_line(&config.stt_command)?;
    let downloader = config
        .downloader_command
        .as_deref()
        .map(CommandDownloader::from_command_line)
        .transpose()?;
    let pipeline = MediaPipeline::new(AudioConverter::new(config.ffmpeg.clone()), Arc::new(transcriber))
        .with_downloader(downloader);

    // 初始化任务注册表和调度器
    info!("Initializing Scheduler...");
    let registry = Arc::new(TaskRegistry::new(config.event_buffer));
    let scheduler = Arc::new(
        TaskScheduler::new(registry, Arc::new(pipeline), config.max_concurrent_jobs)
            .with_job_timeout(config.job_timeout),
    );
    let cleanup = scheduler.spawn_cleanup(config.cleanup_interval, config.retention);

    let ctx = Arc::new(AppContext::new(scheduler.clone(), config.submissions_per_minute));

    info!("Starting HTTP server at http://{}", config.bind_addr);
    let served = transcribe_sync::web::start_server(ctx, config.bind_addr).await;

    // 优雅关闭
    info!("Shutting down...");
    cleanup.abort();
    scheduler.shutdown();

    match served {
        Ok(()) => {
            info!("Server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Server error: {}", e);
            Err(e)
        }
    }
}
