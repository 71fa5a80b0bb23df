//! Command-line front end: submit one video and follow it to the end.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::process::ExitCode;
use std::time::Duration;
use transcribe_sync::{
    client::{Outcome, SessionState, Transport, TranscriptionClient},
    config::{ClientConfig, LOG_DIR},
    utils::logger,
};

#[derive(Parser, Debug)]
#[command(name = "transcribe-client", version, about = "Transcribe a video and watch its progress")]
struct Args {
    /// Video URL to transcribe
    video_url: String,

    /// Server base URL (overrides TRANSCRIBE_SERVER_URL)
    #[arg(long)]
    server: Option<reqwest::Url>,

    /// Progress transport: ws or sse (overrides TRANSCRIBE_TRANSPORT)
    #[arg(long)]
    transport: Option<Transport>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    transcribe_sync::init_env();
    let _guard = logger::init(LOG_DIR.as_str(), "transcribe-client.log")?;
    let args = Args::parse();

    let mut config = ClientConfig::from_env()?;
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(transport) = args.transport {
        config.transport = transport;
    }

    let mut client = TranscriptionClient::new(&config)?;
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {msg}")?.progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    // 进度条只跟随会话视图
    let mut views = client.view();
    let renderer = {
        let bar = bar.clone();
        tokio::spawn(async move {
            while views.changed().await.is_ok() {
                let view = views.borrow_and_update().clone();
                bar.set_position(view.task.progress as u64);
                let text = view.notice.or(view.task.message).unwrap_or_default();
                bar.set_message(text);
                if matches!(view.state, SessionState::Completed | SessionState::Failed) {
                    break;
                }
            }
        })
    };

    let outcome = match client.transcribe(&args.video_url).await {
        Ok(outcome) => outcome,
        Err(e) => {
            renderer.abort();
            bar.abandon_with_message(e.to_string());
            client.close().await;
            return Ok(ExitCode::FAILURE);
        }
    };
    let _ = renderer.await;
    client.close().await;

    match outcome {
        Outcome::Completed { transcription, .. } => {
            bar.finish_with_message("Transcription completed successfully!");
            println!("{}", transcription);
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Failed { reason, .. } => {
            bar.abandon_with_message(reason);
            Ok(ExitCode::FAILURE)
        }
    }
}
