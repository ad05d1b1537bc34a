//! Demo binary: run a voice session against a backend from the terminal.
//!
//! Requires the `audio-device` feature (real microphone and speakers).

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use url::Url;

use fitvoice_client::media::{DeviceCapture, DevicePlayback};
use fitvoice_client::{ClientConfig, SessionController};

#[derive(Parser, Debug)]
#[command(name = "fitvoice", version, about = "Realtime voice coaching session client")]
struct Cli {
    /// Backend base URL; falls back to FITVOICE_BACKEND_URL
    #[arg(short, long)]
    backend: Option<Url>,

    /// User email identifying the session
    #[arg(short, long)]
    user: String,

    /// Assistant persona requested from the backend
    #[arg(long)]
    bot_type: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = match cli.backend {
        Some(url) => ClientConfig::new(url),
        None => ClientConfig::from_env().context("backend URL not configured")?,
    };
    if let Some(bot_type) = cli.bot_type {
        config.bot_type = bot_type;
    }

    let capture = Arc::new(DeviceCapture::new());
    let playback = Arc::new(DevicePlayback::new().context("speaker setup failed")?);
    let controller = SessionController::new(config, capture, playback)?;

    controller.start(&cli.user).await?;
    info!("session active, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    controller.stop().await;
    for entry in controller.conversation() {
        println!("[{}] {}", entry.role, entry.content);
    }
    Ok(())
}
