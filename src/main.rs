//! narrator-rs: speaks simulation events through a local synthesis backend.

mod config;
mod narrator;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use narrator::dispatcher::SynthesisClient;
use narrator::{api, Narrator, RodioOutput};

#[derive(Parser, Debug)]
#[command(name = "narrator-rs", about = "Event narration service")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Play the diagnostic tone and exit
    #[arg(long)]
    test_beep: bool,

    /// Check the synthesis backend (health and voices) and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug,reqwest=info,hyper=info,hyper_util=info")
    } else {
        EnvFilter::new("info,reqwest=warn,hyper=warn,hyper_util=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("narrator-rs starting");

    let config = config::Config::load(args.config.as_deref());
    info!(
        "Config loaded: server={} voice={} max_queue={}",
        config.narration.server_url, config.narration.selected_voice, config.narration.max_queue_size
    );

    if args.check {
        return check_backend(&config.narration.server_url).await;
    }

    let output = Arc::new(RodioOutput::open()?);
    let settings = config::SettingsHandle::new(config.narration.clone());
    let (narrator, control) = Narrator::start(settings, output)?;

    if args.test_beep {
        narrator.test_beep();
        tokio::time::sleep(Duration::from_millis(500)).await;
        narrator.shutdown().await;
        control.await?;
        return Ok(());
    }

    if config.api.enabled {
        api::start_api(
            api::ApiState {
                narrator: narrator.clone(),
            },
            config.api.port,
        )
        .await;
    }

    match narrator.refresh_voices().await {
        Ok(voices) => info!("Available voices: {}", voices.join(", ")),
        Err(e) => warn!("Could not fetch voices from {}: {e}", config.narration.server_url),
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    narrator.shutdown().await;
    control.await?;

    Ok(())
}

async fn check_backend(server_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = SynthesisClient::new()?;
    let health = client.health(server_url).await?;
    info!("Server connected: {health}");
    let voices = client.voices(server_url).await?;
    info!("Available voices: {}", voices.join(", "));
    Ok(())
}
