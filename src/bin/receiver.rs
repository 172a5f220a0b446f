//! Audio Receiver Application
//!
//! Plays (and optionally records) raw PCM audio arriving over UDP.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use udp_pcm_streamer::{
    audio::device::list_devices,
    config::{parse_port, AppConfig},
    protocol::Framing,
    Session,
};

/// Receive 16-bit mono PCM over UDP and play it in real time
#[derive(Parser, Debug)]
#[command(name = "receiver", version, about)]
struct Args {
    /// UDP port to listen on
    port: Option<u32>,

    /// Playback and recording sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Record the played stream to this WAV file
    #[arg(long)]
    save_file: Option<PathBuf>,

    /// Datagrams carry samples only, without the 6-byte header
    #[arg(long)]
    headerless: bool,

    /// Hand-off buffer capacity in chunks
    #[arg(long)]
    buffer_capacity: Option<usize>,

    /// Output device id (see --list-devices)
    #[arg(long)]
    device: Option<String>,

    /// Do not open an output device
    #[arg(long)]
    mute: bool,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print output devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(port) = self.port {
            config.network.udp_port = parse_port(port)?;
        }
        if let Some(rate) = self.sample_rate {
            config.audio.sample_rate = rate;
        }
        if let Some(path) = &self.save_file {
            config.recording.output_path = Some(path.clone());
        }
        if self.headerless {
            config.stream.framing = Framing::Headerless;
        }
        if let Some(capacity) = self.buffer_capacity {
            config.audio.buffer_capacity = capacity;
        }
        if let Some(device) = &self.device {
            config.audio.output_device = Some(device.clone());
        }
        if self.mute {
            config.audio.mute = true;
        }
        Ok(())
    }
}

fn print_devices() {
    println!("\n=== Available Output Devices ===");
    for device in list_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    args.apply(&mut config)?;
    config.validate()?;

    tracing::info!(
        "Starting UDP PCM receiver on port {} ({} Hz, {} framing, buffer {} chunks)",
        config.network.udp_port,
        config.audio.sample_rate,
        config.stream.framing,
        config.audio.buffer_capacity
    );

    let session = Session::start(&config).context("startup failed")?;
    let run_flag = session.run_flag();

    let stop = run_flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            stop.stop();
        }
    });

    if let Some(secs) = args.duration {
        let stop = run_flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            tracing::info!("Duration of {}s elapsed, shutting down", secs);
            stop.stop();
        });
    }

    tracing::info!("Waiting for audio streams...");

    let summary = tokio::task::spawn_blocking(move || session.run()).await?;
    summary.log();

    if !summary.abandoned.is_empty() {
        tracing::warn!("Workers did not stop in time: {:?}", summary.abandoned);
    }

    summary.into_result().context("session ended with an error")?;
    tracing::info!("Receiver stopped");
    Ok(())
}
