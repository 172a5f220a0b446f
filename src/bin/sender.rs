//! Test Tone Sender
//!
//! Streams a sine tone as UDP PCM datagrams to a receiver.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{SocketAddr, ToSocketAddrs};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use udp_pcm_streamer::{
    audio::tone::{samples_per_packet, ToneGenerator},
    config::parse_port,
    constants::*,
    network::sender::{packet_interval, AudioSender, Pacing},
    protocol::Framing,
};

/// Send a sine tone as raw PCM over UDP
#[derive(Parser, Debug)]
#[command(name = "sender", version, about)]
struct Args {
    /// Receiver host
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Receiver UDP port
    #[arg(default_value_t = DEFAULT_UDP_PORT as u32)]
    port: u32,

    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    /// Tone frequency in Hz
    #[arg(long, default_value_t = DEFAULT_TONE_FREQUENCY)]
    frequency: f64,

    /// Audio per packet in milliseconds
    #[arg(long, default_value_t = DEFAULT_PACKET_DURATION_MS)]
    packet_duration: f64,

    /// Send samples only, without the 6-byte header
    #[arg(long)]
    headerless: bool,

    /// Send as fast as possible instead of in real time
    #[arg(long)]
    burst: bool,

    /// Stop after this many packets
    #[arg(long)]
    count: Option<u64>,
}

impl Args {
    /// Reject values that cannot produce a stream; returns the port
    fn validate(&self) -> Result<u16> {
        let port = parse_port(self.port)?;
        anyhow::ensure!(self.frequency > 0.0, "frequency must be positive");
        anyhow::ensure!(self.sample_rate > 0, "sample rate must be positive");
        anyhow::ensure!(self.packet_duration > 0.0, "packet duration must be positive");
        Ok(port)
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {}", host))?
        .next()
        .with_context(|| format!("no address for {}", host))
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
    let port = args.validate()?;
    let target = resolve(&args.host, port)?;
    let framing = if args.headerless { Framing::Headerless } else { Framing::Headered };
    let pacing = if args.burst { Pacing::Burst } else { Pacing::RealTime };

    let block = samples_per_packet(args.sample_rate, args.packet_duration);
    anyhow::ensure!(
        block > 0 && block <= framing.max_samples(),
        "packet of {} samples does not fit one datagram (max {})",
        block,
        framing.max_samples()
    );

    let mut tone = ToneGenerator::new(args.frequency, args.sample_rate);
    let mut sender = AudioSender::new(target, framing).await?;

    tracing::info!(
        "Sending {} Hz tone to {} ({} Hz, {} samples/packet, {} framing, {:?})",
        args.frequency,
        target,
        args.sample_rate,
        block,
        framing,
        pacing
    );

    let mut interval = tokio::time::interval(packet_interval(block, args.sample_rate));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
    let mut sent: u64 = 0;

    loop {
        if args.count.is_some_and(|count| sent >= count) {
            break;
        }

        if pacing == Pacing::RealTime {
            tokio::select! {
                _ = interval.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupt received, stopping");
                    break;
                }
            }
        }

        let samples = tone.next_block(block);
        if let Err(e) = sender.send_samples(&samples).await {
            tracing::warn!("Send error: {}", e);
        }
        sent += 1;

        if sent % 250 == 0 {
            let stats = sender.stats();
            tracing::debug!(
                "Sent {} packets ({} bytes, {} errors)",
                stats.packets_sent,
                stats.bytes_sent,
                stats.send_errors
            );
        }
    }

    let stats = sender.stats();
    tracing::info!(
        "Sender stats: {} packets, {} samples, {} bytes, {} errors",
        stats.packets_sent,
        stats.samples_sent,
        stats.bytes_sent,
        stats.send_errors
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let argv = std::iter::once("sender").chain(extra.iter().copied());
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let parsed = args(&[]);
        assert_eq!(parsed.validate().unwrap(), 5000);
        assert_eq!(parsed.frequency, 440.0);
    }

    #[test]
    fn test_port_zero_rejected() {
        assert!(args(&["127.0.0.1", "0"]).validate().is_err());
        assert!(args(&["127.0.0.1", "70000"]).validate().is_err());
        assert_eq!(args(&["127.0.0.1", "6000"]).validate().unwrap(), 6000);
    }

    #[test]
    fn test_non_positive_frequency_rejected() {
        assert!(args(&["--frequency", "0"]).validate().is_err());
        assert!(args(&["--frequency=-440"]).validate().is_err());
    }
}
