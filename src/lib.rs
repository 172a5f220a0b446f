//! # UDP PCM Streamer
//!
//! Loss-tolerant real-time playback (and optional recording) of raw 16-bit
//! mono PCM audio carried in individual, unordered UDP datagrams.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            PACKET SOURCE                             │
//! │        (any sender; the `sender` binary emits a sine tone)           │
//! │        Datagrams: [Seq|SampleTimestamp|PCM] or [PCM]                 │
//! └──────────────────────────────────┬───────────────────────────────────┘
//!                                    │ UDP
//!                                    ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          SESSION (session)                           │
//! │                                                                      │
//! │  ┌────────────────────────┐                                          │
//! │  │ Receiver thread        │  bounded-time recv, decode (codec),      │
//! │  │ (network::receiver)    │  sequence statistics                     │
//! │  └───────────┬────────────┘                                          │
//! │              │ push (evicts oldest when full, never blocks)          │
//! │              ▼                                                       │
//! │  ┌────────────────────────┐                                          │
//! │  │ Hand-off buffer        │  fixed-capacity FIFO of AudioChunk       │
//! │  │ (audio::buffer)        │                                          │
//! │  └───────────┬────────────┘                                          │
//! │              │ pop with timeout (underrun = no chunk, no silence)    │
//! │              ▼                                                       │
//! │  ┌────────────────────────┐     ┌─────────────────────────────────┐  │
//! │  │ Playback thread        │────▶│ Output device (audio::playback) │  │
//! │  │ (audio::coordinator)   │     └─────────────────────────────────┘  │
//! │  │                        │     ┌─────────────────────────────────┐  │
//! │  │                        │────▶│ WAV recorder (recording)        │  │
//! │  └────────────────────────┘     └─────────────────────────────────┘  │
//! │                                                                      │
//! │  Shared RunFlag stops both loops; shutdown joins with a deadline.    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod recording;
pub mod session;

pub use error::{Error, Result};
pub use session::{RunFlag, Session, SessionSummary};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for playback and recording
    pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

    /// Default UDP port for audio streaming
    pub const DEFAULT_UDP_PORT: u16 = 5000;

    /// Bounded wait of every blocking receive and buffer pop
    pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;

    /// Hand-off buffer capacity (in chunks)
    pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

    /// Longest a single device write may wait for room
    pub const DEFAULT_DEVICE_WRITE_TIMEOUT_MS: u64 = 500;

    /// Shutdown wait for each worker thread
    pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 2000;

    /// Interval between periodic statistics lines
    pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 5;

    /// Default packet duration used by the test sender
    pub const DEFAULT_PACKET_DURATION_MS: f64 = 20.0;

    /// Default test tone frequency
    pub const DEFAULT_TONE_FREQUENCY: f64 = 440.0;
}
