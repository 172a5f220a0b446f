//! Wire protocol definitions
//!
//! Headered datagram layout (all fields little-endian):
//!
//! ```text
//! ┌──────────────┬────────────────────┬──────────────────────────┐
//! │ seq (u16)    │ sample_ts (u32)    │ samples (i16 × N, N ≥ 0) │
//! └──────────────┴────────────────────┴──────────────────────────┘
//!   2 bytes        4 bytes              2·N bytes
//! ```
//!
//! Headerless datagrams carry only the sample payload.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Header size for headered framing
pub const HEADER_LEN: usize = 6;

/// Size of one encoded sample
pub const SAMPLE_WIDTH: usize = 2;

/// Largest datagram the receiver reads in one call
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Largest sample payload that fits in a headered datagram
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_LEN;

/// Stream is always single-channel
pub const CHANNELS: u16 = 1;

/// Byte layout agreed for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// `[seq][sample_ts][samples]`
    #[default]
    Headered,
    /// `[samples]` only; loss and reordering cannot be detected
    Headerless,
}

impl Framing {
    /// Bytes preceding the sample payload
    pub fn header_len(self) -> usize {
        match self {
            Framing::Headered => HEADER_LEN,
            Framing::Headerless => 0,
        }
    }

    /// Maximum number of samples one datagram can carry
    pub fn max_samples(self) -> usize {
        (MAX_DATAGRAM_SIZE - self.header_len()) / SAMPLE_WIDTH
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Headered => write!(f, "headered"),
            Framing::Headerless => write!(f, "headerless"),
        }
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "headered" => Ok(Framing::Headered),
            "headerless" | "raw" => Ok(Framing::Headerless),
            other => Err(format!("unknown framing: {}", other)),
        }
    }
}

/// Sequencing metadata carried by headered datagrams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Wraps modulo 65536
    pub sequence: u16,
    /// Samples emitted by the sender before this packet, wraps at 2^32
    pub sample_timestamp: u32,
}

/// One decoded datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// `None` for headerless framing
    pub header: Option<PacketHeader>,
    pub samples: Vec<i16>,
}

impl Packet {
    pub fn headered(sequence: u16, sample_timestamp: u32, samples: Vec<i16>) -> Self {
        Self {
            header: Some(PacketHeader {
                sequence,
                sample_timestamp,
            }),
            samples,
        }
    }

    pub fn headerless(samples: Vec<i16>) -> Self {
        Self {
            header: None,
            samples,
        }
    }

    pub fn sequence(&self) -> Option<u16> {
        self.header.map(|h| h.sequence)
    }

    pub fn sample_timestamp(&self) -> Option<u32> {
        self.header.map(|h| h.sample_timestamp)
    }

    /// Raw little-endian PCM bytes of the payload
    pub fn pcm_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * SAMPLE_WIDTH);
        for sample in &self.samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }
}
