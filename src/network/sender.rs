//! UDP packet sender
//!
//! Frames sample blocks and sends them to a receiver. Used by the `sender`
//! binary to drive the receive path with synthetic audio.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::codec::PacketEncoder;
use crate::error::NetworkError;
use crate::protocol::Framing;

/// Pacing of outgoing packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// One packet per packet duration
    RealTime,
    /// As fast as the socket accepts them
    Burst,
}

/// Sender statistics
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub samples_sent: u64,
    pub send_errors: u64,
}

/// Frames and sends sample blocks to one receiver
pub struct AudioSender {
    socket: UdpSocket,
    target: SocketAddr,
    encoder: PacketEncoder,
    stats: SenderStats,
}

impl AudioSender {
    pub async fn new(target: SocketAddr, framing: Framing) -> Result<Self, NetworkError> {
        let bind_addr: SocketAddr = if target.is_ipv6() {
            "[::]:0".parse().map_err(|e| NetworkError::SendFailed(format!("{}", e)))?
        } else {
            "0.0.0.0:0".parse().map_err(|e| NetworkError::SendFailed(format!("{}", e)))?
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| NetworkError::BindFailed { port: 0, source })?;

        Ok(Self {
            socket,
            target,
            encoder: PacketEncoder::new(framing),
            stats: SenderStats::default(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn framing(&self) -> Framing {
        self.encoder.framing()
    }

    /// Sequence number the next packet will carry
    pub fn next_sequence(&self) -> u16 {
        self.encoder.next_sequence()
    }

    /// Sample timestamp the next packet will carry
    pub fn next_sample_timestamp(&self) -> u32 {
        self.encoder.next_sample_timestamp()
    }

    /// Frame and send one block of samples
    pub async fn send_samples(&mut self, samples: &[i16]) -> Result<usize, NetworkError> {
        let datagram = self
            .encoder
            .encode(samples)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        match self.socket.send_to(&datagram, self.target).await {
            Ok(sent) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += sent as u64;
                self.stats.samples_sent += samples.len() as u64;
                Ok(sent)
            }
            Err(e) => {
                self.stats.send_errors += 1;
                Err(NetworkError::SendFailed(e.to_string()))
            }
        }
    }

    pub fn stats(&self) -> SenderStats {
        self.stats.clone()
    }
}

/// Interval between packets of `samples_per_packet` at `sample_rate`
pub fn packet_interval(samples_per_packet: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(samples_per_packet as f64 / sample_rate as f64)
}
