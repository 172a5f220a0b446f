//! Datagram decoder
//!
//! Parses received datagrams back into [`Packet`]s. Any [`FrameError`] is a
//! discard signal: the caller drops the datagram and carries on.

use bytes::Buf;

use crate::error::FrameError;
use crate::protocol::{Framing, Packet, MAX_DATAGRAM_SIZE, SAMPLE_WIDTH};

/// Decode a datagram with default options (empty payloads rejected)
pub fn decode(framing: Framing, datagram: &[u8]) -> Result<Packet, FrameError> {
    PacketDecoder::new(framing).decode(datagram)
}

/// Datagram decoder for one session's framing
#[derive(Debug, Clone, Copy)]
pub struct PacketDecoder {
    framing: Framing,
    allow_empty: bool,
}

impl PacketDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            allow_empty: false,
        }
    }

    /// Accept datagrams that carry a header but no samples
    pub fn allow_empty(mut self, allow: bool) -> Self {
        self.allow_empty = allow;
        self
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn decode(&self, datagram: &[u8]) -> Result<Packet, FrameError> {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(FrameError::TooLong {
                len: datagram.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let header_len = self.framing.header_len();
        if datagram.len() < header_len {
            return Err(FrameError::TooShort {
                len: datagram.len(),
                required: header_len,
            });
        }

        let mut buf = datagram;
        let header = match self.framing {
            Framing::Headered => Some((buf.get_u16_le(), buf.get_u32_le())),
            Framing::Headerless => None,
        };

        if buf.len() % SAMPLE_WIDTH != 0 {
            return Err(FrameError::OddPayload(buf.len()));
        }
        if buf.is_empty() && !self.allow_empty {
            return Err(FrameError::EmptyPayload);
        }

        let mut samples = Vec::with_capacity(buf.len() / SAMPLE_WIDTH);
        while buf.has_remaining() {
            samples.push(buf.get_i16_le());
        }

        Ok(match header {
            Some((sequence, sample_timestamp)) => {
                Packet::headered(sequence, sample_timestamp, samples)
            }
            None => Packet::headerless(samples),
        })
    }
}
