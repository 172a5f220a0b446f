//! Datagram encoder
//!
//! Serializes sample blocks into the wire layout described in
//! [`crate::protocol`]. The free functions are pure; [`PacketEncoder`]
//! adds the sequence/timestamp bookkeeping a sender needs.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::{Framing, HEADER_LEN, MAX_DATAGRAM_SIZE, SAMPLE_WIDTH};

/// Encode a headered datagram.
///
/// The resulting datagram must fit in [`MAX_DATAGRAM_SIZE`], otherwise the
/// receiver would truncate it. Callers chunk their samples to at most
/// [`Framing::max_samples`] per call; larger blocks are rejected with
/// [`FrameError::PayloadTooLarge`].
pub fn encode(sequence: u16, sample_timestamp: u32, samples: &[i16]) -> Result<Bytes, FrameError> {
    let payload_len = samples.len() * SAMPLE_WIDTH;
    if HEADER_LEN + payload_len > MAX_DATAGRAM_SIZE {
        return Err(FrameError::PayloadTooLarge(payload_len));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload_len);
    buf.put_u16_le(sequence);
    buf.put_u32_le(sample_timestamp);
    put_samples(&mut buf, samples);
    Ok(buf.freeze())
}

/// Encode a headerless datagram: sample payload only.
pub fn encode_headerless(samples: &[i16]) -> Result<Bytes, FrameError> {
    let payload_len = samples.len() * SAMPLE_WIDTH;
    if payload_len > MAX_DATAGRAM_SIZE {
        return Err(FrameError::PayloadTooLarge(payload_len));
    }

    let mut buf = BytesMut::with_capacity(payload_len);
    put_samples(&mut buf, samples);
    Ok(buf.freeze())
}

fn put_samples(buf: &mut BytesMut, samples: &[i16]) {
    for &sample in samples {
        buf.put_i16_le(sample);
    }
}

/// Stateful encoder for a sending stream
///
/// Numbers packets sequentially (wrapping at 2^16) and stamps each with the
/// count of samples emitted before it (wrapping at 2^32).
pub struct PacketEncoder {
    framing: Framing,
    sequence: u16,
    sample_timestamp: u32,
    /// Packets produced
    packets_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl PacketEncoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            sequence: 0,
            sample_timestamp: 0,
            packets_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode the next block of samples
    pub fn encode(&mut self, samples: &[i16]) -> Result<Bytes, FrameError> {
        let datagram = match self.framing {
            Framing::Headered => encode(self.sequence, self.sample_timestamp, samples)?,
            Framing::Headerless => encode_headerless(samples)?,
        };

        self.sequence = self.sequence.wrapping_add(1);
        self.sample_timestamp = self.sample_timestamp.wrapping_add(samples.len() as u32);
        self.packets_encoded += 1;
        self.bytes_produced += datagram.len() as u64;

        Ok(datagram)
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Sequence number the next packet will carry
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// Sample timestamp the next packet will carry
    pub fn next_sample_timestamp(&self) -> u32 {
        self.sample_timestamp
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            packets_encoded: self.packets_encoded,
            bytes_produced: self.bytes_produced,
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub packets_encoded: u64,
    pub bytes_produced: u64,
}
