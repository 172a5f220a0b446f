//! Bounded hand-off buffer for audio chunks
//!
//! Bridges the network receiver and the playback coordinator. Inserting
//! never blocks: when the buffer is full the oldest chunk is evicted to make
//! room. Removing blocks up to a caller-supplied timeout.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::protocol::{Packet, SAMPLE_WIDTH};

/// PCM bytes decoded from one datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Little-endian signed 16-bit samples
    pub pcm: Bytes,
    /// Sequence number, if the datagram carried one. Diagnostics only.
    pub sequence: Option<u16>,
}

impl AudioChunk {
    pub fn new(pcm: Bytes, sequence: Option<u16>) -> Self {
        Self { pcm, sequence }
    }

    pub fn from_packet(packet: &Packet) -> Self {
        Self {
            pcm: Bytes::from(packet.pcm_bytes()),
            sequence: packet.sequence(),
        }
    }

    /// Number of mono samples in this chunk
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / SAMPLE_WIDTH
    }

    /// Chunk duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.sample_count() as u64 * 1_000_000) / sample_rate as u64
    }

    /// Decode the payload back into samples
    pub fn samples(&self) -> Vec<i16> {
        self.pcm
            .chunks_exact(SAMPLE_WIDTH)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }
}

/// Result of a non-blocking insert
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Inserted,
    /// The buffer was full; the returned chunk was evicted
    Evicted(AudioChunk),
}

/// Fixed-capacity FIFO with evict-oldest insertion
///
/// Insert-with-eviction and timed removal each hold the same lock for their
/// whole critical section, so neither can observe the other half done.
pub struct HandoffBuffer {
    queue: Mutex<VecDeque<AudioChunk>>,
    available: Condvar,
    capacity: usize,
    pushed: AtomicU64,
    evicted: AtomicU64,
    underruns: AtomicU64,
}

impl HandoffBuffer {
    /// Create a new buffer with the specified capacity (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            pushed: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }

    /// Insert a chunk, evicting the oldest one if the buffer is full.
    /// Never waits for space.
    pub fn push(&self, chunk: AudioChunk) -> PushOutcome {
        let outcome = {
            let mut queue = self.queue.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(chunk);
            evicted
        };
        self.available.notify_one();
        self.pushed.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Some(old) => {
                self.evicted.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Evicted(old)
            }
            None => PushOutcome::Inserted,
        }
    }

    /// Remove the oldest chunk, waiting up to `timeout` for one to arrive.
    /// Returns `None` on timeout (an underrun).
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioChunk> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.queue.lock();
        loop {
            if let Some(chunk) = queue.pop_front() {
                return Some(chunk);
            }
            if self.available.wait_until(&mut queue, deadline).timed_out() {
                let chunk = queue.pop_front();
                if chunk.is_none() {
                    self.underruns.fetch_add(1, Ordering::Relaxed);
                }
                return chunk;
            }
        }
    }

    /// Remove the oldest chunk without waiting
    pub fn try_pop(&self) -> Option<AudioChunk> {
        self.queue.lock().pop_front()
    }

    /// Drop everything currently buffered, returning how many chunks went
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let n = queue.len();
        queue.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            level: self.len(),
            capacity: self.capacity,
            pushed: self.pushed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe handle to a hand-off buffer
pub type SharedHandoffBuffer = Arc<HandoffBuffer>;

/// Create a new shared hand-off buffer
pub fn create_shared_buffer(capacity: usize) -> SharedHandoffBuffer {
    Arc::new(HandoffBuffer::new(capacity))
}

/// Hand-off buffer statistics
#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    pub level: usize,
    pub capacity: usize,
    pub pushed: u64,
    pub evicted: u64,
    pub underruns: u64,
}

impl BufferStats {
    pub fn eviction_rate(&self) -> f32 {
        if self.pushed == 0 {
            0.0
        } else {
            self.evicted as f32 / self.pushed as f32
        }
    }
}
