//! Network receiver
//!
//! Owns the UDP socket. Each datagram is decoded and pushed into the
//! hand-off buffer; a full buffer evicts its oldest chunk instead of stalling
//! the loop.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::buffer::{AudioChunk, PushOutcome, SharedHandoffBuffer};
use crate::codec::PacketDecoder;
use crate::config::NetworkConfig;
use crate::error::{FrameError, NetworkError};
use crate::network::udp::{create_socket, is_timeout};
use crate::session::RunFlag;

/// Consecutive non-timeout socket errors before the receiver gives up
pub const MAX_CONSECUTIVE_SOCKET_ERRORS: u32 = 10;

/// Pause after a socket error so a persistent fault does not spin
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Largest possible UDP payload, so an oversized datagram arrives whole
/// and is rejected by length instead of being truncated by the kernel.
const RECV_BUFFER_SIZE: usize = 65536;

/// Where the receive loop gets its datagrams from
pub trait DatagramSource: Send {
    /// Bounded-time receive; WouldBlock/TimedOut means nothing arrived
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl DatagramSource for UdpSocket {
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Counts consecutive non-timeout socket errors
#[derive(Debug, Clone)]
pub struct ErrorStreak {
    count: u32,
    limit: u32,
}

impl ErrorStreak {
    pub fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    /// A receive succeeded
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Record one failure. Fails with [`NetworkError::ReceiveFailed`] once
    /// the streak reaches the limit.
    pub fn record(&mut self, err: io::Error) -> Result<(), NetworkError> {
        self.count += 1;
        if self.count == 1 {
            tracing::warn!("UDP receive error: {}", err);
        } else {
            tracing::debug!("UDP receive error ({} in a row): {}", self.count, err);
        }

        if self.count >= self.limit {
            tracing::error!("Receiver stopping after {} consecutive socket errors", self.count);
            return Err(NetworkError::ReceiveFailed {
                errors: self.count,
                source: err,
            });
        }
        Ok(())
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Classification of one sequence number against the stream so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceEvent {
    First,
    InOrder,
    /// `missing` packets were skipped before this one
    Gap { missing: u16 },
    /// Arrived after a later packet (or duplicated)
    OutOfOrder,
}

/// Loss and reordering bookkeeping from headered sequence numbers
///
/// Advisory only: packets are never reordered. A forward jump of less than
/// half the 16-bit space counts as loss; anything further counts as a late
/// packet, which makes the counters wrap-aware.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    highest: Option<u16>,
    received: u64,
    lost: u64,
    out_of_order: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, sequence: u16) -> SequenceEvent {
        self.received += 1;

        let Some(highest) = self.highest else {
            self.highest = Some(sequence);
            return SequenceEvent::First;
        };

        let expected = highest.wrapping_add(1);
        let ahead = sequence.wrapping_sub(expected);
        if ahead == 0 {
            self.highest = Some(sequence);
            SequenceEvent::InOrder
        } else if ahead < 0x8000 {
            self.highest = Some(sequence);
            self.lost += ahead as u64;
            SequenceEvent::Gap { missing: ahead }
        } else {
            self.out_of_order += 1;
            SequenceEvent::OutOfOrder
        }
    }

    pub fn stats(&self) -> SequenceStats {
        SequenceStats {
            received: self.received,
            lost: self.lost,
            out_of_order: self.out_of_order,
        }
    }
}

/// Sequence statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceStats {
    pub received: u64,
    pub lost: u64,
    pub out_of_order: u64,
}

impl SequenceStats {
    pub fn loss_rate(&self) -> f32 {
        let total = self.received + self.lost;
        if total == 0 {
            0.0
        } else {
            self.lost as f32 / total as f32
        }
    }
}

/// Receiver statistics
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    pub datagrams: u64,
    pub bytes: u64,
    pub chunks_queued: u64,
    pub malformed: u64,
    pub evicted: u64,
    pub socket_errors: u64,
    pub sequence: SequenceStats,
}

/// What happened to one datagram
#[derive(Debug, PartialEq, Eq)]
pub enum DatagramOutcome {
    Queued,
    /// Queued after evicting the oldest buffered chunk
    QueuedWithEviction(AudioChunk),
    Discarded(FrameError),
}

/// UDP receive loop
pub struct Receiver<S: DatagramSource = UdpSocket> {
    socket: S,
    decoder: PacketDecoder,
    buffer: SharedHandoffBuffer,
    running: RunFlag,
    tracker: SequenceTracker,
    stats: ReceiverStats,
    last_peer: Option<SocketAddr>,
    stats_interval: Option<Duration>,
}

impl Receiver<UdpSocket> {
    /// Bind the socket. Fails with [`NetworkError::BindFailed`].
    pub fn bind(
        config: &NetworkConfig,
        decoder: PacketDecoder,
        buffer: SharedHandoffBuffer,
        running: RunFlag,
    ) -> Result<Self, NetworkError> {
        let socket = create_socket(config)?;
        Ok(Self::with_socket(socket, decoder, buffer, running))
    }
}

impl<S: DatagramSource> Receiver<S> {
    /// Use an already bound socket. Its read timeout is the poll interval.
    pub fn with_socket(
        socket: S,
        decoder: PacketDecoder,
        buffer: SharedHandoffBuffer,
        running: RunFlag,
    ) -> Self {
        Self {
            socket,
            decoder,
            buffer,
            running,
            tracker: SequenceTracker::new(),
            stats: ReceiverStats::default(),
            last_peer: None,
            stats_interval: None,
        }
    }

    /// Log a statistics line at this interval while running
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run until the run flag clears or the socket fails persistently.
    ///
    /// Consumes the receiver: the socket is closed when this returns, after
    /// the last receive attempt has finished.
    pub fn run(mut self) -> Result<ReceiverStats, NetworkError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut errors = ErrorStreak::new(MAX_CONSECUTIVE_SOCKET_ERRORS);
        let mut last_report = Instant::now();

        tracing::info!(
            "Receiver listening on {} ({} framing)",
            self.socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".into()),
            self.decoder.framing()
        );

        while self.running.is_running() {
            match self.socket.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    errors.reset();
                    self.note_peer(peer);
                    self.handle_datagram(&buf[..len]);
                }
                Err(e) if is_timeout(&e) => {
                    // Poll cycle: re-check the run flag
                }
                Err(e) => {
                    self.stats.socket_errors += 1;
                    errors.record(e)?;
                    thread::sleep(ERROR_BACKOFF);
                }
            }

            if let Some(interval) = self.stats_interval {
                if last_report.elapsed() >= interval {
                    last_report = Instant::now();
                    self.log_stats();
                }
            }
        }

        tracing::info!("Receiver stopped");
        Ok(self.stats())
    }

    /// Decode one datagram and queue its chunk
    pub fn handle_datagram(&mut self, datagram: &[u8]) -> DatagramOutcome {
        self.stats.datagrams += 1;
        self.stats.bytes += datagram.len() as u64;

        let packet = match self.decoder.decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.malformed += 1;
                tracing::debug!("Discarding datagram: {}", e);
                return DatagramOutcome::Discarded(e);
            }
        };

        if let Some(seq) = packet.sequence() {
            match self.tracker.observe(seq) {
                SequenceEvent::Gap { missing } => {
                    tracing::debug!("{} packet(s) missing before seq {}", missing, seq)
                }
                SequenceEvent::OutOfOrder => tracing::debug!("Out of order packet (seq {})", seq),
                SequenceEvent::First | SequenceEvent::InOrder => {}
            }
        }

        self.stats.chunks_queued += 1;
        match self.buffer.push(AudioChunk::from_packet(&packet)) {
            PushOutcome::Inserted => DatagramOutcome::Queued,
            PushOutcome::Evicted(old) => {
                self.stats.evicted += 1;
                tracing::trace!("Hand-off buffer full, evicted seq {:?}", old.sequence);
                DatagramOutcome::QueuedWithEviction(old)
            }
        }
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            sequence: self.tracker.stats(),
            ..self.stats.clone()
        }
    }

    fn note_peer(&mut self, peer: SocketAddr) {
        if self.last_peer != Some(peer) {
            tracing::info!("Receiving audio from {}", peer);
            self.last_peer = Some(peer);
        }
    }

    fn log_stats(&self) {
        let stats = self.stats();
        tracing::info!(
            "Receiver stats: {} datagrams, {} bytes, {} malformed, {} evicted, {} lost ({:.1}% loss), {} out of order, buffer {}/{}",
            stats.datagrams,
            stats.bytes,
            stats.malformed,
            stats.evicted,
            stats.sequence.lost,
            stats.sequence.loss_rate() * 100.0,
            stats.sequence.out_of_order,
            self.buffer.len(),
            self.buffer.capacity()
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_buffer;
    use crate::codec::encode;
    use crate::protocol::Framing;
    use std::collections::VecDeque;

    /// Replays scripted datagrams and errors, then reports timeouts
    pub(crate) struct ScriptedSource {
        pub script: VecDeque<Result<Vec<u8>, io::ErrorKind>>,
    }

    impl ScriptedSource {
        pub fn failing(count: usize) -> Self {
            Self {
                script: (0..count).map(|_| Err(io::ErrorKind::ConnectionRefused)).collect(),
            }
        }
    }

    impl DatagramSource for ScriptedSource {
        fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            match self.script.pop_front() {
                Some(Ok(datagram)) => {
                    buf[..datagram.len()].copy_from_slice(&datagram);
                    Ok((datagram.len(), self.local_addr()?))
                }
                Some(Err(kind)) => Err(io::Error::from(kind)),
                None => {
                    thread::sleep(Duration::from_millis(5));
                    Err(io::Error::from(io::ErrorKind::WouldBlock))
                }
            }
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 9)))
        }
    }

    fn test_receiver(capacity: usize) -> (Receiver, SharedHandoffBuffer, RunFlag) {
        let buffer = create_shared_buffer(capacity);
        let running = RunFlag::new();
        let config = NetworkConfig {
            udp_port: 0,
            poll_timeout_ms: 50,
            recv_buffer_size: None,
        };
        let receiver = Receiver::bind(
            &config,
            PacketDecoder::new(Framing::Headered),
            buffer.clone(),
            running.clone(),
        )
        .unwrap();
        (receiver, buffer, running)
    }

    #[test]
    fn test_tracker_in_order() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(10), SequenceEvent::First);
        assert_eq!(tracker.observe(11), SequenceEvent::InOrder);
        assert_eq!(tracker.stats().lost, 0);
    }

    #[test]
    fn test_tracker_gap_and_late() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(0);
        assert_eq!(tracker.observe(3), SequenceEvent::Gap { missing: 2 });
        assert_eq!(tracker.observe(2), SequenceEvent::OutOfOrder);
        assert_eq!(tracker.observe(4), SequenceEvent::InOrder);

        let stats = tracker.stats();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.lost, 2);
        assert_eq!(stats.out_of_order, 1);
    }

    #[test]
    fn test_tracker_wraps() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(65534);
        assert_eq!(tracker.observe(65535), SequenceEvent::InOrder);
        assert_eq!(tracker.observe(0), SequenceEvent::InOrder);
        assert_eq!(tracker.observe(2), SequenceEvent::Gap { missing: 1 });
        assert_eq!(tracker.observe(65535), SequenceEvent::OutOfOrder);
    }

    #[test]
    fn test_malformed_datagrams_are_discarded() {
        let (mut receiver, buffer, _running) = test_receiver(4);
        assert_eq!(
            receiver.handle_datagram(&[0u8; 5]),
            DatagramOutcome::Discarded(FrameError::TooShort { len: 5, required: 6 })
        );
        assert!(matches!(
            receiver.handle_datagram(&[0u8; 9]),
            DatagramOutcome::Discarded(FrameError::OddPayload(3))
        ));
        assert!(buffer.is_empty());
        assert_eq!(receiver.stats().malformed, 2);
        assert_eq!(receiver.stats().chunks_queued, 0);
    }

    #[test]
    fn test_overflow_evicts_oldest_chunk() {
        let (mut receiver, buffer, _running) = test_receiver(2);
        let samples = vec![0i16; 20];
        for (seq, ts) in [(0u16, 0u32), (1, 20), (2, 40)] {
            receiver.handle_datagram(&encode(seq, ts, &samples).unwrap());
        }

        let seqs: Vec<_> = std::iter::from_fn(|| buffer.try_pop())
            .map(|c| c.sequence)
            .collect();
        assert_eq!(seqs, vec![Some(1), Some(2)]);
        assert_eq!(receiver.stats().evicted, 1);
    }

    #[test]
    fn test_run_receives_and_stops() {
        let (receiver, buffer, running) = test_receiver(8);
        let port = receiver.local_addr().unwrap().port();
        let handle = thread::spawn(move || receiver.run());

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let samples = vec![1i16; 20];
        for seq in 0..3u16 {
            let datagram = encode(seq, seq as u32 * 20, &samples).unwrap();
            sender.send_to(&datagram, ("127.0.0.1", port)).unwrap();
        }

        let mut received = Vec::new();
        while received.len() < 3 {
            match buffer.pop_timeout(Duration::from_secs(2)) {
                Some(chunk) => received.push(chunk.sequence),
                None => break,
            }
        }
        assert_eq!(received, vec![Some(0), Some(1), Some(2)]);

        let stop_requested = Instant::now();
        running.stop();
        let stats = handle.join().unwrap().unwrap();
        assert!(stop_requested.elapsed() < Duration::from_secs(1));
        assert_eq!(stats.chunks_queued, 3);
        assert_eq!(stats.sequence.received, 3);
    }

    #[test]
    fn test_error_streak_limit() {
        let mut streak = ErrorStreak::new(3);
        let refused = || io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(streak.record(refused()).is_ok());
        assert!(streak.record(refused()).is_ok());
        streak.reset();
        assert!(streak.record(refused()).is_ok());
        assert!(streak.record(refused()).is_ok());
        assert!(matches!(
            streak.record(refused()),
            Err(NetworkError::ReceiveFailed { errors: 3, .. })
        ));
    }

    #[test]
    fn test_persistent_socket_errors_end_run() {
        let buffer = create_shared_buffer(4);
        let receiver = Receiver::with_socket(
            ScriptedSource::failing(MAX_CONSECUTIVE_SOCKET_ERRORS as usize),
            PacketDecoder::new(Framing::Headered),
            buffer,
            RunFlag::new(),
        );

        match receiver.run() {
            Err(NetworkError::ReceiveFailed { errors, .. }) => {
                assert_eq!(errors, MAX_CONSECUTIVE_SOCKET_ERRORS)
            }
            other => panic!("expected ReceiveFailed, got {:?}", other.map(|s| s.socket_errors)),
        }
    }

    #[test]
    fn test_datagram_between_errors_resets_streak() {
        let refused = || -> Result<Vec<u8>, io::ErrorKind> {
            Err(io::ErrorKind::ConnectionRefused)
        };
        let mut script: VecDeque<_> = (0..9).map(|_| refused()).collect();
        script.push_back(Ok(encode(0, 0, &[1, 2]).unwrap().to_vec()));
        script.extend((0..9).map(|_| refused()));

        let buffer = create_shared_buffer(4);
        let running = RunFlag::new();
        let receiver = Receiver::with_socket(
            ScriptedSource { script },
            PacketDecoder::new(Framing::Headered),
            buffer.clone(),
            running.clone(),
        );
        let handle = thread::spawn(move || receiver.run());

        assert!(buffer.pop_timeout(Duration::from_secs(2)).is_some());
        thread::sleep(Duration::from_millis(300));
        running.stop();
        let stats = handle.join().unwrap().unwrap();
        assert_eq!(stats.socket_errors, 18);
        assert_eq!(stats.chunks_queued, 1);
    }

    #[test]
    fn test_oversized_datagram_is_not_truncated() {
        let (receiver, buffer, running) = test_receiver(8);
        let port = receiver.local_addr().unwrap().port();
        let handle = thread::spawn(move || receiver.run());

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut datagram = vec![0u8; 6];
        datagram.extend(std::iter::repeat(0x11).take(2 * 2500));
        assert_eq!(datagram.len(), 5006);
        sender.send_to(&datagram, ("127.0.0.1", port)).unwrap();

        assert!(buffer.pop_timeout(Duration::from_millis(300)).is_none());
        running.stop();
        let stats = handle.join().unwrap().unwrap();
        assert_eq!(stats.datagrams, 1);
        assert_eq!(stats.bytes, 5006);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.chunks_queued, 0);
    }
}
