//! Stream session lifecycle
//!
//! A [`Session`] opens the socket, output device and recording file, runs the
//! receiver and the playback coordinator on their own threads, and shuts
//! both down in order. Workers announce their exit on a completion channel;
//! shutdown waits on that channel with a deadline, so a wedged worker is
//! abandoned rather than joined forever. The recording is finalized on the
//! owning thread after that wait, whether or not playback exited in time.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::audio::buffer::{create_shared_buffer, BufferStats, SharedHandoffBuffer};
use crate::audio::coordinator::{Coordinator, PlaybackReport};
use crate::audio::device::{NullDevice, PlaybackDevice};
use crate::audio::playback::CpalPlayback;
use crate::codec::PacketDecoder;
use crate::config::{AppConfig, NetworkConfig};
use crate::error::{Error, NetworkError, Result};
use crate::network::receiver::{DatagramSource, Receiver as UdpReceiver, ReceiverStats};
use crate::network::udp::create_socket;
use crate::recording::{create_shared_recorder, RecordingSummary, SharedRecorder};

/// How often `run` re-checks the run flag while waiting on workers
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Shared run/stop flag read by both workers
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    /// A new flag in the running state
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// The two long-lived worker threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Worker {
    Receiver,
    Playback,
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Worker::Receiver => write!(f, "receiver"),
            Worker::Playback => write!(f, "playback"),
        }
    }
}

enum WorkerExit {
    Receiver(std::result::Result<ReceiverStats, NetworkError>),
    Playback(Result<PlaybackReport>),
}

impl WorkerExit {
    fn worker(&self) -> Worker {
        match self {
            WorkerExit::Receiver(_) => Worker::Receiver,
            WorkerExit::Playback(_) => Worker::Playback,
        }
    }
}

/// Everything known about a session once it has shut down
#[derive(Debug, Default)]
pub struct SessionSummary {
    pub receiver: Option<ReceiverStats>,
    pub playback: Option<PlaybackReport>,
    pub recording: Option<RecordingSummary>,
    pub buffer: BufferStats,
    /// Workers that missed the join deadline
    pub abandoned: Vec<Worker>,
    /// First running-fatal error, if any
    pub fatal: Option<Error>,
}

impl SessionSummary {
    /// Fold the fatal error (if any) into a `Result`
    pub fn into_result(mut self) -> Result<Self> {
        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    pub fn log(&self) {
        if let Some(stats) = &self.receiver {
            tracing::info!(
                "Packets: {} received, {} lost ({:.2}% drop rate), {} out of order, {} malformed",
                stats.sequence.received.max(stats.chunks_queued),
                stats.sequence.lost,
                stats.sequence.loss_rate() * 100.0,
                stats.sequence.out_of_order,
                stats.malformed
            );
        }
        tracing::info!(
            "Hand-off buffer: {} chunks in, {} evicted ({:.2}%), {} underruns",
            self.buffer.pushed,
            self.buffer.evicted,
            self.buffer.eviction_rate() * 100.0,
            self.buffer.underruns
        );
        if let Some(report) = &self.playback {
            tracing::info!(
                "Playback: {} chunks ({} samples), {} write failures",
                report.stats.chunks_played,
                report.stats.samples_played,
                report.stats.write_failures
            );
        }
        if let Some(recording) = &self.recording {
            tracing::info!(
                "Recording: {} chunks, {} frames",
                recording.chunks,
                recording.frames
            );
        }
    }
}

/// One run of the streaming service
pub struct Session {
    id: Uuid,
    running: RunFlag,
    buffer: SharedHandoffBuffer,
    local_addr: SocketAddr,
    workers: Vec<(Worker, JoinHandle<()>)>,
    recorder: Option<SharedRecorder>,
    exit_rx: Receiver<WorkerExit>,
    join_timeout: Duration,
    summary: SessionSummary,
}

impl Session {
    /// Start a session playing to the configured output device, or to no
    /// device at all when muted.
    pub fn start(config: &AppConfig) -> Result<Self> {
        if config.audio.mute {
            return Self::start_with_device(config, NullDevice::new());
        }
        Self::start_with_parts(config, create_socket, |config| {
            let device = CpalPlayback::open(
                config.audio.output_device.as_deref(),
                config.audio.sample_rate,
                config.audio.device_write_timeout(),
            )?;
            Ok(device)
        })
    }

    /// Start a session with an already opened output device
    pub fn start_with_device<D>(config: &AppConfig, device: D) -> Result<Self>
    where
        D: PlaybackDevice + 'static,
    {
        Self::start_with_parts(config, create_socket, move |_| Ok(device))
    }

    fn start_with_parts<S, D, B, F>(config: &AppConfig, bind: B, open_device: F) -> Result<Self>
    where
        S: DatagramSource + 'static,
        D: PlaybackDevice + 'static,
        B: FnOnce(&NetworkConfig) -> std::result::Result<S, NetworkError>,
        F: FnOnce(&AppConfig) -> Result<D>,
    {
        let id = Uuid::new_v4();
        let running = RunFlag::new();
        let buffer = create_shared_buffer(config.audio.buffer_capacity);
        let decoder =
            PacketDecoder::new(config.stream.framing).allow_empty(config.stream.allow_empty);

        // Resources opened in order; anything already opened is dropped
        // (and so released) if a later step fails.
        let socket = bind(&config.network)?;
        let receiver = UdpReceiver::with_socket(socket, decoder, buffer.clone(), running.clone())
            .with_stats_interval(config.session.stats_interval());
        let local_addr = receiver.local_addr()?;
        let device = open_device(config)?;
        let recorder = match &config.recording.output_path {
            Some(path) => Some(create_shared_recorder(path, config.audio.sample_rate)?),
            None => None,
        };

        let coordinator = Coordinator::new(
            buffer.clone(),
            device,
            recorder.clone(),
            running.clone(),
            config.network.poll_timeout(),
        );

        let (exit_tx, exit_rx) = bounded::<WorkerExit>(2);
        let mut workers = Vec::with_capacity(2);

        let playback = spawn_worker(Worker::Playback, id, exit_tx.clone(), move || {
            WorkerExit::Playback(coordinator.run())
        });
        match playback {
            Ok(handle) => workers.push((Worker::Playback, handle)),
            Err(e) => return Err(Error::Session(format!("failed to spawn playback thread: {}", e))),
        }

        let receive = spawn_worker(Worker::Receiver, id, exit_tx, move || {
            WorkerExit::Receiver(receiver.run())
        });
        match receive {
            Ok(handle) => workers.push((Worker::Receiver, handle)),
            Err(e) => {
                running.stop();
                for (_, handle) in workers {
                    let _ = handle.join();
                }
                return Err(Error::Session(format!("failed to spawn receiver thread: {}", e)));
            }
        }

        tracing::info!(
            "Session {} started on {} ({} Hz, {} framing, buffer {} chunks{})",
            id,
            local_addr,
            config.audio.sample_rate,
            config.stream.framing,
            config.audio.buffer_capacity,
            match &config.recording.output_path {
                Some(path) => format!(", recording to {}", path.display()),
                None => String::new(),
            }
        );

        Ok(Self {
            id,
            running,
            buffer,
            local_addr,
            workers,
            recorder,
            exit_rx,
            join_timeout: config.session.join_timeout(),
            summary: SessionSummary::default(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Address the receive socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Flag that stops both workers when cleared
    pub fn run_flag(&self) -> RunFlag {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    /// Block until a stop is requested through the run flag or a worker
    /// exits on its own (a running-fatal error), then shut down.
    pub fn run(mut self) -> SessionSummary {
        while self.running.is_running() {
            match self.exit_rx.recv_timeout(WAIT_POLL) {
                Ok(exit) => {
                    let worker = exit.worker();
                    self.absorb(exit);
                    tracing::warn!("{} worker exited, shutting down session", worker);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.shutdown()
    }

    /// Stop both workers and wait, up to the join timeout, for them to
    /// exit. The receiver closes its socket and the coordinator releases
    /// the device and finalizes the recording as they exit.
    pub fn shutdown(mut self) -> SessionSummary {
        self.running.stop();
        let deadline = Instant::now() + self.join_timeout;

        while !self.workers.is_empty() {
            match self.exit_rx.recv_deadline(deadline) {
                Ok(exit) => self.absorb(exit),
                Err(_) => {
                    for (worker, _handle) in self.workers.drain(..) {
                        tracing::warn!(
                            "{} worker did not exit within {:?}, abandoning it",
                            worker,
                            self.join_timeout
                        );
                        self.summary.abandoned.push(worker);
                    }
                }
            }
        }

        self.finalize_recording();

        self.summary.buffer = self.buffer.stats();
        let dropped = self.buffer.clear();
        if dropped > 0 {
            tracing::debug!("Discarded {} undrained chunks", dropped);
        }

        tracing::info!("Session {} stopped", self.id);
        std::mem::take(&mut self.summary)
    }

    /// Write out the recording. An abandoned playback worker may still hold
    /// a handle; anything it appends afterwards is ignored.
    fn finalize_recording(&mut self) {
        let Some(recorder) = self.recorder.take() else {
            return;
        };
        let result = recorder.lock().finalize();
        match result {
            Ok(recording) => self.summary.recording = Some(recording),
            Err(e) => {
                tracing::error!("Failed to finalize recording: {}", e);
                self.summary.fatal.get_or_insert(Error::from(e));
            }
        }
    }

    fn absorb(&mut self, exit: WorkerExit) {
        let worker = exit.worker();
        if let Some(pos) = self.workers.iter().position(|(w, _)| *w == worker) {
            let (_, handle) = self.workers.remove(pos);
            // The exit message is the worker's last act, so this returns promptly
            if handle.join().is_err() {
                tracing::error!("{} thread panicked", worker);
            }
        }

        let failure = match exit {
            WorkerExit::Receiver(Ok(stats)) => {
                self.summary.receiver = Some(stats);
                None
            }
            WorkerExit::Receiver(Err(e)) => Some(Error::from(e)),
            WorkerExit::Playback(Ok(report)) => {
                self.summary.playback = Some(report);
                None
            }
            WorkerExit::Playback(Err(e)) => Some(e),
        };

        if let Some(e) = failure {
            tracing::error!("{} failed: {}", worker, e);
            self.summary.fatal.get_or_insert(e);
        }
    }
}

fn spawn_worker<F>(
    worker: Worker,
    session: Uuid,
    exit_tx: Sender<WorkerExit>,
    body: F,
) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() -> WorkerExit + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{}-worker", worker))
        .spawn(move || {
            let span = tracing::info_span!("worker", %worker, %session);
            let _enter = span.enter();
            let exit = body();
            let _ = exit_tx.send(exit);
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::coordinator::tests::MockDevice;
    use crate::codec::encode;
    use crate::error::AudioError;
    use crate::network::receiver::tests::ScriptedSource;
    use crate::network::receiver::MAX_CONSECUTIVE_SOCKET_ERRORS;
    use std::net::UdpSocket;
    use std::path::PathBuf;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.network.udp_port = 0;
        config.network.poll_timeout_ms = 100;
        config.session.join_timeout_ms = 1000;
        config.session.stats_interval_secs = 0;
        config
    }

    fn temp_wav() -> PathBuf {
        std::env::temp_dir().join(format!("udp-pcm-{}.wav", Uuid::new_v4()))
    }

    fn send_to(session: &Session, datagram: &[u8]) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = ("127.0.0.1", session.local_addr().port());
        socket.send_to(datagram, target).unwrap();
    }

    fn wait_for_writes(device: &MockDevice, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while device.writes.lock().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_packets_reach_playback_in_order() {
        let device = MockDevice::default();
        let session = Session::start_with_device(&test_config(), device.clone()).unwrap();

        let samples: Vec<i16> = (0..20).collect();
        for (seq, ts) in [(0u16, 0u32), (1, 20), (2, 40)] {
            send_to(&session, &encode(seq, ts, &samples).unwrap());
        }
        wait_for_writes(&device, 3);

        let summary = session.shutdown().into_result().unwrap();
        assert_eq!(device.writes.lock().len(), 3);
        assert_eq!(device.written_samples().len(), 60);
        assert_eq!(summary.receiver.unwrap().sequence.received, 3);
        assert_eq!(summary.playback.unwrap().stats.chunks_played, 3);
    }

    #[test]
    fn test_short_datagram_produces_nothing() {
        let device = MockDevice::default();
        let session = Session::start_with_device(&test_config(), device.clone()).unwrap();

        send_to(&session, &[0u8; 5]);
        thread::sleep(Duration::from_millis(300));

        let summary = session.shutdown().into_result().unwrap();
        assert!(device.writes.lock().is_empty());
        let receiver = summary.receiver.unwrap();
        assert_eq!(receiver.malformed, 1);
        assert_eq!(receiver.chunks_queued, 0);
    }

    #[test]
    fn test_idle_recording_finalizes_empty_wav() {
        let path = temp_wav();
        let mut config = test_config();
        config.recording.output_path = Some(path.clone());

        let session = Session::start_with_device(&config, MockDevice::default()).unwrap();
        thread::sleep(Duration::from_millis(150));
        let summary = session.shutdown().into_result().unwrap();

        let recording = summary.recording.unwrap();
        assert_eq!(recording.frames, 0);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.duration(), 0);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_recording_contains_played_audio() {
        let path = temp_wav();
        let mut config = test_config();
        config.recording.output_path = Some(path.clone());
        let device = MockDevice::default();
        let session = Session::start_with_device(&config, device.clone()).unwrap();

        send_to(&session, &encode(0, 0, &[5, 6, 7]).unwrap());
        send_to(&session, &encode(1, 3, &[8, 9]).unwrap());
        wait_for_writes(&device, 2);
        session.shutdown().into_result().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let recorded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(recorded, device.written_samples());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_recording_survives_short_join_deadline() {
        let path = temp_wav();
        let mut config = test_config();
        config.recording.output_path = Some(path.clone());
        config.audio.buffer_capacity = 512;
        config.session.join_timeout_ms = 1;
        let device = MockDevice::default();
        let session = Session::start_with_device(&config, device.clone()).unwrap();

        let samples: Vec<i16> = (0..2000).map(|i| (i % 700) as i16).collect();
        for seq in 0..200u16 {
            send_to(&session, &encode(seq, seq as u32 * 2000, &samples).unwrap());
            if seq % 20 == 19 {
                thread::sleep(Duration::from_millis(5));
            }
        }
        wait_for_writes(&device, 200);
        thread::sleep(Duration::from_millis(50));

        let summary = session.shutdown().into_result().unwrap();
        let recording = summary.recording.unwrap();
        assert!(recording.frames > 0);
        assert_eq!(recording.frames as usize, device.written_samples().len());

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration() as u64, recording.frames);
        let recorded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(recorded, device.written_samples());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_persistent_socket_errors_are_running_fatal() {
        let device = MockDevice::default();
        let session = Session::start_with_parts(
            &test_config(),
            |_: &NetworkConfig| {
                Ok::<_, NetworkError>(ScriptedSource::failing(
                    MAX_CONSECUTIVE_SOCKET_ERRORS as usize,
                ))
            },
            {
                let device = device.clone();
                move |_: &AppConfig| Ok(device)
            },
        )
        .unwrap();

        let summary = session.run();
        assert!(matches!(
            summary.fatal,
            Some(Error::Network(NetworkError::ReceiveFailed { .. }))
        ));
        assert!(summary.playback.is_some());
        assert_eq!(*device.closed.lock(), 1);
    }

    #[test]
    fn test_shutdown_converges_and_releases_once() {
        let device = MockDevice::default();
        let config = test_config();
        let session = Session::start_with_device(&config, device.clone()).unwrap();
        let port = session.local_addr().port();

        let stop_requested = Instant::now();
        let summary = session.shutdown();
        let limit = config.network.poll_timeout() + Duration::from_millis(500);
        assert!(stop_requested.elapsed() < limit);
        assert!(summary.abandoned.is_empty());
        assert_eq!(*device.closed.lock(), 1);

        // Socket was closed: the port can be bound again
        UdpSocket::bind(("0.0.0.0", port)).unwrap();
    }

    #[test]
    fn test_run_returns_when_flag_cleared() {
        let session = Session::start_with_device(&test_config(), MockDevice::default()).unwrap();
        let flag = session.run_flag();
        let handle = thread::spawn(move || session.run());

        thread::sleep(Duration::from_millis(100));
        flag.stop();
        let summary = handle.join().unwrap();
        assert!(summary.fatal.is_none());
        assert!(summary.receiver.is_some());
        assert!(summary.playback.is_some());
    }

    #[test]
    fn test_device_loss_is_running_fatal() {
        let device = MockDevice::default();
        device.fail_next(AudioError::Disconnected("unplugged".into()));
        let session = Session::start_with_device(&test_config(), device.clone()).unwrap();
        send_to(&session, &encode(0, 0, &[1, 2]).unwrap());

        let summary = session.run();
        assert!(matches!(summary.fatal, Some(Error::Audio(AudioError::Disconnected(_)))));
        assert!(summary.receiver.is_some());
        assert_eq!(*device.closed.lock(), 1);
    }

    #[test]
    fn test_bind_failure_is_startup_fatal() {
        let holder = UdpSocket::bind("0.0.0.0:0").unwrap();
        let mut config = test_config();
        config.network.udp_port = holder.local_addr().unwrap().port();

        let result = Session::start_with_device(&config, MockDevice::default());
        // Linux only shares a UDP port when every socket on it sets SO_REUSEADDR
        #[cfg(target_os = "linux")]
        {
            let err = result.err().unwrap();
            assert!(matches!(err, Error::Network(NetworkError::BindFailed { .. })));
            assert!(err.is_startup_fatal());
        }
        #[cfg(not(target_os = "linux"))]
        match result {
            Err(e) => assert!(e.is_startup_fatal()),
            Ok(session) => {
                session.shutdown();
            }
        }
    }

    #[test]
    fn test_unwritable_recording_aborts_startup() {
        let mut config = test_config();
        config.recording.output_path = Some(
            std::env::temp_dir()
                .join(Uuid::new_v4().to_string())
                .join("out.wav"),
        );
        let err = Session::start_with_device(&config, MockDevice::default()).err().unwrap();
        assert!(matches!(err, Error::Recording(_)));
        assert!(err.is_startup_fatal());
    }

    #[test]
    fn test_run_flag() {
        let flag = RunFlag::new();
        let other = flag.clone();
        assert!(other.is_running());
        flag.stop();
        assert!(!other.is_running());
    }
}
