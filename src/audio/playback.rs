//! Audio playback to an output device
//!
//! cpal pulls samples from a callback; the coordinator pushes whole chunks.
//! [`CpalPlayback`] bridges the two with a lock-free sample FIFO. The cpal
//! stream lives on its own thread because it is not `Send`.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Sample, StreamConfig};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::device::{
    get_default_output_device, get_device_by_id, AudioDevice, PlaybackDevice,
};
use crate::error::AudioError;
use crate::protocol::{MAX_DATAGRAM_SIZE, SAMPLE_WIDTH};

/// How long `open` waits for the stream thread to report back
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for FIFO space
const WRITE_POLL: Duration = Duration::from_millis(1);

/// Output device fed by pushed PCM chunks
pub struct CpalPlayback {
    device_name: String,
    sample_rate: u32,
    channels: u16,
    fifo: Arc<ArrayQueue<i16>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
    write_timeout: Duration,
    /// Callbacks that ran out of samples and padded with silence
    starved_callbacks: Arc<AtomicU64>,
}

impl CpalPlayback {
    /// Open `device_id` (or the default output device) at `sample_rate`
    /// and start the output stream.
    pub fn open(
        device_id: Option<&str>,
        sample_rate: u32,
        write_timeout: Duration,
    ) -> Result<Self, AudioError> {
        let device = match device_id {
            Some(id) => get_device_by_id(id)?,
            None => get_default_output_device()?,
        };
        let device_name = device.name.clone();

        if !device.supports_rate(sample_rate) {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} cannot play {} Hz",
                device_name, sample_rate
            )));
        }

        let default_config = device.default_output_config()?;
        let sample_format = default_config.sample_format();
        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // Room for a quarter second, and never less than two full datagrams
        let fifo_capacity = (sample_rate as usize / 4).max(2 * MAX_DATAGRAM_SIZE / SAMPLE_WIDTH);
        let fifo = Arc::new(ArrayQueue::new(fifo_capacity));
        let running = Arc::new(AtomicBool::new(true));
        let starved_callbacks = Arc::new(AtomicU64::new(0));
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let handle = {
            let fifo = fifo.clone();
            let running = running.clone();
            let starved = starved_callbacks.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("playback-device".to_string())
                .spawn(move || {
                    run_stream(
                        device,
                        sample_format,
                        config,
                        fifo,
                        running,
                        starved,
                        error_tx,
                        ready_tx,
                    )
                })
                .map_err(|e| AudioError::StreamError(e.to_string()))?
        };

        let ready = ready_rx.recv_timeout(OPEN_TIMEOUT).unwrap_or_else(|_| {
            Err(AudioError::StreamError(
                "output stream did not start".to_string(),
            ))
        });
        if let Err(e) = ready {
            running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        tracing::info!(
            "Playback started on {} ({} Hz, {} device channels, {:?})",
            device_name,
            sample_rate,
            config.channels,
            sample_format
        );

        Ok(Self {
            device_name,
            sample_rate,
            channels: config.channels,
            fifo,
            running,
            thread_handle: Some(handle),
            error_rx,
            write_timeout,
            starved_callbacks,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count of the device stream; mono input is duplicated
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Samples queued but not yet pulled by the device
    pub fn queued_samples(&self) -> usize {
        self.fifo.len()
    }

    pub fn starved_callbacks(&self) -> u64 {
        self.starved_callbacks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl PlaybackDevice for CpalPlayback {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        while let Ok(err) = self.error_rx.try_recv() {
            if !err.is_transient() {
                return Err(err);
            }
            tracing::debug!("Output stream on {} reported: {}", self.device_name, err);
        }
        if !self.is_running() {
            return Err(AudioError::Disconnected(self.device_name.clone()));
        }

        let needed = pcm.len() / SAMPLE_WIDTH;
        let start = Instant::now();
        // Whole chunk or nothing: wait until all of it fits
        while self.fifo.capacity() - self.fifo.len() < needed {
            if start.elapsed() >= self.write_timeout {
                return Err(AudioError::WriteTimeout(self.write_timeout.as_millis() as u64));
            }
            thread::sleep(WRITE_POLL);
        }

        for bytes in pcm.chunks_exact(SAMPLE_WIDTH) {
            // Only this side pushes, so the space checked above is still free
            let _ = self.fifo.push(i16::from_le_bytes([bytes[0], bytes[1]]));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!(
                "Playback on {} stopped ({} starved callbacks)",
                self.device_name,
                self.starved_callbacks()
            );
        }
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_stream(
    device: AudioDevice,
    sample_format: cpal::SampleFormat,
    config: StreamConfig,
    fifo: Arc<ArrayQueue<i16>>,
    running: Arc<AtomicBool>,
    starved: Arc<AtomicU64>,
    error_tx: Sender<AudioError>,
    ready_tx: Sender<Result<(), AudioError>>,
) {
    let cpal_device = device.into_inner();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&cpal_device, &config, fifo, starved, error_tx)
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&cpal_device, &config, fifo, starved, error_tx)
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&cpal_device, &config, fifo, starved, error_tx)
        }
        other => {
            let _ = ready_tx.send(Err(AudioError::UnsupportedFormat(format!("{:?}", other))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Keep thread alive while running
    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(10));
    }

    if let Err(e) = stream.pause() {
        tracing::debug!("Failed to pause output stream: {}", e);
    }
    // Stream is dropped here, releasing the device
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    fifo: Arc<ArrayQueue<i16>>,
    starved: Arc<AtomicU64>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels = config.channels as usize;

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut ran_dry = false;
            for frame in data.chunks_mut(channels) {
                let sample = fifo.pop().unwrap_or_else(|| {
                    ran_dry = true;
                    0
                });
                let value = T::from_sample(sample);
                for out in frame.iter_mut() {
                    *out = value;
                }
            }
            if ran_dry {
                starved.fetch_add(1, Ordering::Relaxed);
            }
        },
        move |err| {
            let err = match err {
                cpal::StreamError::DeviceNotAvailable => AudioError::Disconnected(err.to_string()),
                other => AudioError::CpalError(other.to_string()),
            };
            let _ = error_tx.try_send(err);
        },
        None,
    )
}
