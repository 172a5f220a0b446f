//! Recording of the played stream to a WAV file
//!
//! The file is created (and its header written) when the session starts so
//! an unwritable path fails early. Chunks are accumulated in memory in the
//! order they were played and written out when the recording is finalized.
//! The session finalizes it after the playback worker has been joined (or
//! abandoned), so writing a long file is never cut short by the join deadline.
//!
//! The accumulator is not bounded: a long session holds every recorded
//! sample in memory until shutdown.

use bytes::Bytes;
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audio::buffer::AudioChunk;
use crate::error::RecordingError;
use crate::protocol::{CHANNELS, SAMPLE_WIDTH};

/// Accumulated audio beyond which a memory warning is logged once
const LONG_RECORDING_SECS: u64 = 3600;

/// Fixed container format for one session
pub fn wav_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: CHANNELS,
        sample_rate,
        bits_per_sample: (SAMPLE_WIDTH * 8) as u16,
        sample_format: SampleFormat::Int,
    }
}

/// In-memory chunk accumulator backed by an open WAV file
pub struct WavRecorder {
    path: PathBuf,
    spec: WavSpec,
    writer: Option<WavWriter<BufWriter<File>>>,
    chunks: Vec<Bytes>,
    accumulated_samples: u64,
    warned_long: bool,
}

impl WavRecorder {
    /// Create the output file for a session at `sample_rate`
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self, RecordingError> {
        let path = path.as_ref().to_path_buf();
        let spec = wav_spec(sample_rate);
        let writer = WavWriter::create(&path, spec).map_err(|source| RecordingError::Create {
            path: path.display().to_string(),
            source,
        })?;

        tracing::info!("Recording to {} ({} Hz, mono, 16-bit)", path.display(), sample_rate);

        Ok(Self {
            path,
            spec,
            writer: Some(writer),
            chunks: Vec::new(),
            accumulated_samples: 0,
            warned_long: false,
        })
    }

    /// Queue a played chunk for the file. Returns false once finalized.
    pub fn append(&mut self, chunk: &AudioChunk) -> bool {
        if self.is_finalized() {
            return false;
        }
        self.accumulated_samples += chunk.sample_count() as u64;
        self.chunks.push(chunk.pcm.clone());

        let long_recording = LONG_RECORDING_SECS * self.spec.sample_rate as u64;
        if !self.warned_long && self.accumulated_samples > long_recording {
            self.warned_long = true;
            tracing::warn!(
                "Recording holds over {} minutes of audio in memory ({} chunks)",
                LONG_RECORDING_SECS / 60,
                self.chunks.len()
            );
        }
        true
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn spec(&self) -> WavSpec {
        self.spec
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn sample_count(&self) -> u64 {
        self.accumulated_samples
    }

    pub fn is_finalized(&self) -> bool {
        self.writer.is_none()
    }

    /// Write every accumulated chunk in order and close the file.
    ///
    /// Only the first call does anything; later calls return an empty summary.
    pub fn finalize(&mut self) -> Result<RecordingSummary, RecordingError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(RecordingSummary::default());
        };

        let chunks = std::mem::take(&mut self.chunks);
        let mut frames = 0u64;
        for pcm in &chunks {
            for bytes in pcm.chunks_exact(SAMPLE_WIDTH) {
                writer
                    .write_sample(i16::from_le_bytes([bytes[0], bytes[1]]))
                    .map_err(RecordingError::Write)?;
                frames += 1;
            }
        }
        writer.finalize().map_err(RecordingError::Finalize)?;
        self.accumulated_samples = 0;

        tracing::info!(
            "Wrote {} chunks ({} frames) to {}",
            chunks.len(),
            frames,
            self.path.display()
        );

        Ok(RecordingSummary {
            chunks: chunks.len(),
            frames,
        })
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            tracing::error!("Failed to finalize {}: {}", self.path.display(), e);
        }
    }
}

/// Recorder shared between the playback worker and the session
pub type SharedRecorder = Arc<Mutex<WavRecorder>>;

/// Create a recorder wrapped for sharing
pub fn create_shared_recorder(
    path: impl AsRef<Path>,
    sample_rate: u32,
) -> Result<SharedRecorder, RecordingError> {
    Ok(Arc::new(Mutex::new(WavRecorder::create(path, sample_rate)?)))
}

/// What ended up in the file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingSummary {
    pub chunks: usize,
    pub frames: u64,
}
