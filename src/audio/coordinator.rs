//! Playback and recording coordinator
//!
//! Drains the hand-off buffer at the device's pace. Every drained chunk is
//! written to the output device and, when recording, appended to the
//! recorder in the same order. An empty poll is an underrun: nothing is
//! written and no silence is inserted, so chunks evicted upstream simply
//! vanish from both playback and recording.
//!
//! The coordinator releases the device when it exits. The recording is
//! shared with the session, which finalizes it after joining the worker.

use std::time::Duration;

use crate::audio::buffer::{AudioChunk, SharedHandoffBuffer};
use crate::audio::device::PlaybackDevice;
use crate::error::{AudioError, Error, Result};
use crate::recording::SharedRecorder;
use crate::session::RunFlag;

/// Playback statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub chunks_played: u64,
    pub samples_played: u64,
    pub underruns: u64,
    pub write_failures: u64,
    pub chunks_recorded: u64,
}

/// Final state reported when the coordinator exits
#[derive(Debug, Clone, Default)]
pub struct PlaybackReport {
    pub stats: PlaybackStats,
}

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Played,
    /// Drained, but the device rejected the write
    WriteFailed,
    Underrun,
}

/// Drives the output device and recorder from the hand-off buffer
pub struct Coordinator<D: PlaybackDevice> {
    buffer: SharedHandoffBuffer,
    device: D,
    recorder: Option<SharedRecorder>,
    running: RunFlag,
    poll_timeout: Duration,
    stats: PlaybackStats,
    write_failure_streak: u32,
    starved: bool,
}

impl<D: PlaybackDevice> Coordinator<D> {
    pub fn new(
        buffer: SharedHandoffBuffer,
        device: D,
        recorder: Option<SharedRecorder>,
        running: RunFlag,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            buffer,
            device,
            recorder,
            running,
            poll_timeout,
            stats: PlaybackStats::default(),
            write_failure_streak: 0,
            starved: false,
        }
    }

    /// Run the playback loop until the run flag clears or the device is
    /// lost, then release the device.
    pub fn run(mut self) -> Result<PlaybackReport> {
        let outcome = self.playback_loop();
        if let Err(e) = &outcome {
            tracing::error!("Playback stopping: {}", e);
        }
        let report = self.finish();
        outcome.map_err(Error::from)?;
        Ok(report)
    }

    fn playback_loop(&mut self) -> std::result::Result<(), AudioError> {
        while self.running.is_running() {
            self.step()?;
        }
        Ok(())
    }

    /// One bounded wait for a chunk, then play and record it.
    ///
    /// Transient device errors are counted and the loop carries on;
    /// anything else is returned and ends playback.
    pub fn step(&mut self) -> std::result::Result<Step, AudioError> {
        let Some(chunk) = self.buffer.pop_timeout(self.poll_timeout) else {
            self.stats.underruns += 1;
            if !self.starved {
                self.starved = true;
                tracing::debug!("Playback starved, waiting for audio");
            }
            return Ok(Step::Underrun);
        };
        if self.starved {
            self.starved = false;
            tracing::debug!("Playback resumed");
        }

        let written = self.device.write(&chunk.pcm);
        self.record(&chunk);

        match written {
            Ok(()) => {
                self.write_failure_streak = 0;
                self.stats.chunks_played += 1;
                self.stats.samples_played += chunk.sample_count() as u64;
                Ok(Step::Played)
            }
            Err(e) if e.is_transient() => {
                self.stats.write_failures += 1;
                self.write_failure_streak += 1;
                if self.write_failure_streak == 1 {
                    tracing::warn!("Audio playback error: {}", e);
                } else {
                    tracing::debug!(
                        "Audio playback error ({} in a row): {}",
                        self.write_failure_streak,
                        e
                    );
                }
                Ok(Step::WriteFailed)
            }
            Err(e) => {
                self.stats.write_failures += 1;
                Err(e)
            }
        }
    }

    fn record(&mut self, chunk: &AudioChunk) {
        if let Some(recorder) = &self.recorder {
            if recorder.lock().append(chunk) {
                self.stats.chunks_recorded += 1;
            }
        }
    }

    /// Stop and release the device
    pub fn finish(&mut self) -> PlaybackReport {
        self.device.close();
        self.recorder = None;

        PlaybackReport {
            stats: self.stats.clone(),
        }
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}
