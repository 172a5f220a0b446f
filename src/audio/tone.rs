//! Sine-wave sample source for exercising the receive path

use std::f64::consts::TAU;

/// Default tone amplitude as a fraction of full scale
pub const DEFAULT_AMPLITUDE: f64 = 0.3;

/// Continuous sine generator producing signed 16-bit mono samples
///
/// Phase is tracked by absolute sample index, so consecutive blocks join
/// without discontinuities.
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    frequency: f64,
    sample_rate: u32,
    amplitude: f64,
    position: u64,
}

impl ToneGenerator {
    pub fn new(frequency: f64, sample_rate: u32) -> Self {
        Self {
            frequency,
            sample_rate,
            amplitude: DEFAULT_AMPLITUDE,
            position: 0,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Produce the next `count` samples
    pub fn next_block(&mut self, count: usize) -> Vec<i16> {
        let mut samples = Vec::with_capacity(count);
        for _ in 0..count {
            let t = self.position as f64 / self.sample_rate as f64;
            let value = self.amplitude * (TAU * self.frequency * t).sin();
            let scaled = (value * i16::MAX as f64) as i64;
            samples.push(scaled.clamp(i16::MIN as i64, i16::MAX as i64) as i16);
            self.position += 1;
        }
        samples
    }

    /// Samples generated so far
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Samples in one packet of `duration_ms` at `sample_rate`
pub fn samples_per_packet(sample_rate: u32, duration_ms: f64) -> usize {
    (sample_rate as f64 * duration_ms / 1000.0) as usize
}
