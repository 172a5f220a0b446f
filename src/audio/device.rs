//! Output device abstraction and enumeration

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;

/// Push-style sink for little-endian signed 16-bit mono PCM
///
/// Implementations may buffer a small amount internally and block briefly
/// in [`write`](PlaybackDevice::write) while that buffer is full. A write
/// either accepts the whole slice or none of it.
pub trait PlaybackDevice: Send {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError>;

    /// Stop output and release the underlying device
    fn close(&mut self);
}

impl<D: PlaybackDevice + ?Sized> PlaybackDevice for Box<D> {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        (**self).write(pcm)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Device that accepts and discards everything, for headless recording
#[derive(Debug, Default)]
pub struct NullDevice {
    bytes_written: u64,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl PlaybackDevice for NullDevice {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.bytes_written += pcm.len() as u64;
        Ok(())
    }

    fn close(&mut self) {}
}

/// Summary of an output device
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
        }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Get default output config
    pub fn default_output_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        self.inner
            .default_output_config()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))
    }

    /// Whether the device can play `sample_rate` with some channel count
    pub fn supports_rate(&self, sample_rate: u32) -> bool {
        let rate = cpal::SampleRate(sample_rate);
        self.inner
            .supported_output_configs()
            .map(|mut configs| {
                configs.any(|c| rate >= c.min_sample_rate() && rate <= c.max_sample_rate())
            })
            .unwrap_or(false)
    }
}

/// List available output devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_output_name = host
        .default_output_device()
        .and_then(|d| d.name().ok());

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device);
                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    is_default: default_output_name.as_ref() == Some(&name),
                    name,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

/// Get device capabilities
fn get_device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate_val in [8000u32, 16000, 22050, 44100, 48000, 96000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !sample_rates.contains(&rate_val)
                {
                    sample_rates.push(rate_val);
                }
            }

            let ch = config.channels();
            if !channels.contains(&ch) {
                channels.push(ch);
            }
        }
    }

    sample_rates.sort();
    channels.sort();

    (sample_rates, channels)
}

/// Get an output device by its ID (`output:<name>` or a bare name)
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let name = id.strip_prefix("output:").unwrap_or(id);

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == name {
                return Ok(AudioDevice::from_cpal(device));
            }
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Get default output device
pub fn get_default_output_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_output_device()
        .map(AudioDevice::from_cpal)
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}
