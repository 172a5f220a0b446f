//! Application configuration
//!
//! Values come from defaults, then an optional TOML file, then command-line
//! overrides applied by the binaries.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::Framing;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub stream: StreamConfig,
    pub recording: RecordingConfig,
    pub session: SessionConfig,
}

/// UDP reception settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Port bound on the wildcard address
    pub udp_port: u16,
    /// Bounded wait of each receive call
    pub poll_timeout_ms: u64,
    /// Kernel receive buffer size request, if any
    pub recv_buffer_size: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            udp_port: DEFAULT_UDP_PORT,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            recv_buffer_size: None,
        }
    }
}

impl NetworkConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Playback settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Hand-off buffer capacity in chunks
    pub buffer_capacity: usize,
    /// Output device id (`output:<name>`); default device when unset
    pub output_device: Option<String>,
    /// Play nothing, only record
    pub mute: bool,
    pub device_write_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            output_device: None,
            mute: false,
            device_write_timeout_ms: DEFAULT_DEVICE_WRITE_TIMEOUT_MS,
        }
    }
}

impl AudioConfig {
    pub fn device_write_timeout(&self) -> Duration {
        Duration::from_millis(self.device_write_timeout_ms)
    }
}

/// Wire format settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub framing: Framing,
    /// Treat datagrams without samples as valid (empty chunks)
    pub allow_empty: bool,
}

/// Recording settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordingConfig {
    /// WAV file to write; recording is off when unset
    pub output_path: Option<PathBuf>,
}

impl RecordingConfig {
    pub fn enabled(&self) -> bool {
        self.output_path.is_some()
    }
}

/// Lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Longest wait for each worker to exit during shutdown
    pub join_timeout_ms: u64,
    /// Interval between periodic statistics lines
    pub stats_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

impl SessionConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

impl AppConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Load from `path` if given, else from the default location if a file
    /// exists there, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => {
                    tracing::debug!("Loading configuration from {}", path.display());
                    Self::load(&path)
                }
                _ => Ok(Self::default()),
            },
        }
    }

    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "udp-pcm-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject values the core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.network.udp_port == 0 {
            return Err(Error::Config("port must be between 1 and 65535".into()));
        }
        if self.network.poll_timeout_ms == 0 {
            return Err(Error::Config("poll timeout must be positive".into()));
        }
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("sample rate must be positive".into()));
        }
        if self.audio.buffer_capacity == 0 {
            return Err(Error::Config("buffer capacity must be positive".into()));
        }
        if self.audio.device_write_timeout_ms == 0 {
            return Err(Error::Config("device write timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Validate a user-supplied port number
pub fn parse_port(value: u32) -> Result<u16> {
    match u16::try_from(value) {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(Error::Config(format!(
            "port must be between 1 and 65535, got {}",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.network.udp_port, 5000);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.buffer_capacity, 100);
        assert_eq!(config.network.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.stream.framing, Framing::Headered);
        assert!(!config.recording.enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [network]
            udp_port = 9000

            [stream]
            framing = "headerless"

            [recording]
            output_path = "out.wav"
            "#,
        )
        .unwrap();

        assert_eq!(config.network.udp_port, 9000);
        assert_eq!(config.network.poll_timeout_ms, 1000);
        assert_eq!(config.stream.framing, Framing::Headerless);
        assert_eq!(config.recording.output_path, Some(PathBuf::from("out.wav")));
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = AppConfig::default();
        config.audio.output_device = Some("output:Speakers".into());
        config.session.join_timeout_ms = 500;

        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = AppConfig::default();
        config.network.udp_port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.buffer_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_port_range() {
        assert_eq!(parse_port(1).unwrap(), 1);
        assert_eq!(parse_port(65535).unwrap(), 65535);
        assert!(parse_port(0).is_err());
        assert!(parse_port(65536).is_err());
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        assert!(matches!(
            AppConfig::from_toml("[network]\nudp_port = \"x\""),
            Err(Error::Config(_))
        ));
    }
}
