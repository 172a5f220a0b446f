//! Error types for the audio streaming application

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that abort startup before any worker is running
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Error::Network(NetworkError::BindFailed { .. })
                | Error::Audio(AudioError::DeviceNotFound(_))
                | Error::Audio(AudioError::StreamError(_))
                | Error::Audio(AudioError::UnsupportedFormat(_))
                | Error::Recording(RecordingError::Create { .. })
                | Error::Config(_)
        )
    }
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Device write timed out after {0} ms")]
    WriteTimeout(u64),

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

impl AudioError {
    /// Whether a failed write may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, AudioError::WriteTimeout(_) | AudioError::CpalError(_))
    }
}

/// Datagram framing errors. Always a discard signal, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Datagram too short: {len} bytes, header needs {required}")]
    TooShort { len: usize, required: usize },

    #[error("Datagram too long: {len} bytes, limit {max}")]
    TooLong { len: usize, max: usize },

    #[error("Odd payload length: {0} bytes")]
    OddPayload(usize),

    #[error("Empty payload")]
    EmptyPayload,

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid port: {0}")]
    InvalidPort(u32),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed after {errors} consecutive errors: {source}")]
    ReceiveFailed {
        errors: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Recording container errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to create {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: hound::Error,
    },

    #[error("Failed to write samples: {0}")]
    Write(hound::Error),

    #[error("Failed to finalize recording: {0}")]
    Finalize(hound::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
