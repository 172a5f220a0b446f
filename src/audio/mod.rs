//! Audio subsystem module

pub mod buffer;
pub mod coordinator;
pub mod device;
pub mod playback;
pub mod tone;

pub use buffer::{AudioChunk, HandoffBuffer, SharedHandoffBuffer};
pub use coordinator::Coordinator;
pub use device::{list_devices, get_device_by_id, AudioDevice, NullDevice, PlaybackDevice};
pub use playback::CpalPlayback;
pub use tone::ToneGenerator;
