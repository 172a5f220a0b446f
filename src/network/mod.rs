//! Network subsystem for UDP audio transport

pub mod udp;
pub mod sender;
pub mod receiver;

pub use udp::create_socket;
pub use sender::AudioSender;
pub use receiver::Receiver;
