//! Datagram framing
//!
//! Stateless conversion between sample blocks and UDP datagrams in either
//! headered or headerless layout.

pub mod encoder;
pub mod decoder;

pub use encoder::{encode, encode_headerless, PacketEncoder};
pub use decoder::{decode, PacketDecoder};
