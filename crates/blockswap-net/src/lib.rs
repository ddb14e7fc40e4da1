//! # blockswap-net
//!
//! Networking surface of the blockswap exchange:
//! - The wire message ([`BlockMessage`]) and its protobuf payload
//! - A length-delimited framing codec with checksums
//! - The [`Network`], [`Routing`] and [`MessageReceiver`] seams between the
//!   exchange core and a concrete transport
//! - An in-process virtual network for tests

mod codec;
mod error;
mod message;
mod network;
mod pb;
pub mod testnet;

pub use codec::MessageCodec;
pub use error::{NetworkError, NetworkResult};
pub use message::{BlockMessage, WantEntry};
pub use network::{MessageReceiver, MessageSender, Network, Routing};

/// Maximum framed message size.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024; // 10 MB

/// Frame magic bytes.
pub const WIRE_MAGIC: [u8; 4] = [0x62, 0x73, 0x77, 0x01]; // "bsw" + version
