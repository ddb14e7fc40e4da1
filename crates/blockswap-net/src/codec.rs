//! Framing codec for exchange messages.
//!
//! Frame layout:
//!
//! ```text
//! +----------+----------+----------+
//! |  Magic   |  Length  | Checksum |
//! | 4 bytes  | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+
//! |   Payload (Length bytes)       |
//! +--------------------------------+
//! ```
//!
//! - Magic: wire magic bytes
//! - Length: payload length in bytes (big-endian)
//! - Checksum: first 4 bytes of Blake2b256(payload)
//! - Payload: the protobuf-encoded [`BlockMessage`]

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{BlockMessage, NetworkError, MAX_MESSAGE_SIZE, WIRE_MAGIC};

/// Header size: magic (4) + length (4) + checksum (4) = 12 bytes
const HEADER_SIZE: usize = 12;

/// Codec turning a byte stream into exchange messages.
pub struct MessageCodec {
    magic: [u8; 4],
    max_size: usize,
}

impl MessageCodec {
    /// Create a codec with the default wire magic.
    pub fn new() -> Self {
        Self {
            magic: WIRE_MAGIC,
            max_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Create a codec with custom magic bytes.
    pub fn with_magic(magic: [u8; 4]) -> Self {
        Self {
            magic,
            max_size: MAX_MESSAGE_SIZE,
        }
    }

    /// First 4 bytes of Blake2b256(payload).
    fn checksum(payload: &[u8]) -> [u8; 4] {
        let hash = Blake2b::<U32>::digest(payload);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&hash[0..4]);
        checksum
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = BlockMessage;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let magic = &src[0..4];
        if magic != self.magic {
            return Err(NetworkError::InvalidMessage(format!(
                "Invalid magic: expected {:?}, got {:?}",
                self.magic, magic
            )));
        }

        let length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        let checksum: [u8; 4] = [src[8], src[9], src[10], src[11]];

        if length > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        let total_size = HEADER_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();

        if Self::checksum(&payload) != checksum {
            return Err(NetworkError::InvalidMessage(
                "Checksum mismatch".to_string(),
            ));
        }

        BlockMessage::from_bytes(payload).map(Some)
    }
}

impl Encoder<BlockMessage> for MessageCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: BlockMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.to_bytes();
        if payload.len() > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: payload.len(),
                max: self.max_size,
            });
        }

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_slice(&self.magic);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&Self::checksum(&payload));
        dst.put_slice(&payload);
        Ok(())
    }
}
