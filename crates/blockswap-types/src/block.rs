//! Blocks of opaque data.

use crate::Key;

/// A content-addressed block: a key and the bytes it names.
///
/// Immutable once constructed. `new` derives the key from the data;
/// `with_key` trusts the caller and is used on the wire-decode path where
/// the sender already committed to a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    key: Key,
    data: Vec<u8>,
}

impl Block {
    /// Create a block, deriving its canonical key from `data`.
    pub fn new(data: Vec<u8>) -> Self {
        let key = Key::for_data(&data);
        Self { key, data }
    }

    /// Create a block with an explicit key.
    pub fn with_key(key: Key, data: Vec<u8>) -> Self {
        Self { key, data }
    }

    /// The block's key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The block's bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the block's bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-length block.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check that the key matches the data.
    pub fn verify(&self) -> bool {
        Key::for_data(&self.data) == self.key
    }

    /// Consume the block, returning its bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_key() {
        let block = Block::new(b"block".to_vec());
        assert_eq!(block.key(), &Key::for_data(b"block"));
        assert!(block.verify());
        assert_eq!(block.len(), 5);
    }

    #[test]
    fn test_with_key_is_trusted() {
        let block = Block::with_key(Key::from_bytes(vec![1, 2, 3]), b"data".to_vec());
        assert!(!block.verify());
        assert_eq!(block.data(), b"data");
    }
}
