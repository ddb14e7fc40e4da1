//! Peer identifiers.

use serde::{Deserialize, Serialize};

/// Unique identifier for a remote participant.
///
/// Opaque bytes; equality is byte equality. The transport layer decides what
/// the bytes mean (address, public key hash, ...).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub Vec<u8>);

impl PeerId {
    /// Create from bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_equality() {
        let a = PeerId::from_bytes(vec![1, 2, 3]);
        let b = PeerId::from_bytes(vec![1, 2, 3]);
        let c = PeerId::from_bytes(vec![4]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(format!("{}", a), "010203");
    }
}
