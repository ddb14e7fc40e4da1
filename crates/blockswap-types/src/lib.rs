//! # blockswap-types
//!
//! Core data model for the blockswap block exchange:
//! - Content keys and the blocks they name
//! - Peer identifiers
//! - The reference-counted wantlist and its thread-safe variant

mod block;
mod key;
mod peer;
mod wantlist;

pub use block::Block;
pub use key::Key;
pub use peer::PeerId;
pub use wantlist::{ThreadSafeWantlist, Wantlist, WantlistEntry};
