//! # blockswap-exchange
//!
//! The block-exchange core of a content-addressed peer-to-peer storage
//! node: given keys a local process wants and blocks the local node holds,
//! it exchanges opaque binary blocks with remote peers over a
//! message-oriented transport.
//!
//! Components:
//! - [`Notifications`]: wakes local readers when a wanted block arrives
//! - [`Ledger`]: per-peer accounting of bytes exchanged
//! - [`Engine`]: decides which held blocks to send to which peer
//! - Per-peer message queues that serialize outbound wantlist traffic
//! - [`WantManager`]: owns the outbound wantlist and the peer queues
//! - [`Exchange`]: the driver tying everything to the transport seams

mod config;
mod context;
mod engine;
mod error;
mod exchange;
mod ledger;
mod msgqueue;
mod notifications;
mod stat;
mod wantmanager;

pub use config::{
    ExchangeConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PROVIDE_BUFFER, DEFAULT_REBROADCAST_INTERVAL,
};
pub use context::RequestContext;
pub use engine::{Engine, Envelope};
pub use error::{ExchangeError, ExchangeResult};
pub use exchange::Exchange;
pub use ledger::{Ledger, Receipt};
pub use notifications::Notifications;
pub use stat::Stat;
pub use wantmanager::WantManager;

/// Priority assigned to the first key of a local request; later keys count
/// down from here.
pub const MAX_PRIORITY: i32 = i32::MAX;
