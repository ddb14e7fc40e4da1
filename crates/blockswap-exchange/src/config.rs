//! Exchange configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default period between full-wantlist rebroadcasts.
pub const DEFAULT_REBROADCAST_INTERVAL: Duration = Duration::from_secs(30);

/// Default window for connect + handshake when a peer queue dials out. This
/// includes any lookup the transport performs before dialing.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default capacity of the provide announcement queue.
pub const DEFAULT_PROVIDE_BUFFER: usize = 4096;

/// Tunables for the exchange core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Period between full-wantlist rebroadcasts.
    pub rebroadcast_interval: Duration,
    /// Window allowed for connect + handshake when a peer queue dials out.
    pub connect_timeout: Duration,
    /// Capacity of the provide announcement queue; overflow is dropped.
    pub provide_buffer: usize,
    /// Number of workers draining the provide queue.
    pub provide_workers: usize,
    /// Number of workers draining the decision engine outbox.
    pub task_workers: usize,
    /// Maximum providers requested per routing query.
    pub provider_search_max: usize,
    /// How many keys of a request trigger a provider search.
    pub provider_search_keys: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rebroadcast_interval: DEFAULT_REBROADCAST_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            provide_buffer: DEFAULT_PROVIDE_BUFFER,
            provide_workers: 4,
            task_workers: 4,
            provider_search_max: 10,
            provider_search_keys: 3,
        }
    }
}

impl ExchangeConfig {
    /// Config with a custom rebroadcast period, for tests and tuning.
    pub fn with_rebroadcast_interval(interval: Duration) -> Self {
        Self {
            rebroadcast_interval: interval,
            ..Self::default()
        }
    }
}
