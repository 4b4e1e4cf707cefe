//! Tracker configuration.
//!
//! Shaped like the client's `ClientConfig` (teacher's `types.rs`): a plain
//! struct with a `Default` impl and `with_*` builder methods, rather than a
//! config-file parser, since the client never needed one either.

use std::time::Duration;

/// Runtime configuration for a tracker node.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Address this tracker listens on, e.g. `"0.0.0.0:22122"`.
    pub bind_addr: String,
    /// Addresses of every tracker in the cluster, including this one, used
    /// for peer gossip and leader election (§4.4).
    pub peer_addrs: Vec<String>,
    /// Directory holding the registry snapshot and changelog files.
    pub data_dir: String,
    /// Largest request body this tracker will accept (§4.1).
    pub max_pkg_size: u64,
    /// Network I/O timeout in milliseconds.
    pub network_timeout_ms: u64,
    /// How often a storage server must heartbeat before it's marked OFFLINE.
    pub check_active_interval: Duration,
    /// How often the leader election loop re-evaluates leadership.
    pub election_interval: Duration,
    /// Maximum pooled connections per peer tracker.
    pub max_conns: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", fdfs_core::types::TRACKER_DEFAULT_PORT),
            peer_addrs: Vec::new(),
            data_dir: "./data/tracker".to_string(),
            max_pkg_size: 128 * 1024 * 1024,
            network_timeout_ms: 30_000,
            check_active_interval: Duration::from_secs(30),
            election_interval: Duration::from_secs(10),
            max_conns: 32,
        }
    }
}

impl TrackerConfig {
    /// Starts from defaults with the given bind address and peer list.
    pub fn new(bind_addr: String, peer_addrs: Vec<String>) -> Self {
        Self { bind_addr, peer_addrs, ..Default::default() }
    }

    /// Sets the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<String>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Sets the heartbeat staleness window.
    pub fn with_check_active_interval(mut self, interval: Duration) -> Self {
        self.check_active_interval = interval;
        self
    }
}
