//! Storage node configuration.
//!
//! Same shape as [`fdfs_tracker::config::TrackerConfig`]: a plain struct with
//! a `Default` impl and builder methods, no config-file parser.

use std::time::Duration;

/// Runtime configuration for a storage node.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Address this storage node listens on, e.g. `"0.0.0.0:23000"`.
    pub bind_addr: String,
    /// Addresses of every tracker this node reports to.
    pub tracker_addrs: Vec<String>,
    /// Group this storage node belongs to.
    pub group_name: String,
    /// Cluster-wide unique storage id.
    pub storage_id: String,
    /// Store path roots; index 0 is used until multi-path support is added.
    pub store_paths: Vec<String>,
    /// Directory holding binlogs, mark files, and trunk metadata.
    pub data_dir: String,
    /// Largest request body this node will accept (§4.1).
    pub max_pkg_size: u64,
    /// Network I/O timeout in milliseconds.
    pub network_timeout_ms: u64,
    /// Heartbeat interval to trackers.
    pub heartbeat_interval: Duration,
    /// Sync engine's active-test ping interval when idle (§4.5).
    pub heart_beat_interval: Duration,
    /// Preread buffer size for the sync engine (§4.5).
    pub sync_buffer_size: usize,
    /// Minimum size of a tracked free trunk block (§4.6).
    pub slot_min_size: u32,
    /// Allocation alignment for trunk slots; 0 disables rounding.
    pub alloc_alignment: u32,
    /// Size of a freshly created trunk container file (§4.7).
    pub trunk_file_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", fdfs_core::types::STORAGE_DEFAULT_PORT),
            tracker_addrs: Vec::new(),
            group_name: "group1".to_string(),
            storage_id: String::new(),
            store_paths: vec!["./data/storage".to_string()],
            data_dir: "./data/storage/meta".to_string(),
            max_pkg_size: 128 * 1024 * 1024,
            network_timeout_ms: 30_000,
            heartbeat_interval: Duration::from_secs(30),
            heart_beat_interval: Duration::from_secs(15),
            sync_buffer_size: 256 * 1024,
            slot_min_size: fdfs_core::types::DEFAULT_SLOT_MIN_SIZE,
            alloc_alignment: 256,
            trunk_file_size: fdfs_core::types::DEFAULT_TRUNK_FILE_SIZE,
        }
    }
}

impl StorageConfig {
    /// Starts from defaults with the given identity and tracker list.
    pub fn new(bind_addr: String, group_name: String, storage_id: String, tracker_addrs: Vec<String>) -> Self {
        Self { bind_addr, group_name, storage_id, tracker_addrs, ..Default::default() }
    }

    /// Sets the store path roots.
    pub fn with_store_paths(mut self, paths: Vec<String>) -> Self {
        self.store_paths = paths;
        self
    }

    /// Sets the metadata directory.
    pub fn with_data_dir(mut self, dir: impl Into<String>) -> Self {
        self.data_dir = dir.into();
        self
    }
}
