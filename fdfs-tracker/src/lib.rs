//! Tracker node: storage server scheduling, group membership, and cluster
//! leader election (§4.4).
//!
//! The client crate only ever consumed a tracker; this crate is what answers
//! it. Grounded throughout in the teacher client's conventions — plain
//! structs with builder methods for config, `thiserror`-backed errors from
//! `fdfs-core`, `tracing` for structured logs — generalized to a server that
//! owns state instead of a client that queries it.

pub mod config;
pub mod leader;
pub mod persistence;
pub mod registry;
pub mod selection;
pub mod server;
pub mod state_machine;

pub use config::TrackerConfig;
pub use registry::{Group, GroupRegistry, StorageServer};
pub use selection::SelectionPolicy;
pub use server::{run, TrackerState};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds, used for heartbeat staleness,
/// changelog entries, and `state_since` bookkeeping.
pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
