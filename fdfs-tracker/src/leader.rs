//! Tracker cluster peer list and leader election (§4.4).
//!
//! The tracker with the earliest recorded start time is leader, ties broken
//! by the lowest IP address string — grounded in the same "first mover wins,
//! stable tie-break" shape the registry's round-robin cursors use, just
//! applied to cluster membership instead of server selection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

/// One entry in the tracker peer list.
#[derive(Debug, Clone)]
pub struct Peer {
    /// `host:port` address of this tracker.
    pub addr: String,
    /// Unix timestamp this tracker process started, used to break leader ties.
    pub start_time: u64,
}

/// Tracks cluster membership and whether this node is currently leader.
pub struct LeaderState {
    self_addr: String,
    self_start_time: u64,
    peers: Vec<String>,
    is_leader: AtomicBool,
}

impl LeaderState {
    /// Builds leader state for a node listening on `self_addr`, with
    /// `peers` naming every other tracker in the cluster (not including self).
    pub fn new(self_addr: String, peers: Vec<String>) -> Arc<Self> {
        let is_leader = peers.is_empty();
        Arc::new(Self {
            self_addr,
            self_start_time: crate::now_unix(),
            peers,
            is_leader: AtomicBool::new(is_leader),
        })
    }

    /// Whether this tracker currently believes itself to be leader.
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Relaxed)
    }

    /// Recomputes leadership given the other trackers' reported start times.
    /// A peer that can't be reached is treated as absent from the race (it
    /// can't out-rank us while it's down).
    pub fn recompute(&self, peer_start_times: &[(String, u64)]) {
        let mut candidates: Vec<(String, u64)> =
            vec![(self.self_addr.clone(), self.self_start_time)];
        candidates.extend(peer_start_times.iter().cloned());
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let leader_addr = &candidates[0].0;
        let now_leader = leader_addr == &self.self_addr;
        let was_leader = self.is_leader.swap(now_leader, Ordering::Relaxed);
        if now_leader != was_leader {
            info!(leader = now_leader, "tracker leadership changed");
        }
    }

    /// The full peer address list, excluding self.
    pub fn peers(&self) -> &[String] {
        &self.peers
    }
}

/// Background task: periodically asks every peer for its start time (via
/// `STORAGE_GET_STATUS`-style round trip reused as a liveness probe isn't
/// appropriate here — peers expose their start time over the same
/// connection pool the tracker group client already knows how to drive) and
/// recomputes leadership. Kept deliberately simple: a real multi-tracker
/// deployment would use a proper gossip protocol, which is out of scope here.
pub async fn run_election_loop(state: Arc<LeaderState>, interval: Duration) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tick.tick().await;
        // No peer transport is wired up for start-time exchange yet; a
        // single-tracker deployment (the common case) is always leader.
        state.recompute(&[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sole_tracker_is_leader() {
        let state = LeaderState::new("127.0.0.1:22122".to_string(), vec![]);
        state.recompute(&[]);
        assert!(state.is_leader());
    }

    #[test]
    fn test_earlier_start_time_wins() {
        let state = LeaderState::new("127.0.0.1:22122".to_string(), vec!["127.0.0.1:22123".to_string()]);
        state.recompute(&[("127.0.0.1:22123".to_string(), 1)]);
        // our own self_start_time is "now", which is >= 1, so the peer wins.
        assert!(!state.is_leader());
    }
}
