//! Tracker node supervisor: loads the registry, starts the accept loop, and
//! spawns the liveness checker and leader election background tasks.

use std::sync::Arc;

use tracing::info;

use fdfs_tracker::config::TrackerConfig;
use fdfs_tracker::leader::{run_election_loop, LeaderState};
use fdfs_tracker::registry::GroupRegistry;
use fdfs_tracker::selection::SelectionPolicy;
use fdfs_tracker::server::{run, TrackerState};
use fdfs_tracker::state_machine::run_liveness_checker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let bind_addr = std::env::var("FDFS_TRACKER_BIND").unwrap_or_else(|_| "0.0.0.0:22122".to_string());
    let data_dir = std::env::var("FDFS_TRACKER_DATA_DIR").unwrap_or_else(|_| "./data/tracker".to_string());
    let peer_addrs: Vec<String> = std::env::var("FDFS_TRACKER_PEERS")
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    let config = TrackerConfig::new(bind_addr.clone(), peer_addrs.clone()).with_data_dir(data_dir);

    let registry = GroupRegistry::load(&config.data_dir).await?;
    let selection = Arc::new(SelectionPolicy::new());
    let leader_state = LeaderState::new(bind_addr, peer_addrs);

    info!(data_dir = %config.data_dir, "tracker starting");

    let liveness_registry = registry.clone();
    let liveness_selection = selection.clone();
    let check_interval = config.check_active_interval;
    tokio::spawn(async move {
        run_liveness_checker(liveness_registry, liveness_selection, check_interval, 90, 300).await;
    });

    let election_interval = config.election_interval;
    tokio::spawn(async move {
        run_election_loop(leader_state, election_interval).await;
    });

    let state = Arc::new(TrackerState { config, registry, selection });
    run(state).await?;
    Ok(())
}
