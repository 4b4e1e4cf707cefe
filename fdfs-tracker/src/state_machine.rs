//! Storage server lifecycle transitions (§4.4).
//!
//! `NONE -> INIT -> WAIT_SYNC -> SYNCING -> ACTIVE`, with `OFFLINE`/`ONLINE`
//! bouncing on heartbeat loss/recovery, `IP_CHANGED` branching off for an
//! admin-confirm path, and `DELETED` terminal. Grounded in the registry's
//! status field (`StorageStatus`, `fdfs-core/src/types.rs`) plus the teacher
//! client's state enum, which only modeled the wire values — this module is
//! what actually drives transitions between them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use fdfs_core::errors::Result;
use fdfs_core::types::StorageStatus;

use crate::registry::GroupRegistry;
use crate::selection::SelectionPolicy;

/// True if `from -> to` is a transition this tracker will perform.
pub fn is_valid_transition(from: StorageStatus, to: StorageStatus) -> bool {
    use StorageStatus::*;
    matches!(
        (from, to),
        (None, Init)
            | (Init, WaitSync)
            | (Init, Active) // sole member of a fresh group skips sync entirely
            | (WaitSync, Syncing)
            | (Syncing, Online)
            | (Online, Active)
            | (Syncing, WaitSync) // timeout fallback, re-pick a sync source
            | (Active, Offline)
            | (Online, Offline)
            | (Offline, Online)
            | (Offline, Active)
            | (_, IpChanged)
            | (IpChanged, Init)
            | (_, Deleted)
    )
}

/// Assigns a newly INIT'd storage server a sync source and advances it to
/// `WAIT_SYNC`, or straight to `ACTIVE` if it's the first member of its
/// group (§4.4 "a lone member serves immediately").
pub async fn assign_sync_source(registry: &Arc<GroupRegistry>, storage_id: &str) -> Result<()> {
    let server = match registry.get_storage(storage_id).await {
        Some(s) => s,
        None => return Ok(()),
    };
    let peers: Vec<_> = registry
        .list_storage(&server.group_name)
        .await
        .into_iter()
        .filter(|s| s.storage_id != storage_id && !matches!(s.status, StorageStatus::Deleted))
        .collect();

    if peers.is_empty() {
        info!(storage_id, "lone group member, promoting directly to ACTIVE");
        registry.set_status(storage_id, StorageStatus::Active).await?;
        return Ok(());
    }

    let source = peers
        .iter()
        .find(|s| matches!(s.status, StorageStatus::Active))
        .or_else(|| peers.first())
        .unwrap();
    registry.set_sync_src(storage_id, Some(source.storage_id.clone())).await?;
    registry.set_status(storage_id, StorageStatus::WaitSync).await?;
    Ok(())
}

/// Background task: periodically marks stale storage servers OFFLINE and
/// reverts any `SYNCING` member stuck past `sync_timeout` back to
/// `WAIT_SYNC` with a freshly picked sync source (§10.4 open question:
/// the spec doesn't say what happens to a sync that never finishes).
pub async fn run_liveness_checker(
    registry: Arc<GroupRegistry>,
    _selection: Arc<SelectionPolicy>,
    check_interval: Duration,
    heartbeat_timeout_secs: u64,
    sync_timeout_secs: u64,
) {
    let mut tick = tokio::time::interval(check_interval);
    loop {
        tick.tick().await;
        let now = crate::now_unix();

        let offline = registry.sweep_offline(now, heartbeat_timeout_secs).await;
        if !offline.is_empty() {
            warn!(?offline, "storage servers marked OFFLINE after heartbeat timeout");
        }

        for group in registry.list_groups().await {
            for server in registry.list_storage(&group.name).await {
                if server.status == StorageStatus::Syncing
                    && now.saturating_sub(server.state_since) > sync_timeout_secs
                {
                    warn!(storage_id = %server.storage_id, "sync timed out, reverting to WAIT_SYNC");
                    if let Err(e) = registry.set_status(&server.storage_id, StorageStatus::WaitSync).await {
                        warn!(error = %e, "failed to revert stuck sync");
                        continue;
                    }
                    let _ = assign_sync_source(&registry, &server.storage_id).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(is_valid_transition(StorageStatus::None, StorageStatus::Init));
        assert!(is_valid_transition(StorageStatus::WaitSync, StorageStatus::Syncing));
        assert!(is_valid_transition(StorageStatus::Syncing, StorageStatus::Online));
        assert!(is_valid_transition(StorageStatus::Online, StorageStatus::Active));
        assert!(is_valid_transition(StorageStatus::Active, StorageStatus::Offline));
        assert!(is_valid_transition(StorageStatus::Offline, StorageStatus::Online));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(is_valid_transition(StorageStatus::Init, StorageStatus::Active));
        assert!(!is_valid_transition(StorageStatus::Deleted, StorageStatus::Active));
        assert!(!is_valid_transition(StorageStatus::WaitSync, StorageStatus::Active));
    }

    #[tokio::test]
    async fn test_assign_sync_source_lone_member_goes_active() {
        let dir = tempfile::tempdir().unwrap();
        let registry = GroupRegistry::load(dir.path()).await.unwrap();
        registry
            .register(crate::registry::StorageServer {
                storage_id: "s1".to_string(),
                group_name: "group1".to_string(),
                ip_addr: "127.0.0.1".to_string(),
                port: 23000,
                store_path_count: 1,
                status: StorageStatus::Init,
                join_time: 0,
                last_heartbeat: 0,
                state_since: 0,
                sync_src: None,
                total_disk_bytes: 0,
                free_disk_bytes: 0,
            })
            .await
            .unwrap();

        assign_sync_source(&registry, "s1").await.unwrap();
        assert_eq!(registry.get_storage("s1").await.unwrap().status, StorageStatus::Active);
    }
}
