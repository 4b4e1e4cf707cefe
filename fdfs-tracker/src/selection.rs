//! Storage server selection policy for uploads (§4.4 "Scheduling").
//!
//! Round-robin across groups, then round-robin across ACTIVE members within
//! the chosen group — the same two-level round-robin shape the teacher
//! client expected a tracker to implement, just actually implemented here
//! instead of assumed.

use std::sync::atomic::{AtomicUsize, Ordering};

use fdfs_core::errors::{CoreError, Result};
use fdfs_core::types::StorageStatus;

use crate::registry::{Group, GroupRegistry, StorageServer};

/// Picks which group and storage server a new upload should land on.
pub struct SelectionPolicy {
    group_cursor: AtomicUsize,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy {
    /// Creates a fresh round-robin cursor.
    pub fn new() -> Self {
        Self { group_cursor: AtomicUsize::new(0) }
    }

    /// Picks a storage server to receive a new upload, optionally
    /// constrained to a specific group.
    pub async fn pick_for_upload(
        &self,
        registry: &GroupRegistry,
        group_name: Option<&str>,
    ) -> Result<StorageServer> {
        let group = match group_name {
            Some(name) => registry.get_group(name).await.ok_or_else(|| CoreError::GroupNotFound(name.to_string()))?,
            None => self.pick_group(registry).await?,
        };
        self.pick_active_member(registry, &group).await
    }

    async fn pick_group(&self, registry: &GroupRegistry) -> Result<Group> {
        let mut groups = registry.list_groups().await;
        groups.retain(|g| !g.storage_ids.is_empty());
        if groups.is_empty() {
            return Err(CoreError::NoStorageServer);
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        let idx = self.group_cursor.fetch_add(1, Ordering::Relaxed) % groups.len();
        Ok(groups[idx].clone())
    }

    async fn pick_active_member(&self, registry: &GroupRegistry, group: &Group) -> Result<StorageServer> {
        let mut members = registry.list_storage(&group.name).await;
        members.retain(|s| matches!(s.status, StorageStatus::Active));
        if members.is_empty() {
            return Err(CoreError::NoStorageServer);
        }
        members.sort_by(|a, b| a.storage_id.cmp(&b.storage_id));
        let idx = self.group_cursor.fetch_add(1, Ordering::Relaxed) % members.len();
        Ok(members[idx].clone())
    }

    /// Picks any reachable member of `group_name` to serve a read (download,
    /// metadata, file info) — ONLINE members may also serve reads even
    /// though they can't yet take writes (§4.4).
    pub async fn pick_for_read(&self, registry: &GroupRegistry, group_name: &str) -> Result<StorageServer> {
        let mut members = registry.list_storage(group_name).await;
        members.retain(|s| matches!(s.status, StorageStatus::Active | StorageStatus::Online));
        if members.is_empty() {
            return Err(CoreError::StorageNotFound(format!("no reachable member of {group_name}")));
        }
        members.sort_by(|a, b| a.storage_id.cmp(&b.storage_id));
        let idx = self.group_cursor.fetch_add(1, Ordering::Relaxed) % members.len();
        Ok(members[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StorageServer as RegServer;
    use tempfile::tempdir;

    fn sample(id: &str, group: &str, status: StorageStatus) -> RegServer {
        RegServer {
            storage_id: id.to_string(),
            group_name: group.to_string(),
            ip_addr: "127.0.0.1".to_string(),
            port: 23000,
            store_path_count: 1,
            status,
            join_time: 0,
            last_heartbeat: 0,
            state_since: 0,
            sync_src: None,
            total_disk_bytes: 0,
            free_disk_bytes: 0,
        }
    }

    #[tokio::test]
    async fn test_pick_for_upload_skips_non_active() {
        let dir = tempdir().unwrap();
        let registry = GroupRegistry::load(dir.path()).await.unwrap();
        registry.register(sample("s1", "group1", StorageStatus::Init)).await.unwrap();
        registry.register(sample("s2", "group1", StorageStatus::Active)).await.unwrap();

        let policy = SelectionPolicy::new();
        let picked = policy.pick_for_upload(&registry, Some("group1")).await.unwrap();
        assert_eq!(picked.storage_id, "s2");
    }

    #[tokio::test]
    async fn test_pick_for_upload_no_active_fails() {
        let dir = tempdir().unwrap();
        let registry = GroupRegistry::load(dir.path()).await.unwrap();
        registry.register(sample("s1", "group1", StorageStatus::Init)).await.unwrap();

        let policy = SelectionPolicy::new();
        let err = policy.pick_for_upload(&registry, Some("group1")).await.unwrap_err();
        assert!(matches!(err, CoreError::NoStorageServer));
    }

    #[tokio::test]
    async fn test_pick_for_read_allows_online() {
        let dir = tempdir().unwrap();
        let registry = GroupRegistry::load(dir.path()).await.unwrap();
        registry.register(sample("s1", "group1", StorageStatus::Online)).await.unwrap();

        let policy = SelectionPolicy::new();
        let picked = policy.pick_for_read(&registry, "group1").await.unwrap();
        assert_eq!(picked.storage_id, "s1");
    }
}
