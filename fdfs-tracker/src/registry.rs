//! The tracker's in-memory view of groups and storage servers (§4.4),
//! with snapshot + changelog persistence (§4.4 "Durability").
//!
//! Grounded in the teacher client's `types::StorageServer`/`ClientConfig`
//! shape (plain structs, explicit field lists) and in garage's
//! `block-manager.rs` pattern of an in-memory index guarded by a single
//! `RwLock`, rebuilt from a snapshot plus a replayed tail of changes on
//! startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use fdfs_core::errors::{CoreError, Result};
use fdfs_core::types::StorageStatus;

use crate::persistence::{append_line, read_if_exists, write_atomic};

/// A storage server as the tracker tracks it — distinct from
/// [`fdfs_core::types::StorageEndpoint`], which is the thin struct the
/// client gets back from a query.
#[derive(Debug, Clone)]
pub struct StorageServer {
    /// Cluster-wide unique id (§9, up to `FDFS_STORAGE_ID_MAX_SIZE`).
    pub storage_id: String,
    /// Group this storage server belongs to.
    pub group_name: String,
    /// Current IP address.
    pub ip_addr: String,
    /// Listen port.
    pub port: u16,
    /// Number of store paths this storage server manages.
    pub store_path_count: u8,
    /// Lifecycle status (§4.4 state machine).
    pub status: StorageStatus,
    /// Unix timestamp this storage server first registered.
    pub join_time: u64,
    /// Unix timestamp of the last heartbeat (§4.4 "liveness").
    pub last_heartbeat: u64,
    /// Unix timestamp the current `status` was entered, used to time out a
    /// stuck `SYNCING` phase (§10.4 open question).
    pub state_since: u64,
    /// The storage id being used as the sync source while in `WAIT_SYNC`/`SYNCING`.
    pub sync_src: Option<String>,
    /// Total disk bytes, reported via `STORAGE_REPORT_DISK_USAGE`.
    pub total_disk_bytes: u64,
    /// Free disk bytes, reported via `STORAGE_REPORT_DISK_USAGE`.
    pub free_disk_bytes: u64,
}

impl StorageServer {
    fn encode(&self) -> String {
        format!(
            "{} {} {} {} {} {} {} {} {} {} {}",
            self.storage_id,
            self.group_name,
            self.ip_addr,
            self.port,
            self.store_path_count,
            self.status as u8,
            self.join_time,
            self.last_heartbeat,
            self.state_since,
            self.sync_src.as_deref().unwrap_or("-"),
            format_args!("{}:{}", self.total_disk_bytes, self.free_disk_bytes),
        )
    }

    fn decode(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 11 {
            return Err(CoreError::MalformedRecord(format!("bad storage server record: {line}")));
        }
        let disk: Vec<&str> = fields[10].splitn(2, ':').collect();
        if disk.len() != 2 {
            return Err(CoreError::MalformedRecord(format!("bad disk usage field: {}", fields[10])));
        }
        Ok(Self {
            storage_id: fields[0].to_string(),
            group_name: fields[1].to_string(),
            ip_addr: fields[2].to_string(),
            port: fields[3]
                .parse()
                .map_err(|_| CoreError::MalformedRecord(format!("bad port: {}", fields[3])))?,
            store_path_count: fields[4]
                .parse()
                .map_err(|_| CoreError::MalformedRecord(format!("bad store path count: {}", fields[4])))?,
            status: StorageStatus::from_u8(
                fields[5]
                    .parse()
                    .map_err(|_| CoreError::MalformedRecord(format!("bad status: {}", fields[5])))?,
            ),
            join_time: fields[6]
                .parse()
                .map_err(|_| CoreError::MalformedRecord(format!("bad join_time: {}", fields[6])))?,
            last_heartbeat: fields[7]
                .parse()
                .map_err(|_| CoreError::MalformedRecord(format!("bad last_heartbeat: {}", fields[7])))?,
            state_since: fields[8]
                .parse()
                .map_err(|_| CoreError::MalformedRecord(format!("bad state_since: {}", fields[8])))?,
            sync_src: if fields[9] == "-" { None } else { Some(fields[9].to_string()) },
            total_disk_bytes: disk[0].parse().unwrap_or(0),
            free_disk_bytes: disk[1].parse().unwrap_or(0),
        })
    }
}

/// A replication group (a "volume" in FastDFS terms): a set of storage
/// servers that all hold the same files.
#[derive(Debug, Clone, Default)]
pub struct Group {
    /// Group name (§9, up to `FDFS_GROUP_NAME_MAX_LEN`).
    pub name: String,
    /// Storage ids belonging to this group.
    pub storage_ids: Vec<String>,
    /// The storage id currently designated trunk server for this group (§4.6).
    pub trunk_server: Option<String>,
}

struct Inner {
    groups: HashMap<String, Group>,
    servers: HashMap<String, StorageServer>,
}

/// The tracker's registry of groups and storage servers, with changelog-backed
/// persistence (§4.4).
pub struct GroupRegistry {
    inner: RwLock<Inner>,
    data_dir: PathBuf,
    changelog_seq: AtomicU64,
}

impl GroupRegistry {
    /// Loads the registry from `data_dir`'s snapshot + changelog, or starts
    /// empty if none exists yet.
    pub async fn load(data_dir: impl AsRef<Path>) -> Result<Arc<Self>> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let mut groups = HashMap::new();
        let mut servers = HashMap::new();

        if let Some(contents) = read_if_exists(&data_dir.join("storage_groups.dat"))? {
            for line in contents.lines().filter(|l| !l.is_empty()) {
                let fields: Vec<&str> = line.splitn(3, '|').collect();
                if fields.len() != 3 {
                    warn!(line, "skipping malformed group snapshot line");
                    continue;
                }
                let name = fields[0].to_string();
                let storage_ids = if fields[1].is_empty() {
                    Vec::new()
                } else {
                    fields[1].split(',').map(String::from).collect()
                };
                let trunk_server = if fields[2].is_empty() { None } else { Some(fields[2].to_string()) };
                groups.insert(name.clone(), Group { name, storage_ids, trunk_server });
            }
        }

        if let Some(contents) = read_if_exists(&data_dir.join("storage_servers.dat"))? {
            for line in contents.lines().filter(|l| !l.is_empty()) {
                match StorageServer::decode(line) {
                    Ok(s) => {
                        servers.insert(s.storage_id.clone(), s);
                    }
                    Err(e) => warn!(error = %e, line, "skipping malformed storage server snapshot line"),
                }
            }
        }

        info!(groups = groups.len(), servers = servers.len(), "registry loaded");

        Ok(Arc::new(Self {
            inner: RwLock::new(Inner { groups, servers }),
            data_dir,
            changelog_seq: AtomicU64::new(0),
        }))
    }

    /// Registers a new storage server, creating its group if necessary.
    /// Returns `AlreadyExists` if the storage id is already registered.
    pub async fn register(&self, server: StorageServer) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.servers.contains_key(&server.storage_id) {
            return Err(CoreError::AlreadyExists(server.storage_id));
        }
        let group = inner.groups.entry(server.group_name.clone()).or_insert_with(|| Group {
            name: server.group_name.clone(),
            storage_ids: Vec::new(),
            trunk_server: None,
        });
        group.storage_ids.push(server.storage_id.clone());
        self.log_transition(&server.storage_id, "NEW", &format!("{:?}", server.status)).await;
        inner.servers.insert(server.storage_id.clone(), server);
        drop(inner);
        self.snapshot().await
    }

    /// Updates a storage server's status, logging the transition.
    pub async fn set_status(&self, storage_id: &str, status: StorageStatus) -> Result<()> {
        let mut inner = self.inner.write().await;
        let server = inner
            .servers
            .get_mut(storage_id)
            .ok_or_else(|| CoreError::StorageNotFound(storage_id.to_string()))?;
        let before = format!("{:?}", server.status);
        server.status = status;
        server.state_since = crate::now_unix();
        let after = format!("{status:?}");
        drop(inner);
        self.log_transition(storage_id, &before, &after).await;
        self.snapshot().await
    }

    /// Sets the sync source a `WAIT_SYNC`/`SYNCING` storage server should
    /// replicate from, without otherwise touching its status.
    pub async fn set_sync_src(&self, storage_id: &str, sync_src: Option<String>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let server = inner
            .servers
            .get_mut(storage_id)
            .ok_or_else(|| CoreError::StorageNotFound(storage_id.to_string()))?;
        server.sync_src = sync_src;
        drop(inner);
        self.snapshot().await
    }

    /// Updates a storage server's recorded IP address (`STORAGE_REPORT_IP_CHANGED`).
    pub async fn update_ip(&self, storage_id: &str, new_ip: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let server = inner
            .servers
            .get_mut(storage_id)
            .ok_or_else(|| CoreError::StorageNotFound(storage_id.to_string()))?;
        server.ip_addr = new_ip.to_string();
        drop(inner);
        self.snapshot().await
    }

    /// Records a heartbeat timestamp for a storage server.
    pub async fn touch_heartbeat(&self, storage_id: &str, now: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let server = inner
            .servers
            .get_mut(storage_id)
            .ok_or_else(|| CoreError::StorageNotFound(storage_id.to_string()))?;
        server.last_heartbeat = now;
        if server.status == StorageStatus::Offline {
            server.status = StorageStatus::Online;
        }
        Ok(())
    }

    /// Records a disk usage report.
    pub async fn report_disk_usage(&self, storage_id: &str, total: u64, free: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let server = inner
            .servers
            .get_mut(storage_id)
            .ok_or_else(|| CoreError::StorageNotFound(storage_id.to_string()))?;
        server.total_disk_bytes = total;
        server.free_disk_bytes = free;
        Ok(())
    }

    /// Marks storage servers whose last heartbeat predates `now - interval`
    /// as OFFLINE. Returns the ids that transitioned.
    pub async fn sweep_offline(&self, now: u64, interval_secs: u64) -> Vec<String> {
        let mut transitioned = Vec::new();
        let mut inner = self.inner.write().await;
        for server in inner.servers.values_mut() {
            if matches!(server.status, StorageStatus::Active | StorageStatus::Online)
                && now.saturating_sub(server.last_heartbeat) > interval_secs
            {
                server.status = StorageStatus::Offline;
                transitioned.push(server.storage_id.clone());
            }
        }
        drop(inner);
        for id in &transitioned {
            self.log_transition(id, "ACTIVE/ONLINE", "OFFLINE").await;
        }
        if !transitioned.is_empty() {
            let _ = self.snapshot().await;
        }
        transitioned
    }

    /// Removes a storage server entirely (`SERVER_DELETE_STORAGE`). Fails if
    /// the server is not already OFFLINE or DELETED.
    pub async fn delete_storage(&self, storage_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let server = inner
            .servers
            .get(storage_id)
            .ok_or_else(|| CoreError::StorageNotFound(storage_id.to_string()))?;
        if !matches!(server.status, StorageStatus::Offline | StorageStatus::Deleted) {
            return Err(CoreError::Busy(format!("storage {storage_id} is not offline")));
        }
        let group_name = server.group_name.clone();
        inner.servers.remove(storage_id);
        if let Some(group) = inner.groups.get_mut(&group_name) {
            group.storage_ids.retain(|id| id != storage_id);
        }
        drop(inner);
        self.log_transition(storage_id, "OFFLINE", "DELETED").await;
        self.snapshot().await
    }

    /// Removes an entire group. Fails if any member is ACTIVE or ONLINE —
    /// stricter than some deployments allow, a deliberate safety margin.
    pub async fn delete_group(&self, group_name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let group = inner
            .groups
            .get(group_name)
            .ok_or_else(|| CoreError::GroupNotFound(group_name.to_string()))?;
        for id in &group.storage_ids {
            if let Some(s) = inner.servers.get(id) {
                if matches!(s.status, StorageStatus::Active | StorageStatus::Online) {
                    return Err(CoreError::Busy(format!("group {group_name} has active members")));
                }
            }
        }
        let ids = group.storage_ids.clone();
        inner.groups.remove(group_name);
        for id in ids {
            inner.servers.remove(&id);
        }
        drop(inner);
        self.snapshot().await
    }

    /// Sets the group's trunk server (`SET_TRUNK_SERVER`, §4.6).
    pub async fn set_trunk_server(&self, group_name: &str, storage_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.servers.contains_key(storage_id) {
            return Err(CoreError::StorageNotFound(storage_id.to_string()));
        }
        let group = inner
            .groups
            .get_mut(group_name)
            .ok_or_else(|| CoreError::GroupNotFound(group_name.to_string()))?;
        group.trunk_server = Some(storage_id.to_string());
        drop(inner);
        self.snapshot().await
    }

    /// Returns a clone of every group.
    pub async fn list_groups(&self) -> Vec<Group> {
        self.inner.read().await.groups.values().cloned().collect()
    }

    /// Returns every storage server in `group_name`.
    pub async fn list_storage(&self, group_name: &str) -> Vec<StorageServer> {
        self.inner
            .read()
            .await
            .servers
            .values()
            .filter(|s| s.group_name == group_name)
            .cloned()
            .collect()
    }

    /// Looks up a single storage server by id.
    pub async fn get_storage(&self, storage_id: &str) -> Option<StorageServer> {
        self.inner.read().await.servers.get(storage_id).cloned()
    }

    /// Looks up a single group by name.
    pub async fn get_group(&self, group_name: &str) -> Option<Group> {
        self.inner.read().await.groups.get(group_name).cloned()
    }

    async fn log_transition(&self, storage_id: &str, before: &str, after: &str) {
        let seq = self.changelog_seq.fetch_add(1, Ordering::Relaxed);
        let now = crate::now_unix();
        let line = format!("{seq} {now} {storage_id} {before} {after}");
        if let Err(e) = append_line(&self.data_dir.join("storage_changelog.dat"), &line) {
            warn!(error = %e, "failed to append changelog entry");
        }
    }

    async fn snapshot(&self) -> Result<()> {
        let inner = self.inner.read().await;
        let mut groups_out = String::new();
        for g in inner.groups.values() {
            groups_out.push_str(&format!(
                "{}|{}|{}\n",
                g.name,
                g.storage_ids.join(","),
                g.trunk_server.as_deref().unwrap_or("")
            ));
        }
        let mut servers_out = String::new();
        for s in inner.servers.values() {
            servers_out.push_str(&s.encode());
            servers_out.push('\n');
        }
        drop(inner);
        write_atomic(&self.data_dir.join("storage_groups.dat"), &groups_out)?;
        write_atomic(&self.data_dir.join("storage_servers.dat"), &servers_out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(id: &str, group: &str) -> StorageServer {
        StorageServer {
            storage_id: id.to_string(),
            group_name: group.to_string(),
            ip_addr: "127.0.0.1".to_string(),
            port: 23000,
            store_path_count: 1,
            status: StorageStatus::Init,
            join_time: 1000,
            last_heartbeat: 1000,
            state_since: 1000,
            sync_src: None,
            total_disk_bytes: 0,
            free_disk_bytes: 0,
        }
    }

    #[tokio::test]
    async fn test_register_and_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let registry = GroupRegistry::load(dir.path()).await.unwrap();
        registry.register(sample("storage1", "group1")).await.unwrap();

        let reloaded = GroupRegistry::load(dir.path()).await.unwrap();
        let server = reloaded.get_storage("storage1").await.unwrap();
        assert_eq!(server.group_name, "group1");
        let group = reloaded.get_group("group1").await.unwrap();
        assert_eq!(group.storage_ids, vec!["storage1".to_string()]);
    }

    #[tokio::test]
    async fn test_register_duplicate_rejected() {
        let dir = tempdir().unwrap();
        let registry = GroupRegistry::load(dir.path()).await.unwrap();
        registry.register(sample("storage1", "group1")).await.unwrap();
        let err = registry.register(sample("storage1", "group1")).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_sweep_offline() {
        let dir = tempdir().unwrap();
        let registry = GroupRegistry::load(dir.path()).await.unwrap();
        let mut s = sample("storage1", "group1");
        s.status = StorageStatus::Active;
        s.last_heartbeat = 0;
        registry.register(s).await.unwrap();

        let transitioned = registry.sweep_offline(1000, 30).await;
        assert_eq!(transitioned, vec!["storage1".to_string()]);
        assert_eq!(registry.get_storage("storage1").await.unwrap().status, StorageStatus::Offline);
    }

    #[tokio::test]
    async fn test_delete_storage_requires_offline() {
        let dir = tempdir().unwrap();
        let registry = GroupRegistry::load(dir.path()).await.unwrap();
        registry.register(sample("storage1", "group1")).await.unwrap();
        let err = registry.delete_storage("storage1").await.unwrap_err();
        assert!(matches!(err, CoreError::Busy(_)));

        registry.set_status("storage1", StorageStatus::Offline).await.unwrap();
        registry.delete_storage("storage1").await.unwrap();
        assert!(registry.get_storage("storage1").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_group_rejects_active_members() {
        let dir = tempdir().unwrap();
        let registry = GroupRegistry::load(dir.path()).await.unwrap();
        let mut s = sample("storage1", "group1");
        s.status = StorageStatus::Active;
        registry.register(s).await.unwrap();

        let err = registry.delete_group("group1").await.unwrap_err();
        assert!(matches!(err, CoreError::Busy(_)));
    }
}
