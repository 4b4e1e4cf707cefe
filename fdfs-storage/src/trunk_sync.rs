//! Trunk binlog sync workers: one per peer that needs the trunk server's
//! add-space/del-space stream (§4.9). Mirrors [`crate::sync`]'s worker loop
//! shape but tails [`crate::trunk_binlog::TrunkBinlogWriter`] instead of the
//! storage binlog, and ships `TRUNK_SYNC_BINLOG`/`TRUNK_TRUNCATE_BINLOG_FILE`
//! frames instead of `SYNC_BINLOG`/`TRUNCATE_BINLOG_FILE`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use fdfs_core::connection::ConnectionPool;
use fdfs_core::errors::{CoreError, Result};
use fdfs_core::protocol::{decode_header, encode_header, pad_string};
use fdfs_core::types::{StorageCommand, FDFS_GROUP_NAME_MAX_LEN};

use crate::mark;
use crate::sync::SyncControl;
use crate::trunk_binlog::TrunkBinlogWriter;

/// Tracks the set of running trunk sync workers so a supervisor can tear them
/// all down together (`kill_trunk_sync_threads` in the spec's terms).
#[derive(Default)]
pub struct TrunkSyncThreads {
    handles: Mutex<HashMap<String, (JoinHandle<()>, SyncControl)>>,
}

impl TrunkSyncThreads {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn spawn(
        self: &Arc<Self>,
        group_name: String,
        peer_storage_id: String,
        peer_addr: String,
        binlog: Arc<TrunkBinlogWriter>,
        mark_dir: PathBuf,
        pool: Arc<ConnectionPool>,
        buffer_size: usize,
        heart_beat_interval: Duration,
        network_timeout_ms: u64,
    ) {
        let control = SyncControl::default();
        let control_clone = control.clone();
        let key = peer_storage_id.clone();
        let handle = tokio::spawn(run_trunk_sync_worker(
            group_name,
            peer_storage_id,
            peer_addr,
            binlog,
            mark_dir,
            pool,
            buffer_size,
            heart_beat_interval,
            network_timeout_ms,
            control_clone,
        ));
        self.handles.lock().await.insert(key, (handle, control));
    }

    /// Signals every worker to stop, waits briefly, then force-aborts any
    /// stragglers before returning.
    pub async fn kill_all(&self) {
        let mut handles = self.handles.lock().await;
        for (_, control) in handles.values() {
            control.stop.store(true, Ordering::Relaxed);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        for (id, (handle, _)) in handles.drain() {
            if !handle.is_finished() {
                warn!(peer = %id, "trunk sync worker did not stop in time, aborting");
                handle.abort();
            }
        }
    }

    pub async fn request_reset(&self, peer_storage_id: &str) {
        if let Some((_, control)) = self.handles.lock().await.get(peer_storage_id) {
            control.reset_binlog_offset.store(true, Ordering::Relaxed);
        }
    }
}

async fn run_trunk_sync_worker(
    group_name: String,
    peer_storage_id: String,
    peer_addr: String,
    binlog: Arc<TrunkBinlogWriter>,
    mark_dir: PathBuf,
    pool: Arc<ConnectionPool>,
    buffer_size: usize,
    heart_beat_interval: Duration,
    network_timeout_ms: u64,
    control: SyncControl,
) {
    let mark_key = format!("trunk_{peer_storage_id}");
    let mut offset = match mark::load(&mark_dir, &mark_key) {
        Ok(info) => info.binlog_offset,
        Err(e) => {
            warn!(peer = %peer_addr, error = %e, "failed to load trunk mark file, starting from 0");
            0
        }
    };
    let mut last_sent = tokio::time::Instant::now();
    let mut announced_truncate = false;

    'outer: loop {
        if control.stop.load(Ordering::Relaxed) {
            info!(peer = %peer_addr, "trunk sync worker stopping");
            break;
        }
        if control.reset_binlog_offset.swap(false, Ordering::Relaxed) {
            offset = 0;
            announced_truncate = false;
        }

        let mut conn = match pool.acquire(&peer_addr).await {
            Ok(c) => c,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "trunk sync connect failed, retrying");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if offset == 0 && !announced_truncate {
            let body = pad_string(&group_name, FDFS_GROUP_NAME_MAX_LEN);
            let header = encode_header(body.len() as u64, StorageCommand::TrunkTruncateBinlogFile.into(), 0);
            if let Err(e) = conn.send(&header, network_timeout_ms).await.and(conn.send(&body, network_timeout_ms).await) {
                warn!(peer = %peer_addr, error = %e, "failed to announce trunk truncate");
                pool.release(conn, false).await;
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
            if ack(&mut conn, network_timeout_ms).await.is_err() {
                pool.release(conn, false).await;
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
            announced_truncate = true;
        }

        loop {
            if control.stop.load(Ordering::Relaxed) || control.reset_binlog_offset.load(Ordering::Relaxed) {
                pool.release(conn, true).await;
                continue 'outer;
            }

            let tail_len = match binlog.len() {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "failed to stat trunk binlog");
                    pool.release(conn, false).await;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue 'outer;
                }
            };

            if offset >= tail_len {
                if last_sent.elapsed() >= heart_beat_interval {
                    let body = pad_string(&group_name, FDFS_GROUP_NAME_MAX_LEN);
                    let header = encode_header(body.len() as u64, StorageCommand::ActiveTest.into(), 0);
                    let sent = conn.send(&header, network_timeout_ms).await.and(conn.send(&body, network_timeout_ms).await);
                    if sent.is_err() || ack(&mut conn, network_timeout_ms).await.is_err() {
                        pool.release(conn, false).await;
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue 'outer;
                    }
                    last_sent = tokio::time::Instant::now();
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            let chunk = match std::fs::read(binlog.path()) {
                Ok(bytes) => {
                    let start = offset as usize;
                    let end = (start + buffer_size).min(bytes.len());
                    bytes[start..end].to_vec()
                }
                Err(e) => {
                    warn!(error = %e, "failed to read trunk binlog");
                    pool.release(conn, false).await;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue 'outer;
                }
            };
            if chunk.is_empty() {
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            let header = encode_header(chunk.len() as u64, StorageCommand::TrunkSyncBinlog.into(), 0);
            let sent = conn.send(&header, network_timeout_ms).await.and(conn.send(&chunk, network_timeout_ms).await);
            match sent {
                Ok(()) if ack(&mut conn, network_timeout_ms).await.is_ok() => {
                    offset += chunk.len() as u64;
                    last_sent = tokio::time::Instant::now();
                    let _ = mark::save(
                        &mark_dir,
                        &mark_key,
                        mark::MarkInfo { binlog_offset: offset, last_synced_timestamp: now_secs() },
                    );
                }
                _ => {
                    warn!(peer = %peer_addr, "trunk sync frame failed, reconnecting");
                    pool.release(conn, false).await;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue 'outer;
                }
            }
        }
    }

    let _ = mark::save(
        &mark_dir,
        &mark_key,
        mark::MarkInfo { binlog_offset: offset, last_synced_timestamp: now_secs() },
    );
}

async fn ack(conn: &mut fdfs_core::connection::Connection, timeout_ms: u64) -> Result<()> {
    let header_buf = conn.receive_full(fdfs_core::types::FDFS_PROTO_HEADER_LEN, timeout_ms).await?;
    let header = decode_header(&header_buf, u64::MAX)?;
    if header.length > 0 {
        let _ = conn.receive_full(header.length as usize, timeout_ms).await?;
    }
    if header.status != 0 {
        return Err(fdfs_core::errors::map_status_to_error(header.status).unwrap_or(CoreError::Protocol {
            code: header.status,
            message: "trunk sync ack error".to_string(),
        }));
    }
    Ok(())
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kill_all_on_empty_registry_is_noop() {
        let threads = TrunkSyncThreads::new();
        threads.kill_all().await;
    }
}
