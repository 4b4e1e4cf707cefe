//! Storage sync engine: one worker per remote peer in the same group (§4.5).
//!
//! Grounded in `fdfs_core::connection::ConnectionPool`/`Connection` for the
//! transport and in `fdfs_core::protocol`'s frame codec for wire I/O, used
//! here in the opposite direction from the client: this side writes
//! requests and reads acks instead of the other way around.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use fdfs_core::connection::ConnectionPool;
use fdfs_core::errors::{CoreError, Result};
use fdfs_core::protocol::{decode_header, encode_header, pad_string};
use fdfs_core::types::{StorageCommand, FDFS_GROUP_NAME_MAX_LEN};

use crate::binlog::{preread, BinlogWriter};
use crate::mark;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const MARK_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Shared handle letting a supervisor tell a running sync worker to stop
/// (peer went DELETED/IP_CHANGED/NONE) or to rewind and reseed from offset 0.
#[derive(Clone)]
pub struct SyncControl {
    pub stop: Arc<AtomicBool>,
    pub reset_binlog_offset: Arc<AtomicBool>,
}

impl Default for SyncControl {
    fn default() -> Self {
        Self { stop: Arc::new(AtomicBool::new(false)), reset_binlog_offset: Arc::new(AtomicBool::new(false)) }
    }
}

/// Tails `binlog` and ships records to `peer_addr` via `SYNC_BINLOG` frames
/// until `control.stop` is set. Runs until told to stop; call from
/// `tokio::spawn`.
pub async fn run_sync_worker(
    group_name: String,
    peer_storage_id: String,
    peer_addr: String,
    binlog: Arc<BinlogWriter>,
    mark_dir: PathBuf,
    pool: Arc<ConnectionPool>,
    buffer_size: usize,
    heart_beat_interval: Duration,
    network_timeout_ms: u64,
    control: SyncControl,
) {
    let mut offset = match mark::load(&mark_dir, &peer_storage_id) {
        Ok(info) => info.binlog_offset,
        Err(e) => {
            warn!(peer = %peer_addr, error = %e, "failed to load mark file, starting from 0");
            0
        }
    };
    let mut last_sent = tokio::time::Instant::now();
    let mut last_flush = tokio::time::Instant::now();
    let mut announced_truncate = false;

    'outer: loop {
        if control.stop.load(Ordering::Relaxed) {
            info!(peer = %peer_addr, "sync worker stopping");
            break;
        }
        if control.reset_binlog_offset.swap(false, Ordering::Relaxed) {
            offset = 0;
            announced_truncate = false;
        }

        let conn = match pool.acquire(&peer_addr).await {
            Ok(c) => c,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "sync connect failed, retrying");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
        };
        let mut conn = conn;

        if offset == 0 && !announced_truncate {
            if let Err(e) = send_simple(&mut conn, StorageCommand::TruncateBinlogFile, &group_name, network_timeout_ms).await {
                warn!(peer = %peer_addr, error = %e, "failed to announce truncate, retrying");
                pool.release(conn, false).await;
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
            announced_truncate = true;
        }

        loop {
            if control.stop.load(Ordering::Relaxed) || control.reset_binlog_offset.load(Ordering::Relaxed) {
                pool.release(conn, true).await;
                continue 'outer;
            }

            let (chunk, _records) = match preread(binlog.path(), offset, buffer_size) {
                Ok(r) => r,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "binlog preread failed");
                    pool.release(conn, false).await;
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    continue 'outer;
                }
            };

            if chunk.is_empty() {
                if last_sent.elapsed() >= heart_beat_interval {
                    if let Err(e) = send_simple(&mut conn, StorageCommand::ActiveTest, &group_name, network_timeout_ms).await {
                        warn!(peer = %peer_addr, error = %e, "active-test ping failed");
                        pool.release(conn, false).await;
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                        continue 'outer;
                    }
                    last_sent = tokio::time::Instant::now();
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            match send_binlog_frame(&mut conn, &chunk, network_timeout_ms).await {
                Ok(()) => {
                    offset += chunk.len() as u64;
                    last_sent = tokio::time::Instant::now();
                    if last_flush.elapsed() >= MARK_FLUSH_INTERVAL {
                        let _ = mark::save(
                            &mark_dir,
                            &peer_storage_id,
                            mark::MarkInfo { binlog_offset: offset, last_synced_timestamp: now_secs() },
                        );
                        last_flush = tokio::time::Instant::now();
                    }
                }
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "sync frame failed, reconnecting");
                    pool.release(conn, false).await;
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    continue 'outer;
                }
            }
        }
    }

    let _ = mark::save(
        &mark_dir,
        &peer_storage_id,
        mark::MarkInfo { binlog_offset: offset, last_synced_timestamp: now_secs() },
    );
}

async fn send_simple(
    conn: &mut fdfs_core::connection::Connection,
    cmd: StorageCommand,
    group_name: &str,
    timeout_ms: u64,
) -> Result<()> {
    let body = pad_string(group_name, FDFS_GROUP_NAME_MAX_LEN);
    let header = encode_header(body.len() as u64, cmd.into(), 0);
    conn.send(&header, timeout_ms).await?;
    conn.send(&body, timeout_ms).await?;
    ack(conn, timeout_ms).await
}

async fn send_binlog_frame(conn: &mut fdfs_core::connection::Connection, chunk: &[u8], timeout_ms: u64) -> Result<()> {
    let header = encode_header(chunk.len() as u64, StorageCommand::SyncBinlog.into(), 0);
    conn.send(&header, timeout_ms).await?;
    conn.send(chunk, timeout_ms).await?;
    ack(conn, timeout_ms).await
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
            message: "sync ack error".to_string(),
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

    #[test]
    fn test_sync_control_defaults_false() {
        let control = SyncControl::default();
        assert!(!control.stop.load(Ordering::Relaxed));
        assert!(!control.reset_binlog_offset.load(Ordering::Relaxed));
    }
}
