//! Storage node supervisor: recovers local state, starts the accept loop,
//! and spawns the tracker heartbeat and peer sync background tasks.
//!
//! Peer discovery here is a one-shot `SERVER_LIST_STORAGE` query against the
//! first reachable tracker at startup; unlike the tracker's own liveness
//! checker, this does not re-poll for membership changes after launch, so a
//! storage server joining the group later requires a restart to pick up a
//! sync worker for it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Buf;
use tracing::{info, warn};

use fdfs_core::connection::ConnectionPool;
use fdfs_core::protocol::{decode_header, encode_header, pad_string, unpad_string};
use fdfs_core::types::{TrackerCommand, FDFS_GROUP_NAME_MAX_LEN, FDFS_STORAGE_ID_MAX_SIZE, IP_ADDRESS_SIZE};

use fdfs_storage::binlog::BinlogWriter;
use fdfs_storage::config::StorageConfig;
use fdfs_storage::server::{run, StorageState};
use fdfs_storage::store::FileStore;
use fdfs_storage::sync::{run_sync_worker, SyncControl};
use fdfs_storage::trunk_binlog::{recover as recover_trunk, TrunkBinlogWriter};
use fdfs_storage::trunk_index::TrunkIndex;
use fdfs_storage::trunk_sync::TrunkSyncThreads;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let bind_addr = std::env::var("FDFS_STORAGE_BIND").unwrap_or_else(|_| "0.0.0.0:23000".to_string());
    let group_name = std::env::var("FDFS_STORAGE_GROUP").unwrap_or_else(|_| "group1".to_string());
    let storage_id = std::env::var("FDFS_STORAGE_ID").unwrap_or_else(|_| bind_addr.clone());
    let data_dir = std::env::var("FDFS_STORAGE_DATA_DIR").unwrap_or_else(|_| "./data/storage/meta".to_string());
    let store_path = std::env::var("FDFS_STORAGE_STORE_PATH").unwrap_or_else(|_| "./data/storage".to_string());
    let tracker_addrs: Vec<String> = std::env::var("FDFS_STORAGE_TRACKERS")
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    let is_trunk_server = std::env::var("FDFS_STORAGE_IS_TRUNK_SERVER")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let config = StorageConfig::new(bind_addr.clone(), group_name.clone(), storage_id.clone(), tracker_addrs.clone())
        .with_data_dir(data_dir.clone())
        .with_store_paths(vec![store_path.clone()]);

    info!(data_dir = %config.data_dir, group = %group_name, "storage node starting");

    let storage_numeric_id: u32 = crc32fast::hash(storage_id.as_bytes());
    let store = FileStore::new(store_path.as_str(), storage_numeric_id);

    let binlog = BinlogWriter::open(std::path::Path::new(&data_dir).join("binlog"))?;
    let trunk_binlog = TrunkBinlogWriter::open(std::path::Path::new(&data_dir).join("trunk_binlog"))?;

    let trunk_index = if is_trunk_server {
        let snapshot_path = std::path::Path::new(&data_dir).join("storage_trunk.dat");
        let blocks = recover_trunk(&snapshot_path, trunk_binlog.path())?;
        let index = TrunkIndex::new(trunk_binlog.clone(), config.slot_min_size, config.alloc_alignment);
        for block in blocks {
            index.recover_insert(block).await?;
        }
        info!(free_bytes = index.total_free_space(), "recovered trunk index");
        Some(index)
    } else {
        None
    };

    let state = Arc::new(StorageState::new(config.clone(), store, binlog.clone(), trunk_binlog.clone(), trunk_index));

    let pool = ConnectionPool::new(16, Duration::from_millis(config.network_timeout_ms), Duration::from_secs(60));

    for tracker_addr in &tracker_addrs {
        let pool = pool.clone();
        let tracker_addr = tracker_addr.clone();
        let group_name = group_name.clone();
        let storage_id = storage_id.clone();
        let bind_addr = bind_addr.clone();
        let heartbeat_interval = config.heartbeat_interval;
        let network_timeout_ms = config.network_timeout_ms;
        tokio::spawn(async move {
            run_heartbeat_loop(pool, tracker_addr, group_name, storage_id, bind_addr, heartbeat_interval, network_timeout_ms).await;
        });
    }

    if let Some(first_tracker) = tracker_addrs.first().cloned() {
        let peers = discover_group_peers(&pool, &first_tracker, &group_name, &storage_id, config.network_timeout_ms)
            .await
            .unwrap_or_default();

        let trunk_sync_threads = TrunkSyncThreads::new();
        let mark_dir = std::path::PathBuf::from(&data_dir).join("sync_marks");

        for (peer_storage_id, peer_addr) in peers {
            let group_name = group_name.clone();
            let binlog = binlog.clone();
            let mark_dir = mark_dir.clone();
            let pool = pool.clone();
            let sync_buffer_size = config.sync_buffer_size;
            let heart_beat_interval = config.heart_beat_interval;
            let network_timeout_ms = config.network_timeout_ms;
            tokio::spawn(async move {
                run_sync_worker(
                    group_name,
                    peer_storage_id,
                    peer_addr,
                    binlog,
                    mark_dir,
                    pool,
                    sync_buffer_size,
                    heart_beat_interval,
                    network_timeout_ms,
                    SyncControl::default(),
                )
                .await;
            });
        }
        // Trunk binlog sync workers are only meaningful once a trunk server
        // is known; left unspawned here since membership discovery doesn't
        // yet report which peer holds that role.
        let _ = trunk_sync_threads;
    }

    run(state).await?;
    Ok(())
}

async fn run_heartbeat_loop(
    pool: Arc<ConnectionPool>,
    tracker_addr: String,
    group_name: String,
    storage_id: String,
    bind_addr: String,
    interval: Duration,
    network_timeout_ms: u64,
) {
    let (ip, port) = match bind_addr.rsplit_once(':') {
        Some((ip, port)) => (ip.to_string(), port.parse::<u16>().unwrap_or(23000)),
        None => (bind_addr.clone(), 23000),
    };
    let ip = if ip == "0.0.0.0" { "127.0.0.1".to_string() } else { ip };

    loop {
        if let Err(e) = send_heartbeat(&pool, &tracker_addr, &group_name, &storage_id, &ip, port, network_timeout_ms).await {
            warn!(tracker = %tracker_addr, error = %e, "heartbeat failed");
        }
        tokio::time::sleep(interval).await;
    }
}

async fn send_heartbeat(
    pool: &Arc<ConnectionPool>,
    tracker_addr: &str,
    group_name: &str,
    storage_id: &str,
    ip: &str,
    port: u16,
    network_timeout_ms: u64,
) -> fdfs_core::errors::Result<()> {
    let mut conn = pool.acquire(tracker_addr).await?;
    let mut body = bytes::BytesMut::new();
    body.extend_from_slice(&pad_string(storage_id, FDFS_STORAGE_ID_MAX_SIZE));
    body.extend_from_slice(&pad_string(group_name, FDFS_GROUP_NAME_MAX_LEN));
    body.extend_from_slice(&pad_string(ip, IP_ADDRESS_SIZE));
    bytes::BufMut::put_u64(&mut body, port as u64);
    bytes::BufMut::put_u64(&mut body, 0); // total disk bytes: not tracked locally yet
    bytes::BufMut::put_u64(&mut body, 0); // free disk bytes: ditto

    let header = encode_header(body.len() as u64, TrackerCommand::StorageBeat.into(), 0);
    conn.send(&header, network_timeout_ms).await?;
    conn.send(&body, network_timeout_ms).await?;

    let resp_header_buf = conn.receive_full(fdfs_core::types::FDFS_PROTO_HEADER_LEN, network_timeout_ms).await?;
    let resp_header = decode_header(&resp_header_buf, u64::MAX)?;
    if resp_header.length > 0 {
        let _ = conn.receive_full(resp_header.length as usize, network_timeout_ms).await?;
    }
    pool.release(conn, true).await;
    Ok(())
}

/// Queries `tracker_addr` for every storage server in `group_name`, returning
/// `(storage_id, addr)` pairs for everyone except `self_storage_id`.
async fn discover_group_peers(
    pool: &Arc<ConnectionPool>,
    tracker_addr: &str,
    group_name: &str,
    self_storage_id: &str,
    network_timeout_ms: u64,
) -> fdfs_core::errors::Result<Vec<(String, String)>> {
    let mut conn = pool.acquire(tracker_addr).await?;
    let body = pad_string(group_name, FDFS_GROUP_NAME_MAX_LEN);
    let header = encode_header(body.len() as u64, TrackerCommand::ServerListStorage.into(), 0);
    conn.send(&header, network_timeout_ms).await?;
    conn.send(&body, network_timeout_ms).await?;

    let resp_header_buf = conn.receive_full(fdfs_core::types::FDFS_PROTO_HEADER_LEN, network_timeout_ms).await?;
    let resp_header = decode_header(&resp_header_buf, u64::MAX)?;
    let resp_body = conn.receive_full(resp_header.length as usize, network_timeout_ms).await?;
    pool.release(conn, true).await;

    let mut peers = Vec::new();
    if resp_body.len() < 8 {
        return Ok(peers);
    }
    let count = (&resp_body[0..8]).get_u64();
    let record_len = FDFS_STORAGE_ID_MAX_SIZE + IP_ADDRESS_SIZE + 8 + 1;
    let mut offset = 8;
    for _ in 0..count {
        if resp_body.len() < offset + record_len {
            break;
        }
        let id = unpad_string(&resp_body[offset..offset + FDFS_STORAGE_ID_MAX_SIZE]);
        let ip_off = offset + FDFS_STORAGE_ID_MAX_SIZE;
        let ip = unpad_string(&resp_body[ip_off..ip_off + IP_ADDRESS_SIZE]);
        let port_off = ip_off + IP_ADDRESS_SIZE;
        let port = (&resp_body[port_off..port_off + 8]).get_u64() as u16;
        if id != self_storage_id {
            peers.push((id, format!("{ip}:{port}")));
        }
        offset += record_len;
    }
    Ok(peers)
}
