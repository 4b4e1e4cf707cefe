//! Tracker TCP accept loop and request dispatch (§4.1, §6).
//!
//! Grounded in the teacher client's `protocol.rs` framing helpers plus
//! `connection.rs`'s read/write shape, run in reverse: the teacher sends a
//! header and reads a response, this reads a header and writes a response.

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use fdfs_core::errors::{CoreError, Result};
use fdfs_core::protocol::{decode_header, encode_header, pad_string, unpad_string};
use fdfs_core::types::{
    StorageStatus, FDFS_GROUP_NAME_MAX_LEN, FDFS_STORAGE_ID_MAX_SIZE, IP_ADDRESS_SIZE,
};

use crate::config::TrackerConfig;
use crate::registry::{GroupRegistry, StorageServer};
use crate::selection::SelectionPolicy;
use crate::state_machine::assign_sync_source;

/// Command bytes not worth giving their own `TrackerCommand` match arm import
/// (kept local since they're dispatch-table keys, not part of the public API).
mod cmd {
    pub const SERVICE_QUERY_STORE_WITHOUT_GROUP_ONE: u8 = 101;
    pub const SERVICE_QUERY_FETCH_ONE: u8 = 102;
    pub const SERVICE_QUERY_UPDATE: u8 = 103;
    pub const SERVICE_QUERY_STORE_WITH_GROUP_ONE: u8 = 104;
    pub const SERVER_LIST_ONE_GROUP: u8 = 90;
    pub const SERVER_LIST_ALL_GROUPS: u8 = 91;
    pub const SERVER_LIST_STORAGE: u8 = 92;
    pub const SERVER_DELETE_STORAGE: u8 = 93;
    pub const STORAGE_REPORT_IP_CHANGED: u8 = 94;
    pub const STORAGE_REPORT_STATUS: u8 = 95;
    pub const STORAGE_REPORT_DISK_USAGE: u8 = 96;
    pub const STORAGE_SYNC_REPORT: u8 = 98;
    pub const SERVER_DELETE_GROUP: u8 = 88;
    pub const SET_TRUNK_SERVER: u8 = 86;
    pub const STORAGE_BEAT: u8 = 80;
    pub const STORAGE_GET_STATUS: u8 = 81;
    pub const STORAGE_GET_SERVER_ID: u8 = 82;
}

/// Shared state handed to every connection handler.
pub struct TrackerState {
    pub config: TrackerConfig,
    pub registry: Arc<GroupRegistry>,
    pub selection: Arc<SelectionPolicy>,
}

/// Accepts connections on `config.bind_addr` until the process is killed.
pub async fn run(state: Arc<TrackerState>) -> Result<()> {
    let listener = TcpListener::bind(&state.config.bind_addr).await.map_err(|e| CoreError::Network {
        operation: "bind".to_string(),
        addr: state.config.bind_addr.clone(),
        source: e,
    })?;
    info!(addr = %state.config.bind_addr, "tracker listening");

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                warn!(peer = %peer_addr, error = %e, "connection closed with error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<TrackerState>) -> Result<()> {
    loop {
        let mut header_buf = [0u8; fdfs_core::types::FDFS_PROTO_HEADER_LEN];
        match stream.read_exact(&mut header_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(CoreError::Network { operation: "read".to_string(), addr: "peer".to_string(), source: e }),
        }
        let header = decode_header(&header_buf, state.config.max_pkg_size)?;

        let mut body = vec![0u8; header.length as usize];
        stream.read_exact(&mut body).await.map_err(|e| CoreError::Network {
            operation: "read".to_string(),
            addr: "peer".to_string(),
            source: e,
        })?;

        let (status, resp_body) = match dispatch(header.cmd, &body, &state).await {
            Ok(resp) => (0u8, resp),
            Err(e) => {
                warn!(cmd = header.cmd, error = %e, "request failed");
                (e.status_code(), BytesMut::new().freeze())
            }
        };

        let resp_header = encode_header(resp_body.len() as u64, header.cmd, status);
        stream.write_all(&resp_header).await.map_err(|e| CoreError::Network {
            operation: "write".to_string(),
            addr: "peer".to_string(),
            source: e,
        })?;
        if !resp_body.is_empty() {
            stream.write_all(&resp_body).await.map_err(|e| CoreError::Network {
                operation: "write".to_string(),
                addr: "peer".to_string(),
                source: e,
            })?;
        }

        let closes = status != 0 && fdfs_core::errors::map_status_to_error(status).map(|e| e.closes_connection()).unwrap_or(false);
        if closes {
            return Ok(());
        }
    }
}

async fn dispatch(cmd: u8, body: &[u8], state: &Arc<TrackerState>) -> Result<bytes::Bytes> {
    match cmd {
        cmd::SERVICE_QUERY_STORE_WITHOUT_GROUP_ONE => query_store_one(state, None).await,
        cmd::SERVICE_QUERY_STORE_WITH_GROUP_ONE => {
            let group = read_fixed_str(body, 0, FDFS_GROUP_NAME_MAX_LEN)?;
            query_store_one(state, Some(&group)).await
        }
        cmd::SERVICE_QUERY_FETCH_ONE => query_fetch_one(state, body, false).await,
        cmd::SERVICE_QUERY_UPDATE => query_fetch_one(state, body, true).await,
        cmd::SERVER_LIST_ONE_GROUP => {
            let group = read_fixed_str(body, 0, FDFS_GROUP_NAME_MAX_LEN)?;
            list_one_group(state, &group).await
        }
        cmd::SERVER_LIST_ALL_GROUPS => list_all_groups(state).await,
        cmd::SERVER_LIST_STORAGE => {
            let group = read_fixed_str(body, 0, FDFS_GROUP_NAME_MAX_LEN)?;
            list_storage(state, &group).await
        }
        cmd::SERVER_DELETE_STORAGE => {
            let storage_id = read_fixed_str(body, 0, FDFS_STORAGE_ID_MAX_SIZE)?;
            state.registry.delete_storage(&storage_id).await?;
            Ok(bytes::Bytes::new())
        }
        cmd::SERVER_DELETE_GROUP => {
            let group = read_fixed_str(body, 0, FDFS_GROUP_NAME_MAX_LEN)?;
            state.registry.delete_group(&group).await?;
            Ok(bytes::Bytes::new())
        }
        cmd::SET_TRUNK_SERVER => {
            let group = read_fixed_str(body, 0, FDFS_GROUP_NAME_MAX_LEN)?;
            let storage_id = read_fixed_str(body, FDFS_GROUP_NAME_MAX_LEN, FDFS_STORAGE_ID_MAX_SIZE)?;
            state.registry.set_trunk_server(&group, &storage_id).await?;
            Ok(bytes::Bytes::new())
        }
        cmd::STORAGE_REPORT_IP_CHANGED => {
            let storage_id = read_fixed_str(body, 0, FDFS_STORAGE_ID_MAX_SIZE)?;
            let new_ip = read_fixed_str(body, FDFS_STORAGE_ID_MAX_SIZE, IP_ADDRESS_SIZE)?;
            report_ip_changed(state, &storage_id, &new_ip).await?;
            Ok(bytes::Bytes::new())
        }
        cmd::STORAGE_REPORT_STATUS => {
            let storage_id = read_fixed_str(body, 0, FDFS_STORAGE_ID_MAX_SIZE)?;
            let status = *body.get(FDFS_STORAGE_ID_MAX_SIZE).unwrap_or(&0);
            state.registry.set_status(&storage_id, StorageStatus::from_u8(status)).await?;
            Ok(bytes::Bytes::new())
        }
        cmd::STORAGE_REPORT_DISK_USAGE => {
            let storage_id = read_fixed_str(body, 0, FDFS_STORAGE_ID_MAX_SIZE)?;
            let total = read_u64(body, FDFS_STORAGE_ID_MAX_SIZE)?;
            let free = read_u64(body, FDFS_STORAGE_ID_MAX_SIZE + 8)?;
            state.registry.report_disk_usage(&storage_id, total, free).await?;
            Ok(bytes::Bytes::new())
        }
        cmd::STORAGE_SYNC_REPORT => {
            let storage_id = read_fixed_str(body, 0, FDFS_STORAGE_ID_MAX_SIZE)?;
            state.registry.set_status(&storage_id, StorageStatus::Online).await?;
            Ok(bytes::Bytes::new())
        }
        cmd::STORAGE_BEAT => storage_beat(state, body).await,
        cmd::STORAGE_GET_STATUS => {
            let storage_id = read_fixed_str(body, 0, FDFS_STORAGE_ID_MAX_SIZE)?;
            let server = state
                .registry
                .get_storage(&storage_id)
                .await
                .ok_or_else(|| CoreError::StorageNotFound(storage_id.clone()))?;
            let mut out = BytesMut::with_capacity(9);
            out.put_u8(server.status as u8);
            out.put_u64(server.state_since);
            Ok(out.freeze())
        }
        cmd::STORAGE_GET_SERVER_ID => storage_get_server_id(state, body).await,
        other => Err(CoreError::UnknownCommand(other)),
    }
}

fn read_fixed_str(body: &[u8], offset: usize, len: usize) -> Result<String> {
    let end = offset + len;
    if body.len() < end {
        return Err(CoreError::WrongBodyLength { cmd: 0, len: body.len() as u64 });
    }
    Ok(unpad_string(&body[offset..end]))
}

fn read_u64(body: &[u8], offset: usize) -> Result<u64> {
    if body.len() < offset + 8 {
        return Err(CoreError::WrongBodyLength { cmd: 0, len: body.len() as u64 });
    }
    Ok((&body[offset..offset + 8]).get_u64())
}

fn encode_endpoint(group: &str, ip: &str, port: u16) -> BytesMut {
    let mut out = BytesMut::new();
    out.extend_from_slice(&pad_string(group, FDFS_GROUP_NAME_MAX_LEN));
    out.extend_from_slice(&pad_string(ip, IP_ADDRESS_SIZE));
    out.put_u64(port as u64);
    out
}

async fn query_store_one(state: &Arc<TrackerState>, group: Option<&str>) -> Result<bytes::Bytes> {
    let server = state.selection.pick_for_upload(&state.registry, group).await?;
    let mut out = encode_endpoint(&server.group_name, &server.ip_addr, server.port);
    out.put_u8(0); // store_path_index: single-path storage nodes for now
    Ok(out.freeze())
}

async fn query_fetch_one(state: &Arc<TrackerState>, body: &[u8], for_update: bool) -> Result<bytes::Bytes> {
    let group = read_fixed_str(body, 0, FDFS_GROUP_NAME_MAX_LEN)?;
    let server = if for_update {
        state.selection.pick_for_upload(&state.registry, Some(&group)).await?
    } else {
        state.selection.pick_for_read(&state.registry, &group).await?
    };
    Ok(encode_endpoint(&server.group_name, &server.ip_addr, server.port).freeze())
}

async fn list_one_group(state: &Arc<TrackerState>, group_name: &str) -> Result<bytes::Bytes> {
    let group = state
        .registry
        .get_group(group_name)
        .await
        .ok_or_else(|| CoreError::GroupNotFound(group_name.to_string()))?;
    let mut out = BytesMut::new();
    out.extend_from_slice(&pad_string(&group.name, FDFS_GROUP_NAME_MAX_LEN));
    out.put_u64(group.storage_ids.len() as u64);
    Ok(out.freeze())
}

async fn list_all_groups(state: &Arc<TrackerState>) -> Result<bytes::Bytes> {
    let groups = state.registry.list_groups().await;
    let mut out = BytesMut::new();
    out.put_u64(groups.len() as u64);
    for g in groups {
        out.extend_from_slice(&pad_string(&g.name, FDFS_GROUP_NAME_MAX_LEN));
        out.put_u64(g.storage_ids.len() as u64);
    }
    Ok(out.freeze())
}

async fn list_storage(state: &Arc<TrackerState>, group_name: &str) -> Result<bytes::Bytes> {
    let servers = state.registry.list_storage(group_name).await;
    let mut out = BytesMut::new();
    out.put_u64(servers.len() as u64);
    for s in servers {
        out.extend_from_slice(&pad_string(&s.storage_id, FDFS_STORAGE_ID_MAX_SIZE));
        out.extend_from_slice(&pad_string(&s.ip_addr, IP_ADDRESS_SIZE));
        out.put_u64(s.port as u64);
        out.put_u8(s.status as u8);
    }
    Ok(out.freeze())
}

async fn report_ip_changed(state: &Arc<TrackerState>, storage_id: &str, new_ip: &str) -> Result<()> {
    state.registry.set_status(storage_id, StorageStatus::IpChanged).await?;
    state.registry.update_ip(storage_id, new_ip).await?;
    // No separate admin-confirm RPC is exposed on the wire; a reachable
    // heartbeat from the new address is treated as the confirmation.
    state.registry.set_status(storage_id, StorageStatus::Init).await?;
    Ok(())
}

async fn storage_beat(state: &Arc<TrackerState>, body: &[u8]) -> Result<bytes::Bytes> {
    let storage_id = read_fixed_str(body, 0, FDFS_STORAGE_ID_MAX_SIZE)?;
    let group_name = read_fixed_str(body, FDFS_STORAGE_ID_MAX_SIZE, FDFS_GROUP_NAME_MAX_LEN)?;
    let ip_addr = read_fixed_str(body, FDFS_STORAGE_ID_MAX_SIZE + FDFS_GROUP_NAME_MAX_LEN, IP_ADDRESS_SIZE)?;
    let port_off = FDFS_STORAGE_ID_MAX_SIZE + FDFS_GROUP_NAME_MAX_LEN + IP_ADDRESS_SIZE;
    let port = read_u64(body, port_off)? as u16;
    let total = read_u64(body, port_off + 8)?;
    let free = read_u64(body, port_off + 16)?;

    let now = crate::now_unix();
    if state.registry.get_storage(&storage_id).await.is_none() {
        info!(storage_id = %storage_id, group = %group_name, "new storage server registering");
        state
            .registry
            .register(StorageServer {
                storage_id: storage_id.clone(),
                group_name,
                ip_addr,
                port,
                store_path_count: 1,
                status: StorageStatus::Init,
                join_time: now,
                last_heartbeat: now,
                state_since: now,
                sync_src: None,
                total_disk_bytes: total,
                free_disk_bytes: free,
            })
            .await?;
        assign_sync_source(&state.registry, &storage_id).await?;
    } else {
        state.registry.touch_heartbeat(&storage_id, now).await?;
        state.registry.report_disk_usage(&storage_id, total, free).await?;
    }
    Ok(bytes::Bytes::new())
}

async fn storage_get_server_id(state: &Arc<TrackerState>, body: &[u8]) -> Result<bytes::Bytes> {
    let ip_addr = read_fixed_str(body, 0, IP_ADDRESS_SIZE)?;
    let port = read_u64(body, IP_ADDRESS_SIZE)? as u16;
    let servers = state.registry.list_groups().await;
    for group in servers {
        for s in state.registry.list_storage(&group.name).await {
            if s.ip_addr == ip_addr && s.port == port {
                return Ok(pad_string(&s.storage_id, FDFS_STORAGE_ID_MAX_SIZE).into());
            }
        }
    }
    let generated = format!("{ip_addr}:{port}");
    let truncated: String = generated.chars().take(FDFS_STORAGE_ID_MAX_SIZE).collect();
    Ok(pad_string(&truncated, FDFS_STORAGE_ID_MAX_SIZE).into())
}
