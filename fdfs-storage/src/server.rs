//! Storage node TCP accept loop and request dispatch (§4.1, §6).
//!
//! Same shape as `fdfs_tracker::server`: read a 10-byte header, read the
//! body, dispatch, write a 10-byte response header plus body. File request
//! handlers route into [`crate::store::FileStore`]; trunk requests route
//! into [`crate::trunk_index::TrunkIndex`] when this node is the group's
//! trunk server, otherwise fail with `TrunkServerUnavailable` (the caller is
//! expected to have asked the tracker for the right node, per §4.6).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use fdfs_core::errors::{CoreError, Result};
use fdfs_core::filename::{FilePayload, RemoteFilename, TrunkPayload, MASTER_FILE_PREFIX};
use fdfs_core::protocol::{decode_header, encode_header, get_file_ext_name, pad_string, unpad_string};
use fdfs_core::trunk::TrunkFullInfo;
use fdfs_core::types::{
    Metadata, MetadataFlag, StorageCommand, FDFS_FILE_EXT_NAME_MAX_LEN, FDFS_GROUP_NAME_MAX_LEN, IP_ADDRESS_SIZE,
    TRUNK_SLOT_HEADER_LEN,
};

use crate::binlog::{BinlogOp, BinlogRecord, BinlogWriter};
use crate::config::StorageConfig;
use crate::store::FileStore;
use crate::trunk_binlog::TrunkBinlogWriter;
use crate::trunk_container::{self, SlotHeader, SlotType};
use crate::trunk_index::{ConfirmStatus, TrunkIndex};

/// Files at or under this size are packed into trunk slots rather than
/// stored as standalone files, when this node has a trunk index (§4.6).
const TRUNK_ELIGIBLE_MAX_SIZE: usize = 4096;

/// Shared state handed to every connection handler.
pub struct StorageState {
    pub config: StorageConfig,
    pub store: FileStore,
    pub binlog: Arc<BinlogWriter>,
    pub trunk_binlog: Arc<TrunkBinlogWriter>,
    /// `Some` only on the group's current trunk server (§4.6).
    pub trunk_index: Option<Arc<TrunkIndex>>,
    random_seq: AtomicU32,
}

impl StorageState {
    pub fn new(
        config: StorageConfig,
        store: FileStore,
        binlog: Arc<BinlogWriter>,
        trunk_binlog: Arc<TrunkBinlogWriter>,
        trunk_index: Option<Arc<TrunkIndex>>,
    ) -> Self {
        Self { config, store, binlog, trunk_binlog, trunk_index, random_seq: AtomicU32::new(1) }
    }

    fn next_random(&self) -> u32 {
        self.random_seq.fetch_add(1, Ordering::Relaxed)
    }
}

/// Accepts connections on `state.config.bind_addr` until the process is killed.
pub async fn run(state: Arc<StorageState>) -> Result<()> {
    let listener = TcpListener::bind(&state.config.bind_addr).await.map_err(|e| CoreError::Network {
        operation: "bind".to_string(),
        addr: state.config.bind_addr.clone(),
        source: e,
    })?;
    info!(addr = %state.config.bind_addr, "storage node listening");

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

async fn handle_connection(mut stream: TcpStream, state: Arc<StorageState>) -> Result<()> {
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
                (e.status_code(), Bytes::new())
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

async fn dispatch(cmd: u8, body: &[u8], state: &Arc<StorageState>) -> Result<Bytes> {
    if cmd == StorageCommand::UploadFile as u8 {
        upload_file(state, body, false).await
    } else if cmd == StorageCommand::UploadAppenderFile as u8 {
        upload_file(state, body, true).await
    } else if cmd == StorageCommand::DeleteFile as u8 {
        delete_file(state, body).await
    } else if cmd == StorageCommand::SetMetadata as u8 {
        set_metadata(state, body).await
    } else if cmd == StorageCommand::GetMetadata as u8 {
        get_metadata(state, body).await
    } else if cmd == StorageCommand::DownloadFile as u8 {
        download_file(state, body).await
    } else if cmd == StorageCommand::QueryFileInfo as u8 {
        query_file_info(state, body).await
    } else if cmd == StorageCommand::AppendFile as u8 {
        append_file(state, body).await
    } else if cmd == StorageCommand::ModifyFile as u8 {
        modify_file(state, body).await
    } else if cmd == StorageCommand::TruncateFile as u8 {
        truncate_file(state, body).await
    } else if cmd == StorageCommand::RegenerateAppenderFilename as u8 {
        regenerate_appender_filename(state, body).await
    } else if cmd == StorageCommand::TrunkAllocSpace as u8 {
        trunk_alloc_space(state, body).await
    } else if cmd == StorageCommand::TrunkAllocConfirm as u8 {
        trunk_alloc_confirm(state, body).await
    } else if cmd == StorageCommand::TrunkFreeSpace as u8 {
        trunk_free_space(state, body).await
    } else if cmd == StorageCommand::SyncBinlog as u8 {
        ingest_sync_binlog(state, body).await
    } else if cmd == StorageCommand::TruncateBinlogFile as u8 {
        state.binlog.truncate().await?;
        Ok(Bytes::new())
    } else if cmd == StorageCommand::TrunkSyncBinlog as u8 {
        ingest_trunk_sync_binlog(state, body).await
    } else if cmd == StorageCommand::TrunkTruncateBinlogFile as u8 {
        Ok(Bytes::new())
    } else if cmd == StorageCommand::ActiveTest as u8 {
        Ok(Bytes::new())
    } else {
        Err(CoreError::UnknownCommand(cmd))
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

/// Body: `{ store_path_index: u8, ext: [u8; FDFS_FILE_EXT_NAME_MAX_LEN], content: rest }`.
/// File size isn't sent explicitly — it's however many content bytes follow
/// the fixed-width header, exactly as the client builds the request.
async fn upload_file(state: &Arc<StorageState>, body: &[u8], appender: bool) -> Result<Bytes> {
    let content_off = 1 + FDFS_FILE_EXT_NAME_MAX_LEN;
    if body.len() < content_off {
        return Err(CoreError::WrongBodyLength { cmd: StorageCommand::UploadFile as u8, len: body.len() as u64 });
    }
    let store_path_index = body[0];
    let ext = read_fixed_str(body, 1, FDFS_FILE_EXT_NAME_MAX_LEN)?;
    let content = &body[content_off..];

    let remote_filename = if !appender && content.len() <= TRUNK_ELIGIBLE_MAX_SIZE && state.trunk_index.is_some() {
        match upload_trunk(state, content, &ext).await? {
            Some(name) => name,
            None => state.store.upload(content, &ext, store_path_index, state.next_random())?,
        }
    } else {
        state.store.upload(content, &ext, store_path_index, state.next_random())?
    };
    state
        .binlog
        .append(&BinlogRecord {
            timestamp: now_secs(),
            op: BinlogOp::Upload,
            group: state.config.group_name.clone(),
            filename: remote_filename.clone(),
            source_storage_id: state.config.storage_id.clone(),
        })
        .await?;

    let mut out = BytesMut::new();
    out.extend_from_slice(&pad_string(&state.config.group_name, FDFS_GROUP_NAME_MAX_LEN));
    out.extend_from_slice(remote_filename.as_bytes());
    Ok(out.freeze())
}

/// Packs `content` into a slot inside this node's trunk space, returning the
/// minted remote filename, or `None` if the trunk index had nothing big
/// enough (caller falls back to a standalone file).
async fn upload_trunk(state: &Arc<StorageState>, content: &[u8], ext: &str) -> Result<Option<String>> {
    let trunk_index = state.trunk_index.as_ref().expect("checked by caller");
    let want = TRUNK_SLOT_HEADER_LEN as u32 + content.len() as u32;
    let Some(block) = trunk_index.alloc_space(0, want).await? else { return Ok(None) };

    let store_path = state.store.store_path();
    let container_path = match trunk_container::ensure_container(store_path, block.trunk_file_id, state.config.trunk_file_size) {
        Ok(p) => p,
        Err(e) => {
            trunk_index.alloc_confirm(block, ConfirmStatus::Failed).await?;
            return Err(e);
        }
    };

    let header = SlotHeader {
        slot_type: SlotType::Regular,
        alloc_size: block.size,
        file_size: content.len() as u32,
        crc32: crc32fast::hash(content),
        mtime: now_secs() as u32,
        ext: ext.to_string(),
    };
    if let Err(e) = trunk_container::write_slot(&container_path, block.offset, &header, content) {
        trunk_index.alloc_confirm(block, ConfirmStatus::Failed).await?;
        return Err(e);
    }
    trunk_index.alloc_confirm(block, ConfirmStatus::Success).await?;

    let payload = FilePayload {
        source_storage_id: state.store.storage_id(),
        create_time: now_secs() as u32,
        file_size: content.len() as u64,
        crc32: header.crc32,
        random: state.next_random(),
    };
    let trunk_payload = TrunkPayload { trunk_file_id: block.trunk_file_id, offset: block.offset, size: block.size };
    let remote_filename = RemoteFilename::new_trunk_backed(block.store_path_index, payload, trunk_payload, ext).encode(MASTER_FILE_PREFIX);
    Ok(Some(remote_filename))
}

/// Body: `{ group: [u8; 15], filename: rest }`.
fn split_group_and_name(body: &[u8]) -> Result<(String, String)> {
    let group = read_fixed_str(body, 0, FDFS_GROUP_NAME_MAX_LEN)?;
    let name = String::from_utf8(body[FDFS_GROUP_NAME_MAX_LEN..].to_vec())?;
    Ok((group, name))
}

/// Rebuilds the `TrunkFullInfo` block a trunk-backed filename addresses, for
/// freeing or reading. The container subdirectory isn't carried in the
/// filename itself (it's re-derived the same way on every node), so only the
/// `trunk` segment plus the outer `store_path_index` are needed here.
fn trunk_block_from_filename(rf: &RemoteFilename) -> Option<TrunkFullInfo> {
    let trunk = rf.trunk?;
    let (sub_path_high, sub_path_low) = trunk_container::derive_container_subdir(trunk.trunk_file_id);
    Some(TrunkFullInfo {
        store_path_index: rf.store_path_index,
        sub_path_high,
        sub_path_low,
        trunk_file_id: trunk.trunk_file_id,
        offset: trunk.offset,
        size: trunk.size,
        status: fdfs_core::trunk::BlockStatus::Hold,
    })
}

async fn delete_file(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    let (_group, filename) = split_group_and_name(body)?;
    let rf = RemoteFilename::decode(&filename)?;
    if let Some(block) = trunk_block_from_filename(&rf) {
        let trunk_index = state.trunk_index.as_ref().ok_or(CoreError::TrunkServerUnavailable)?;
        trunk_index.free_space(block).await?;
    } else {
        state.store.delete(&filename)?;
    }
    state
        .binlog
        .append(&BinlogRecord {
            timestamp: now_secs(),
            op: BinlogOp::Delete,
            group: state.config.group_name.clone(),
            filename,
            source_storage_id: state.config.storage_id.clone(),
        })
        .await?;
    Ok(Bytes::new())
}

/// Body: `{ offset: u64, length: u64, filename: rest }`. No group prefix: a
/// storage node only ever serves the single group it was started with.
/// `length == 0` means "everything from `offset` to the end of the file".
async fn download_file(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    if body.len() < 16 {
        return Err(CoreError::WrongBodyLength { cmd: StorageCommand::DownloadFile as u8, len: body.len() as u64 });
    }
    let offset = read_u64(body, 0)?;
    let length = read_u64(body, 8)?;
    let filename = String::from_utf8(body[16..].to_vec())?;
    let rf = RemoteFilename::decode(&filename)?;

    let content = if let Some(trunk) = rf.trunk {
        let container_path = trunk_container::container_path(state.store.store_path(), trunk.trunk_file_id);
        let (_header, payload) = trunk_container::read_slot(&container_path, trunk.offset)?;
        payload
    } else {
        state.store.download(&filename)?
    };
    Ok(Bytes::from(slice_range(content, offset, length)))
}

fn slice_range(content: Vec<u8>, offset: u64, length: u64) -> Vec<u8> {
    let start = (offset as usize).min(content.len());
    let end = if length == 0 { content.len() } else { start.saturating_add(length as usize).min(content.len()) };
    content[start..end].to_vec()
}

async fn query_file_info(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    let (_group, filename) = split_group_and_name(body)?;
    let rf = RemoteFilename::decode(&filename)?;
    let (file_size, crc32, create_time) = if let Some(trunk) = rf.trunk {
        let container_path = trunk_container::container_path(state.store.store_path(), trunk.trunk_file_id);
        let (header, _payload) = trunk_container::read_slot(&container_path, trunk.offset)?;
        (header.file_size as u64, header.crc32, rf.payload.create_time as u64)
    } else {
        let info = state.store.file_info(&filename, &local_ip(state))?;
        (info.file_size, info.crc32, info.create_time)
    };
    let mut out = BytesMut::with_capacity(8 + 8 + 4 + IP_ADDRESS_SIZE);
    out.put_u64(file_size);
    out.put_u64(create_time);
    out.put_u32(crc32);
    out.extend_from_slice(&pad_string(&local_ip(state), IP_ADDRESS_SIZE));
    Ok(out.freeze())
}

/// Body: `{ filename_len: u64, meta_len: u64, flag: u8, group: [u8;15], filename, meta }`.
async fn set_metadata(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    const HEADER_LEN: usize = 8 + 8 + 1 + FDFS_GROUP_NAME_MAX_LEN;
    if body.len() < HEADER_LEN {
        return Err(CoreError::WrongBodyLength { cmd: StorageCommand::SetMetadata as u8, len: body.len() as u64 });
    }
    let filename_len = read_u64(body, 0)? as usize;
    let meta_len = read_u64(body, 8)? as usize;
    let flag_byte = body[16];
    let flag = if flag_byte == MetadataFlag::Overwrite as u8 { MetadataFlag::Overwrite } else { MetadataFlag::Merge };
    let _group = read_fixed_str(body, 17, FDFS_GROUP_NAME_MAX_LEN)?;
    let filename_off = HEADER_LEN;
    let meta_off = filename_off + filename_len;
    if body.len() < meta_off + meta_len {
        return Err(CoreError::WrongBodyLength { cmd: StorageCommand::SetMetadata as u8, len: body.len() as u64 });
    }
    let filename = String::from_utf8(body[filename_off..filename_off + filename_len].to_vec())?;
    let meta: Metadata = fdfs_core::metadata::decode_metadata(&body[meta_off..meta_off + meta_len])?;

    state.store.set_metadata(&filename, &meta, flag)?;
    state
        .binlog
        .append(&BinlogRecord {
            timestamp: now_secs(),
            op: BinlogOp::SetMetadata,
            group: state.config.group_name.clone(),
            filename,
            source_storage_id: state.config.storage_id.clone(),
        })
        .await?;
    Ok(Bytes::new())
}

async fn get_metadata(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    let (_group, filename) = split_group_and_name(body)?;
    let meta = state.store.get_metadata(&filename)?;
    Ok(fdfs_core::metadata::encode_metadata(&meta))
}

/// Body: `{ group: [u8;15], data_len: u64, filename_len: u64, data, filename }`.
async fn append_file(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    let _group = read_fixed_str(body, 0, FDFS_GROUP_NAME_MAX_LEN)?;
    let data_len = read_u64(body, FDFS_GROUP_NAME_MAX_LEN)? as usize;
    let filename_len = read_u64(body, FDFS_GROUP_NAME_MAX_LEN + 8)? as usize;
    let data_off = FDFS_GROUP_NAME_MAX_LEN + 16;
    let filename_off = data_off + data_len;
    if body.len() < filename_off + filename_len {
        return Err(CoreError::WrongBodyLength { cmd: StorageCommand::AppendFile as u8, len: body.len() as u64 });
    }
    let data = &body[data_off..data_off + data_len];
    let filename = String::from_utf8(body[filename_off..filename_off + filename_len].to_vec())?;

    state.store.append(&filename, data)?;
    state
        .binlog
        .append(&BinlogRecord {
            timestamp: now_secs(),
            op: BinlogOp::Append,
            group: state.config.group_name.clone(),
            filename,
            source_storage_id: state.config.storage_id.clone(),
        })
        .await?;
    Ok(Bytes::new())
}

/// Body: `{ group: [u8;15], offset: u64, data_len: u64, filename_len: u64, data, filename }`.
async fn modify_file(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    let _group = read_fixed_str(body, 0, FDFS_GROUP_NAME_MAX_LEN)?;
    let offset = read_u64(body, FDFS_GROUP_NAME_MAX_LEN)?;
    let data_len = read_u64(body, FDFS_GROUP_NAME_MAX_LEN + 8)? as usize;
    let filename_len = read_u64(body, FDFS_GROUP_NAME_MAX_LEN + 16)? as usize;
    let data_off = FDFS_GROUP_NAME_MAX_LEN + 24;
    let filename_off = data_off + data_len;
    if body.len() < filename_off + filename_len {
        return Err(CoreError::WrongBodyLength { cmd: StorageCommand::ModifyFile as u8, len: body.len() as u64 });
    }
    let data = &body[data_off..data_off + data_len];
    let filename = String::from_utf8(body[filename_off..filename_off + filename_len].to_vec())?;

    state.store.modify(&filename, offset, data)?;
    state
        .binlog
        .append(&BinlogRecord {
            timestamp: now_secs(),
            op: BinlogOp::Modify,
            group: state.config.group_name.clone(),
            filename,
            source_storage_id: state.config.storage_id.clone(),
        })
        .await?;
    Ok(Bytes::new())
}

/// Body: `{ group: [u8;15], size: u64, filename: rest }`.
async fn truncate_file(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    let _group = read_fixed_str(body, 0, FDFS_GROUP_NAME_MAX_LEN)?;
    let size = read_u64(body, FDFS_GROUP_NAME_MAX_LEN)?;
    let filename = String::from_utf8(body[FDFS_GROUP_NAME_MAX_LEN + 8..].to_vec())?;

    state.store.truncate(&filename, size)?;
    state
        .binlog
        .append(&BinlogRecord {
            timestamp: now_secs(),
            op: BinlogOp::Truncate,
            group: state.config.group_name.clone(),
            filename,
            source_storage_id: state.config.storage_id.clone(),
        })
        .await?;
    Ok(Bytes::new())
}

/// Mints a fresh name for an existing appender file's content, without
/// moving any bytes: the new remote filename is handed back to the caller,
/// who is responsible for updating whatever references the old one.
async fn regenerate_appender_filename(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    let (_group, old_name) = split_group_and_name(body)?;
    let content = state.store.download(&old_name)?;
    let ext = get_file_ext_name(&old_name);
    let new_name = state.store.upload(&content, &ext, 0, state.next_random())?;
    state.store.delete(&old_name)?;
    Ok(Bytes::from(new_name.into_bytes()))
}

/// Body: `{ store_path_index: u8, size: u32 }`.
async fn trunk_alloc_space(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    let index = *body.first().ok_or(CoreError::WrongBodyLength { cmd: StorageCommand::TrunkAllocSpace as u8, len: 0 })?;
    if body.len() < 5 {
        return Err(CoreError::WrongBodyLength { cmd: StorageCommand::TrunkAllocSpace as u8, len: body.len() as u64 });
    }
    let size = (&body[1..5]).get_u32();

    let trunk_index = state.trunk_index.as_ref().ok_or(CoreError::TrunkServerUnavailable)?;
    let block = trunk_index.alloc_space(index, size).await?.ok_or(CoreError::InsufficientSpace)?;
    Ok(Bytes::from(block.encode().into_bytes()))
}

/// Body: the encoded [`TrunkFullInfo`] followed by a one-byte confirm status
/// (`0` success, `1` collision, `2` failed).
async fn trunk_alloc_confirm(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    let text = String::from_utf8(body[..body.len().saturating_sub(1)].to_vec())?;
    let block = TrunkFullInfo::decode(text.trim_end())?;
    let status = match body.last() {
        Some(1) => ConfirmStatus::Collision,
        Some(2) => ConfirmStatus::Failed,
        _ => ConfirmStatus::Success,
    };
    let trunk_index = state.trunk_index.as_ref().ok_or(CoreError::TrunkServerUnavailable)?;
    trunk_index.alloc_confirm(block, status).await?;
    Ok(Bytes::new())
}

async fn trunk_free_space(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    let text = String::from_utf8(body.to_vec())?;
    let block = TrunkFullInfo::decode(text.trim_end())?;
    let trunk_index = state.trunk_index.as_ref().ok_or(CoreError::TrunkServerUnavailable)?;
    trunk_index.free_space(block).await?;
    Ok(Bytes::new())
}

/// Ingests a raw chunk of a peer's storage binlog. This simplified sync
/// ingestion only mirrors the metadata stream into the local binlog for
/// further downstream propagation; it does not re-fetch and replay each
/// remote file's bytes onto local disk, unlike a full bidirectional mirror.
async fn ingest_sync_binlog(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    let mut file = state.binlog.path().to_path_buf();
    file.set_extension("incoming");
    let mut f = tokio::fs::OpenOptions::new().create(true).append(true).open(&file).await?;
    f.write_all(body).await?;
    f.sync_data().await?;
    Ok(Bytes::new())
}

async fn ingest_trunk_sync_binlog(state: &Arc<StorageState>, body: &[u8]) -> Result<Bytes> {
    let mut file = state.trunk_binlog.path().to_path_buf();
    file.set_extension("incoming");
    let mut f = tokio::fs::OpenOptions::new().create(true).append(true).open(&file).await?;
    f.write_all(body).await?;
    f.sync_data().await?;
    Ok(Bytes::new())
}

fn local_ip(state: &Arc<StorageState>) -> String {
    state
        .config
        .bind_addr
        .rsplit_once(':')
        .map(|(ip, _)| ip.to_string())
        .unwrap_or_else(|| state.config.bind_addr.clone())
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
