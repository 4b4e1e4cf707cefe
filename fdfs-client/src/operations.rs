//! File, metadata, and query operations, built on the shared wire codec.
//!
//! Grounded in the teacher's `operations.rs`: same request-building shape,
//! same retry-with-backoff wrapper around each public operation. Adapted to
//! route tracker requests through [`fdfs_core::TrackerGroupClient`] (the
//! teacher assumed a single tracker) and storage requests through a plain
//! [`fdfs_core::ConnectionPool`] keyed by whatever address the tracker handed
//! back.

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use fdfs_core::errors::{map_status_to_error, CoreError, Result};
use fdfs_core::metadata::{decode_metadata, encode_metadata};
use fdfs_core::protocol::{
    decode_header, decode_int32, decode_int64, encode_header, encode_int64, get_file_ext_name,
    join_file_id, pad_string, split_file_id, unpad_string,
};
use fdfs_core::types::{
    FileInfo, Metadata, MetadataFlag, StorageCommand, StorageEndpoint, TrackerCommand,
    FDFS_FILE_EXT_NAME_MAX_LEN, FDFS_GROUP_NAME_MAX_LEN, FDFS_PROTO_HEADER_LEN, IP_ADDRESS_SIZE,
};
use fdfs_core::{Connection, ConnectionPool, TrackerGroupClient};

/// Handles all client-facing file operations. Used internally by [`crate::Client`].
pub struct Operations {
    tracker: Arc<TrackerGroupClient>,
    storage_pool: Arc<ConnectionPool>,
    network_timeout: u64,
    retry_count: usize,
    max_pkg_size: u64,
}

impl Operations {
    /// Creates a new operations handler.
    pub fn new(
        tracker: Arc<TrackerGroupClient>,
        storage_pool: Arc<ConnectionPool>,
        network_timeout: u64,
        retry_count: usize,
        max_pkg_size: u64,
    ) -> Self {
        Self { tracker, storage_pool, network_timeout, retry_count, max_pkg_size }
    }

    async fn with_retry<F, Fut, T>(&self, op_name: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for attempt in 0..self.retry_count.max(1) {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let retry_worthy = !matches!(
                        e,
                        CoreError::FileNotFound(_) | CoreError::AlreadyExists(_) | CoreError::InvalidArgument(_)
                    );
                    if !retry_worthy || attempt + 1 == self.retry_count.max(1) {
                        return Err(e);
                    }
                    last_err = Some(e);
                    sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CoreError::InvalidState(format!("{op_name} failed with no attempts"))))
    }

    /// Uploads a file from the local filesystem.
    pub async fn upload_file(
        &self,
        local_filename: &str,
        metadata: Option<&Metadata>,
        is_appender: bool,
    ) -> Result<String> {
        let file_data = std::fs::read(local_filename)?;
        let ext_name = get_file_ext_name(local_filename);
        self.upload_buffer(&file_data, &ext_name, metadata, is_appender).await
    }

    /// Uploads data from a buffer.
    pub async fn upload_buffer(
        &self,
        data: &[u8],
        file_ext_name: &str,
        metadata: Option<&Metadata>,
        is_appender: bool,
    ) -> Result<String> {
        self.with_retry("upload", || self.upload_buffer_internal(data, file_ext_name, metadata, is_appender)).await
    }

    async fn upload_buffer_internal(
        &self,
        data: &[u8],
        file_ext_name: &str,
        metadata: Option<&Metadata>,
        is_appender: bool,
    ) -> Result<String> {
        let storage_server = self.get_storage_server("").await?;
        let storage_addr = storage_server.addr();
        let mut conn = self.storage_pool.acquire(&storage_addr).await?;

        let cmd = if is_appender { StorageCommand::UploadAppenderFile } else { StorageCommand::UploadFile };
        let ext_name_bytes = pad_string(file_ext_name, FDFS_FILE_EXT_NAME_MAX_LEN);
        let body_len = 1 + FDFS_FILE_EXT_NAME_MAX_LEN + data.len();
        let req_header = encode_header(body_len as u64, cmd.into(), 0);

        let result = async {
            conn.send(&req_header, self.network_timeout).await?;
            conn.send(&[storage_server.store_path_index], self.network_timeout).await?;
            conn.send(&ext_name_bytes, self.network_timeout).await?;
            conn.send(data, self.network_timeout).await?;

            let resp_header = self.read_header(&mut conn).await?;
            let resp_body = self.read_body(&mut conn, &resp_header).await?;
            if resp_body.len() < FDFS_GROUP_NAME_MAX_LEN {
                return Err(CoreError::Protocol { code: 255, message: "upload response body too short".to_string() });
            }

            let group_name = unpad_string(&resp_body[..FDFS_GROUP_NAME_MAX_LEN]);
            let remote_filename = String::from_utf8_lossy(&resp_body[FDFS_GROUP_NAME_MAX_LEN..]).to_string();
            Ok(join_file_id(&group_name, &remote_filename))
        }
        .await;

        self.release(conn, &result).await;
        let file_id = result?;

        if let Some(meta) = metadata {
            if !meta.is_empty() {
                let _ = self.set_metadata(&file_id, meta, MetadataFlag::Overwrite).await;
            }
        }
        Ok(file_id)
    }

    async fn get_storage_server(&self, group_name: &str) -> Result<StorageEndpoint> {
        let (cmd, body) = if group_name.is_empty() {
            (TrackerCommand::ServiceQueryStoreWithoutGroupOne, Bytes::new())
        } else {
            (TrackerCommand::ServiceQueryStoreWithGroupOne, pad_string(group_name, FDFS_GROUP_NAME_MAX_LEN))
        };

        let (_header, resp_body) = self.tracker.request(cmd.into(), &body).await?;
        if resp_body.len() < FDFS_GROUP_NAME_MAX_LEN + IP_ADDRESS_SIZE + 9 {
            return Err(CoreError::NoStorageServer);
        }

        let mut offset = FDFS_GROUP_NAME_MAX_LEN;
        let ip_addr = unpad_string(&resp_body[offset..offset + IP_ADDRESS_SIZE]);
        offset += IP_ADDRESS_SIZE;
        let port = decode_int64(&resp_body[offset..offset + 8]) as u16;
        offset += 8;
        let store_path_index = resp_body[offset];

        Ok(StorageEndpoint { ip_addr, port, store_path_index })
    }

    async fn get_file_storage_server(&self, group_name: &str, remote_filename: &str) -> Result<StorageEndpoint> {
        let remote_filename_bytes = remote_filename.as_bytes();
        let mut body = BytesMut::with_capacity(FDFS_GROUP_NAME_MAX_LEN + remote_filename_bytes.len());
        body.put(pad_string(group_name, FDFS_GROUP_NAME_MAX_LEN).as_ref());
        body.put_slice(remote_filename_bytes);

        let (_header, resp_body) =
            self.tracker.request(TrackerCommand::ServiceQueryFetchOne.into(), &body).await?;
        if resp_body.len() < FDFS_GROUP_NAME_MAX_LEN + IP_ADDRESS_SIZE + 8 {
            return Err(CoreError::FileNotFound(join_file_id(group_name, remote_filename)));
        }

        let mut offset = FDFS_GROUP_NAME_MAX_LEN;
        let ip_addr = unpad_string(&resp_body[offset..offset + IP_ADDRESS_SIZE]);
        offset += IP_ADDRESS_SIZE;
        let port = decode_int64(&resp_body[offset..offset + 8]) as u16;

        Ok(StorageEndpoint { ip_addr, port, store_path_index: 0 })
    }

    async fn read_header(&self, conn: &mut Connection) -> Result<fdfs_core::types::FrameHeader> {
        let header_bytes = conn.receive_full(FDFS_PROTO_HEADER_LEN, self.network_timeout).await?;
        let header = decode_header(&header_bytes, self.max_pkg_size)?;
        if header.status != 0 {
            if header.length > 0 {
                let _ = conn.receive_full(header.length as usize, self.network_timeout).await;
            }
            if let Some(err) = map_status_to_error(header.status) {
                return Err(err);
            }
        }
        Ok(header)
    }

    async fn read_body(&self, conn: &mut Connection, header: &fdfs_core::types::FrameHeader) -> Result<Bytes> {
        if header.length == 0 {
            return Ok(Bytes::new());
        }
        conn.receive_full(header.length as usize, self.network_timeout).await
    }

    async fn release<T>(&self, conn: Connection, result: &Result<T>) {
        let keep = match result {
            Ok(_) => true,
            Err(e) => !e.closes_connection(),
        };
        self.storage_pool.release(conn, keep).await;
    }

    /// Downloads a whole file.
    pub async fn download_file(&self, file_id: &str, offset: u64, length: u64) -> Result<Bytes> {
        self.with_retry("download", || self.download_file_internal(file_id, offset, length)).await
    }

    async fn download_file_internal(&self, file_id: &str, offset: u64, length: u64) -> Result<Bytes> {
        let (group_name, remote_filename) = split_file_id(file_id)?;
        let storage_server = self.get_file_storage_server(&group_name, &remote_filename).await?;
        let mut conn = self.storage_pool.acquire(&storage_server.addr()).await?;

        let remote_filename_bytes = remote_filename.as_bytes();
        let body_len = 16 + remote_filename_bytes.len();
        let header = encode_header(body_len as u64, StorageCommand::DownloadFile.into(), 0);

        let mut body = BytesMut::with_capacity(body_len);
        body.put(encode_int64(offset).as_ref());
        body.put(encode_int64(length).as_ref());
        body.put_slice(remote_filename_bytes);

        let result = async {
            conn.send(&header, self.network_timeout).await?;
            conn.send(&body, self.network_timeout).await?;
            let resp_header = self.read_header(&mut conn).await?;
            self.read_body(&mut conn, &resp_header).await
        }
        .await;

        self.release(conn, &result).await;
        result
    }

    /// Downloads a file and writes it to the local filesystem.
    pub async fn download_to_file(&self, file_id: &str, local_filename: &str) -> Result<()> {
        let data = self.download_file(file_id, 0, 0).await?;
        std::fs::write(local_filename, &data)?;
        Ok(())
    }

    /// Deletes a file.
    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.with_retry("delete", || self.delete_file_internal(file_id)).await
    }

    async fn delete_file_internal(&self, file_id: &str) -> Result<()> {
        let (group_name, remote_filename) = split_file_id(file_id)?;
        let storage_server = self.get_file_storage_server(&group_name, &remote_filename).await?;
        let mut conn = self.storage_pool.acquire(&storage_server.addr()).await?;

        let remote_filename_bytes = remote_filename.as_bytes();
        let body_len = FDFS_GROUP_NAME_MAX_LEN + remote_filename_bytes.len();
        let header = encode_header(body_len as u64, StorageCommand::DeleteFile.into(), 0);

        let mut body = BytesMut::with_capacity(body_len);
        body.put(pad_string(&group_name, FDFS_GROUP_NAME_MAX_LEN).as_ref());
        body.put_slice(remote_filename_bytes);

        let result = async {
            conn.send(&header, self.network_timeout).await?;
            conn.send(&body, self.network_timeout).await?;
            let resp_header = self.read_header(&mut conn).await?;
            let _ = self.read_body(&mut conn, &resp_header).await?;
            Ok(())
        }
        .await;

        self.release(conn, &result).await;
        result
    }

    /// Sets (or merges) a file's metadata.
    pub async fn set_metadata(&self, file_id: &str, metadata: &Metadata, flag: MetadataFlag) -> Result<()> {
        let (group_name, remote_filename) = split_file_id(file_id)?;
        let storage_server = self.get_file_storage_server(&group_name, &remote_filename).await?;
        let mut conn = self.storage_pool.acquire(&storage_server.addr()).await?;

        let metadata_bytes = encode_metadata(metadata);
        let remote_filename_bytes = remote_filename.as_bytes();
        let body_len =
            2 * 8 + 1 + FDFS_GROUP_NAME_MAX_LEN + remote_filename_bytes.len() + metadata_bytes.len();
        let header = encode_header(body_len as u64, StorageCommand::SetMetadata.into(), 0);

        let mut body = BytesMut::with_capacity(body_len);
        body.put(encode_int64(remote_filename_bytes.len() as u64).as_ref());
        body.put(encode_int64(metadata_bytes.len() as u64).as_ref());
        body.put_u8(flag.into());
        body.put(pad_string(&group_name, FDFS_GROUP_NAME_MAX_LEN).as_ref());
        body.put_slice(remote_filename_bytes);
        body.put(metadata_bytes.as_ref());

        let result = async {
            conn.send(&header, self.network_timeout).await?;
            conn.send(&body, self.network_timeout).await?;
            let resp_header = self.read_header(&mut conn).await?;
            let _ = self.read_body(&mut conn, &resp_header).await?;
            Ok(())
        }
        .await;

        self.release(conn, &result).await;
        result
    }

    /// Retrieves a file's metadata.
    pub async fn get_metadata(&self, file_id: &str) -> Result<Metadata> {
        let (group_name, remote_filename) = split_file_id(file_id)?;
        let storage_server = self.get_file_storage_server(&group_name, &remote_filename).await?;
        let mut conn = self.storage_pool.acquire(&storage_server.addr()).await?;

        let remote_filename_bytes = remote_filename.as_bytes();
        let body_len = FDFS_GROUP_NAME_MAX_LEN + remote_filename_bytes.len();
        let header = encode_header(body_len as u64, StorageCommand::GetMetadata.into(), 0);

        let mut body = BytesMut::with_capacity(body_len);
        body.put(pad_string(&group_name, FDFS_GROUP_NAME_MAX_LEN).as_ref());
        body.put_slice(remote_filename_bytes);

        let result = async {
            conn.send(&header, self.network_timeout).await?;
            conn.send(&body, self.network_timeout).await?;
            let resp_header = self.read_header(&mut conn).await?;
            let resp_body = self.read_body(&mut conn, &resp_header).await?;
            decode_metadata(&resp_body)
        }
        .await;

        self.release(conn, &result).await;
        result
    }

    /// Retrieves file size, creation time, CRC32, and the storage server
    /// that first received the upload.
    pub async fn get_file_info(&self, file_id: &str) -> Result<FileInfo> {
        let (group_name, remote_filename) = split_file_id(file_id)?;
        let storage_server = self.get_file_storage_server(&group_name, &remote_filename).await?;
        let mut conn = self.storage_pool.acquire(&storage_server.addr()).await?;

        let remote_filename_bytes = remote_filename.as_bytes();
        let body_len = FDFS_GROUP_NAME_MAX_LEN + remote_filename_bytes.len();
        let header = encode_header(body_len as u64, StorageCommand::QueryFileInfo.into(), 0);

        let mut body = BytesMut::with_capacity(body_len);
        body.put(pad_string(&group_name, FDFS_GROUP_NAME_MAX_LEN).as_ref());
        body.put_slice(remote_filename_bytes);

        let result = async {
            conn.send(&header, self.network_timeout).await?;
            conn.send(&body, self.network_timeout).await?;
            let resp_header = self.read_header(&mut conn).await?;
            let resp_body = self.read_body(&mut conn, &resp_header).await?;

            if resp_body.len() < 8 + 8 + 4 + IP_ADDRESS_SIZE {
                return Err(CoreError::Protocol { code: 255, message: "file info response too short".to_string() });
            }
            let file_size = decode_int64(&resp_body[0..8]);
            let create_time = decode_int64(&resp_body[8..16]);
            let crc32 = decode_int32(&resp_body[16..20]);
            let source_ip_addr = unpad_string(&resp_body[20..20 + IP_ADDRESS_SIZE]);
            Ok(FileInfo { file_size, create_time, crc32, source_ip_addr })
        }
        .await;

        self.release(conn, &result).await;
        result
    }
}
