//! High-level client facade over [`crate::operations::Operations`].

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use fdfs_core::errors::{CoreError, Result};
use fdfs_core::types::{FileInfo, Metadata, MetadataFlag};
use fdfs_core::{ConnectionPool, TrackerGroupClient};

use crate::operations::Operations;
use crate::types::ClientConfig;

/// Async client for the tracker/storage cluster.
///
/// Handles tracker failover, per-endpoint connection pooling, and retries.
///
/// # Example
///
/// ```no_run
/// use fdfs_client::{Client, ClientConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::new(vec!["192.168.1.100:22122".to_string()]);
///     let client = Client::new(config)?;
///
///     let file_id = client.upload_buffer(b"Hello, world!", "txt", None).await?;
///     let data = client.download_file(&file_id).await?;
///     client.delete_file(&file_id).await?;
///
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct Client {
    tracker_pool: Arc<ConnectionPool>,
    storage_pool: Arc<ConnectionPool>,
    ops: Arc<Operations>,
    closed: Arc<RwLock<bool>>,
}

impl Client {
    /// Creates a new client from `config`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::validate_config(&config)?;

        let tracker_pool = ConnectionPool::new(
            config.max_conns,
            Duration::from_millis(config.connect_timeout),
            Duration::from_millis(config.idle_timeout),
        );
        let storage_pool = ConnectionPool::new(
            config.max_conns,
            Duration::from_millis(config.connect_timeout),
            Duration::from_millis(config.idle_timeout),
        );

        let tracker = Arc::new(TrackerGroupClient::new(
            config.tracker_addrs.clone(),
            tracker_pool.clone(),
            config.network_timeout,
            config.max_pkg_size,
        )?);

        let ops = Arc::new(Operations::new(
            tracker,
            storage_pool.clone(),
            config.network_timeout,
            config.retry_count,
            config.max_pkg_size,
        ));

        Ok(Self { tracker_pool, storage_pool, ops, closed: Arc::new(RwLock::new(false)) })
    }

    fn validate_config(config: &ClientConfig) -> Result<()> {
        if config.tracker_addrs.is_empty() {
            return Err(CoreError::InvalidArgument("tracker addresses are required".to_string()));
        }
        for addr in &config.tracker_addrs {
            if addr.is_empty() || !addr.contains(':') {
                return Err(CoreError::InvalidArgument(format!("invalid tracker address: {addr}")));
            }
        }
        Ok(())
    }

    async fn check_closed(&self) -> Result<()> {
        if *self.closed.read().await {
            return Err(CoreError::Closed);
        }
        Ok(())
    }

    /// Uploads a file from the local filesystem.
    pub async fn upload_file(&self, local_filename: &str, metadata: Option<&Metadata>) -> Result<String> {
        self.check_closed().await?;
        self.ops.upload_file(local_filename, metadata, false).await
    }

    /// Uploads data from a buffer.
    pub async fn upload_buffer(
        &self,
        data: &[u8],
        file_ext_name: &str,
        metadata: Option<&Metadata>,
    ) -> Result<String> {
        self.check_closed().await?;
        self.ops.upload_buffer(data, file_ext_name, metadata, false).await
    }

    /// Uploads an appender file, which can be extended later with [`Client::append_file`].
    pub async fn upload_appender_file(
        &self,
        local_filename: &str,
        metadata: Option<&Metadata>,
    ) -> Result<String> {
        self.check_closed().await?;
        self.ops.upload_file(local_filename, metadata, true).await
    }

    /// Uploads an appender file from a buffer.
    pub async fn upload_appender_buffer(
        &self,
        data: &[u8],
        file_ext_name: &str,
        metadata: Option<&Metadata>,
    ) -> Result<String> {
        self.check_closed().await?;
        self.ops.upload_buffer(data, file_ext_name, metadata, true).await
    }

    /// Downloads a whole file.
    pub async fn download_file(&self, file_id: &str) -> Result<Bytes> {
        self.check_closed().await?;
        self.ops.download_file(file_id, 0, 0).await
    }

    /// Downloads a byte range of a file.
    pub async fn download_file_range(&self, file_id: &str, offset: u64, length: u64) -> Result<Bytes> {
        self.check_closed().await?;
        self.ops.download_file(file_id, offset, length).await
    }

    /// Downloads a file straight to the local filesystem.
    pub async fn download_to_file(&self, file_id: &str, local_filename: &str) -> Result<()> {
        self.check_closed().await?;
        self.ops.download_to_file(file_id, local_filename).await
    }

    /// Deletes a file.
    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.check_closed().await?;
        self.ops.delete_file(file_id).await
    }

    /// Sets (or merges) a file's metadata.
    pub async fn set_metadata(&self, file_id: &str, metadata: &Metadata, flag: MetadataFlag) -> Result<()> {
        self.check_closed().await?;
        self.ops.set_metadata(file_id, metadata, flag).await
    }

    /// Retrieves a file's metadata.
    pub async fn get_metadata(&self, file_id: &str) -> Result<Metadata> {
        self.check_closed().await?;
        self.ops.get_metadata(file_id).await
    }

    /// Retrieves file size, creation time, and CRC32.
    pub async fn get_file_info(&self, file_id: &str) -> Result<FileInfo> {
        self.check_closed().await?;
        self.ops.get_file_info(file_id).await
    }

    /// Whether a file currently exists (a `QUERY_FILE_INFO` round trip).
    pub async fn file_exists(&self, file_id: &str) -> bool {
        self.check_closed().await.is_ok() && self.ops.get_file_info(file_id).await.is_ok()
    }

    /// Shuts the client down. Safe to call more than once.
    pub async fn close(&self) {
        let mut closed = self.closed.write().await;
        if *closed {
            return;
        }
        *closed = true;
        drop(closed);

        self.tracker_pool.close().await;
        self.storage_pool.close().await;
    }
}
