//! Async client library for a FastDFS-style tracker/storage cluster.
//!
//! Provides a high-level, type-safe API for interacting with tracker and
//! storage servers: upload (normal, appender, with metadata), download
//! (full and ranged), delete, and metadata/query operations, over a pooled
//! connection to whichever tracker in the configured list answers first.
//!
//! # Example
//!
//! ```no_run
//! use fdfs_client::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new(vec!["192.168.1.100:22122".to_string()]);
//!     let client = Client::new(config)?;
//!
//!     let file_id = client.upload_buffer(b"Hello, world!", "txt", None).await?;
//!     let data = client.download_file(&file_id).await?;
//!     client.delete_file(&file_id).await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod operations;
mod types;

pub use client::Client;
pub use fdfs_core::errors::{CoreError, Result};
pub use fdfs_core::types::{
    FileInfo, Metadata, MetadataFlag, StorageCommand, StorageEndpoint, StorageStatus, TrackerCommand,
};
pub use types::ClientConfig;