//! Local plain-file storage: upload/download/delete/append/modify/truncate
//! and metadata sidecar files for files not packed into a trunk container.
//!
//! Grounded in `fdfs_core::filename`'s `RemoteFilename` codec: the remote
//! filename a caller gets back doubles as the relative path under
//! `<store_path>/data`, so no separate directory lookup is needed.

use std::path::{Path, PathBuf};

use tracing::info;

use fdfs_core::errors::{CoreError, Result};
use fdfs_core::filename::{FilePayload, RemoteFilename, MASTER_FILE_PREFIX};
use fdfs_core::metadata::{apply_metadata_update, decode_metadata, encode_metadata};
use fdfs_core::types::{FileInfo, Metadata, MetadataFlag};

/// Local store for files addressed by their plain (non-trunk) remote
/// filename, rooted at a single store path.
pub struct FileStore {
    store_path: PathBuf,
    storage_id: u32,
}

impl FileStore {
    /// `store_path` is the configured store-path root; `storage_id` is this
    /// node's numeric id, embedded in every filename it mints.
    pub fn new(store_path: impl Into<PathBuf>, storage_id: u32) -> Self {
        Self { store_path: store_path.into(), storage_id }
    }

    fn data_path(&self, remote_filename: &str) -> PathBuf {
        self.store_path.join("data").join(remote_filename)
    }

    fn meta_path(&self, remote_filename: &str) -> PathBuf {
        let mut p = self.data_path(remote_filename).into_os_string();
        p.push(".meta");
        PathBuf::from(p)
    }

    /// Stores `content` as a brand-new file, minting its remote filename.
    /// Returns the remote filename (relative path, embedding the encoded
    /// metadata payload).
    pub fn upload(&self, content: &[u8], ext: &str, store_path_index: u8, random: u32) -> Result<String> {
        let crc32 = crc32fast::hash(content);
        let payload = FilePayload {
            source_storage_id: self.storage_id,
            create_time: now_secs(),
            file_size: content.len() as u64,
            crc32,
            random,
        };
        let remote_filename = RemoteFilename::new_plain(store_path_index, payload, ext).encode(MASTER_FILE_PREFIX);
        let path = self.data_path(&remote_filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        info!(remote_filename = %remote_filename, size = content.len(), "file uploaded");
        Ok(remote_filename)
    }

    /// Reads the full contents of a stored file.
    pub fn download(&self, remote_filename: &str) -> Result<Vec<u8>> {
        let path = self.data_path(remote_filename);
        std::fs::read(&path).map_err(|e| map_not_found(e, remote_filename))
    }

    /// Deletes a stored file and its metadata sidecar, if any. Deleting a
    /// file that doesn't exist returns `FileNotFound` on the first call and
    /// again on a retried second call — never corrupts state (§8).
    pub fn delete(&self, remote_filename: &str) -> Result<()> {
        let path = self.data_path(remote_filename);
        std::fs::remove_file(&path).map_err(|e| map_not_found(e, remote_filename))?;
        let _ = std::fs::remove_file(self.meta_path(remote_filename));
        Ok(())
    }

    /// Appends to an existing "appender" file.
    pub fn append(&self, remote_filename: &str, data: &[u8]) -> Result<()> {
        use std::io::Write;
        let path = self.data_path(remote_filename);
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| map_not_found(e, remote_filename))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Overwrites `data` at `offset` within an existing appender file.
    pub fn modify(&self, remote_filename: &str, offset: u64, data: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let path = self.data_path(remote_filename);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| map_not_found(e, remote_filename))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Truncates an existing appender file to `size` bytes.
    pub fn truncate(&self, remote_filename: &str, size: u64) -> Result<()> {
        let path = self.data_path(remote_filename);
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| map_not_found(e, remote_filename))?;
        file.set_len(size)?;
        Ok(())
    }

    /// Returns size/crc32/create-time/source-ip info about a stored file.
    pub fn file_info(&self, remote_filename: &str, source_ip: &str) -> Result<FileInfo> {
        let parsed = RemoteFilename::decode(remote_filename)?;
        let meta = std::fs::metadata(self.data_path(remote_filename)).map_err(|e| map_not_found(e, remote_filename))?;
        Ok(FileInfo {
            file_size: meta.len(),
            create_time: parsed.payload.create_time as u64,
            crc32: parsed.payload.crc32,
            source_ip_addr: source_ip.to_string(),
        })
    }

    /// Replaces or merges a file's metadata sidecar.
    pub fn set_metadata(&self, remote_filename: &str, update: &Metadata, flag: MetadataFlag) -> Result<()> {
        if !self.data_path(remote_filename).exists() {
            return Err(CoreError::FileNotFound(remote_filename.to_string()));
        }
        let mut existing = self.get_metadata(remote_filename).unwrap_or_default();
        apply_metadata_update(&mut existing, update, flag);
        std::fs::write(self.meta_path(remote_filename), encode_metadata(&existing))?;
        Ok(())
    }

    /// Reads a file's metadata sidecar, empty if none was ever set.
    pub fn get_metadata(&self, remote_filename: &str) -> Result<Metadata> {
        match std::fs::read(self.meta_path(remote_filename)) {
            Ok(bytes) => decode_metadata(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Metadata::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// This node's numeric id, as embedded in every filename it mints.
    pub fn storage_id(&self) -> u32 {
        self.storage_id
    }
}

fn map_not_found(e: std::io::Error, remote_filename: &str) -> CoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CoreError::FileNotFound(remote_filename.to_string())
    } else {
        CoreError::Io(e)
    }
}

fn now_secs() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_upload_download_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path(), 1);
        let name = store.upload(b"hello world", "txt", 0, 42).unwrap();
        assert_eq!(store.download(&name).unwrap(), b"hello world");
    }

    #[test]
    fn test_delete_twice_returns_not_found_second_time() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path(), 1);
        let name = store.upload(b"data", "bin", 0, 1).unwrap();
        store.delete(&name).unwrap();
        let err = store.delete(&name).unwrap_err();
        assert!(matches!(err, CoreError::FileNotFound(_)));
    }

    #[test]
    fn test_metadata_merge_and_overwrite() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path(), 1);
        let name = store.upload(b"data", "bin", 0, 1).unwrap();

        let mut meta1 = Metadata::new();
        meta1.insert("a".to_string(), "1".to_string());
        store.set_metadata(&name, &meta1, MetadataFlag::Overwrite).unwrap();

        let mut meta2 = Metadata::new();
        meta2.insert("b".to_string(), "2".to_string());
        store.set_metadata(&name, &meta2, MetadataFlag::Merge).unwrap();

        let result = store.get_metadata(&name).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_append_and_truncate() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path(), 1);
        let name = store.upload(b"hello", "txt", 0, 1).unwrap();
        store.append(&name, b" world").unwrap();
        assert_eq!(store.download(&name).unwrap(), b"hello world");
        store.truncate(&name, 5).unwrap();
        assert_eq!(store.download(&name).unwrap(), b"hello");
    }
}
