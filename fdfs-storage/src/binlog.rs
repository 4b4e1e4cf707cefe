//! Storage binlog: an append-only text log of file operations (§3, §4.5).
//!
//! Grounded in [`fdfs_tracker::persistence`]'s append-only changelog, reused
//! here for the per-storage-node record of every mutation a sync peer needs
//! to replay. One record per line, `\n`-terminated, never rewritten in
//! place — only appended to and, eventually, truncated wholesale when a
//! destination is reseeded (§4.5 `TRUNCATE_BINLOG_FILE`).

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use fdfs_core::errors::{CoreError, Result};

/// The operation a binlog record names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinlogOp {
    Upload,
    Delete,
    Append,
    Modify,
    Truncate,
    SetMetadata,
}

impl BinlogOp {
    fn as_str(self) -> &'static str {
        match self {
            BinlogOp::Upload => "upload",
            BinlogOp::Delete => "delete",
            BinlogOp::Append => "append",
            BinlogOp::Modify => "modify",
            BinlogOp::Truncate => "truncate",
            BinlogOp::SetMetadata => "set_meta",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "upload" => BinlogOp::Upload,
            "delete" => BinlogOp::Delete,
            "append" => BinlogOp::Append,
            "modify" => BinlogOp::Modify,
            "truncate" => BinlogOp::Truncate,
            "set_meta" => BinlogOp::SetMetadata,
            other => return Err(CoreError::MalformedRecord(format!("unknown binlog op: {other}"))),
        })
    }
}

/// A single decoded binlog record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinlogRecord {
    pub timestamp: u64,
    pub op: BinlogOp,
    pub group: String,
    pub filename: String,
    pub source_storage_id: String,
}

impl BinlogRecord {
    fn encode(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.timestamp,
            self.op.as_str(),
            self.group,
            self.filename,
            self.source_storage_id
        )
    }

    fn decode(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.splitn(5, ' ').collect();
        if fields.len() != 5 {
            return Err(CoreError::MalformedRecord(format!("bad binlog record: {line}")));
        }
        Ok(Self {
            timestamp: fields[0]
                .parse()
                .map_err(|_| CoreError::MalformedRecord(format!("bad timestamp: {}", fields[0])))?,
            op: BinlogOp::from_str(fields[1])?,
            group: fields[2].to_string(),
            filename: fields[3].to_string(),
            source_storage_id: fields[4].to_string(),
        })
    }
}

/// An append-only writer for the local storage binlog, serialized by a
/// single lock per the concurrency model's "one lock per binlog" rule.
pub struct BinlogWriter {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl BinlogWriter {
    /// Opens (creating if needed) the binlog at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        Ok(Arc::new(Self { path, file: Mutex::new(file) }))
    }

    /// Appends one record, returning the binlog's new total length in bytes.
    pub async fn append(&self, record: &BinlogRecord) -> Result<u64> {
        let mut line = record.encode();
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(file.metadata()?.len())
    }

    /// Current length of the binlog in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Truncates the binlog to zero length, used when a destination is
    /// reseeded from scratch.
    pub async fn truncate(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads a prefix of the binlog starting at `offset`, up to `max_bytes`,
/// trimmed back to the last complete newline so a sync frame is always a
/// whole number of records (§4.5 "never reorders or batches across record
/// boundaries").
pub fn preread(path: &Path, offset: u64, max_bytes: usize) -> Result<(Vec<u8>, Vec<BinlogRecord>)> {
    let mut file = OpenOptions::new().read(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; max_bytes];
    let n = file.read(&mut buf)?;
    buf.truncate(n);

    let cut = match buf.iter().rposition(|&b| b == b'\n') {
        Some(pos) => pos + 1,
        None => 0,
    };
    buf.truncate(cut);

    let mut records = Vec::new();
    for line in String::from_utf8_lossy(&buf).lines() {
        if !line.is_empty() {
            records.push(BinlogRecord::decode(line)?);
        }
    }
    Ok((buf, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(filename: &str) -> BinlogRecord {
        BinlogRecord {
            timestamp: 1000,
            op: BinlogOp::Upload,
            group: "group1".to_string(),
            filename: filename.to_string(),
            source_storage_id: "storage1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_and_preread() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("binlog");
        let writer = BinlogWriter::open(&path).unwrap();
        writer.append(&sample("M00/00/00/a.jpg")).await.unwrap();
        writer.append(&sample("M00/00/00/b.jpg")).await.unwrap();

        let (bytes, records) = preread(&path, 0, 1 << 20).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].filename, "M00/00/00/a.jpg");
        assert_eq!(bytes.len() as u64, writer.len().unwrap());
    }

    #[tokio::test]
    async fn test_preread_stops_at_newline_boundary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("binlog");
        let writer = BinlogWriter::open(&path).unwrap();
        writer.append(&sample("a")).await.unwrap();
        writer.append(&sample("b")).await.unwrap();

        let full_len = writer.len().unwrap() as usize;
        let (bytes, records) = preread(&path, 0, full_len - 2).unwrap();
        assert_eq!(records.len(), 1);
        assert!(bytes.ends_with(b"\n"));
    }

    #[tokio::test]
    async fn test_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("binlog");
        let writer = BinlogWriter::open(&path).unwrap();
        writer.append(&sample("a")).await.unwrap();
        writer.truncate().await.unwrap();
        assert_eq!(writer.len().unwrap(), 0);
    }
}
