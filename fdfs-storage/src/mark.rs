//! Per-peer mark files: `key=value` lines recording sync progress (§6).
//!
//! Grounded in the same atomic-rewrite persistence shape as
//! [`crate::persistence`]; a mark file is small enough to always be
//! rewritten in full rather than appended to.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fdfs_core::errors::{CoreError, Result};

use crate::persistence::{read_if_exists, write_atomic};

/// Sync progress against one peer: how far into the local binlog we've sent,
/// and when the peer last acknowledged a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkInfo {
    pub binlog_offset: u64,
    pub last_synced_timestamp: u64,
}

impl Default for MarkInfo {
    fn default() -> Self {
        Self { binlog_offset: 0, last_synced_timestamp: 0 }
    }
}

/// Loads the mark file for `peer_storage_id` under `dir`, defaulting to a
/// fresh zero-offset mark if none exists yet.
pub fn load(dir: &Path, peer_storage_id: &str) -> Result<MarkInfo> {
    let path = mark_path(dir, peer_storage_id);
    let Some(contents) = read_if_exists(&path)? else {
        return Ok(MarkInfo::default());
    };
    let mut fields: HashMap<String, String> = HashMap::new();
    for line in contents.lines() {
        if let Some((k, v)) = line.split_once('=') {
            fields.insert(k.to_string(), v.to_string());
        }
    }
    let get = |key: &str| -> Result<u64> {
        fields
            .get(key)
            .ok_or_else(|| CoreError::MalformedRecord(format!("mark file missing {key}")))?
            .parse()
            .map_err(|_| CoreError::MalformedRecord(format!("bad {key} in mark file")))
    };
    Ok(MarkInfo { binlog_offset: get("binlog_offset")?, last_synced_timestamp: get("last_synced_timestamp")? })
}

/// Atomically rewrites the mark file for `peer_storage_id`.
pub fn save(dir: &Path, peer_storage_id: &str, info: MarkInfo) -> Result<()> {
    let contents = format!(
        "binlog_offset={}\nlast_synced_timestamp={}\n",
        info.binlog_offset, info.last_synced_timestamp
    );
    write_atomic(&mark_path(dir, peer_storage_id), &contents)
}

fn mark_path(dir: &Path, peer_storage_id: &str) -> PathBuf {
    dir.join(format!("{peer_storage_id}.mark"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_defaults_to_zero() {
        let dir = tempdir().unwrap();
        let info = load(dir.path(), "peer1").unwrap();
        assert_eq!(info, MarkInfo::default());
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempdir().unwrap();
        let info = MarkInfo { binlog_offset: 4096, last_synced_timestamp: 1_700_000_000 };
        save(dir.path(), "peer1", info).unwrap();
        assert_eq!(load(dir.path(), "peer1").unwrap(), info);
    }
}
