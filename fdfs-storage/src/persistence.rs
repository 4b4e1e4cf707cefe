//! Atomic snapshot persistence, mirroring [`fdfs_tracker::persistence`]: write
//! to `<path>.tmp`, fsync, rename. Duplicated rather than shared because a
//! storage node and a tracker are separate deployables with no common
//! runtime dependency between them.

use std::io::Write;
use std::path::Path;

use fdfs_core::errors::Result;

/// Writes `contents` to `path` atomically (temp file + rename).
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(contents.as_bytes())?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads `path`, returning `None` if it doesn't exist yet.
pub fn read_if_exists(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.dat");
        write_atomic(&path, "hello\n").unwrap();
        assert_eq!(read_if_exists(&path).unwrap(), Some("hello\n".to_string()));
        assert!(!path.with_extension("tmp").exists());
    }
}
