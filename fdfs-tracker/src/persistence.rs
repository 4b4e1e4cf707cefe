//! Atomic snapshot persistence: write to a temp file, then rename.
//!
//! Grounded in the storage-side binlog/mark-file durability model the spec
//! calls for (§4.5): a crash mid-write must never leave a half-written
//! snapshot behind, so every snapshot is written to `<path>.tmp` and renamed
//! into place only after an `fsync`.

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

/// Reads `path`, returning `None` if it doesn't exist yet (first boot).
pub fn read_if_exists(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Appends a line to a changelog file, creating it if necessary.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    use std::io::Write as _;
    let mut f = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{line}")?;
    f.sync_data()?;
    Ok(())
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

    #[test]
    fn test_read_missing_returns_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.dat");
        assert!(read_if_exists(&path).unwrap().is_none());
    }

    #[test]
    fn test_append_line_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changelog.dat");
        append_line(&path, "1 100 storage1 INIT ACTIVE").unwrap();
        append_line(&path, "2 200 storage1 ACTIVE OFFLINE").unwrap();
        let contents = read_if_exists(&path).unwrap().unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
