//! Trunk container file creation, layout, and slot header I/O (§4.7).
//!
//! A container is a fixed-size regular file under
//! `<store_path>/data/<HH>/<HH>/<id6>`; `sub_path_high`/`sub_path_low` are
//! derived by hashing the base64 of the trunk file id, the same
//! hash-then-split-into-two-hex-bytes idiom `fdfs_core::filename` uses for
//! plain files' subdirectories.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use fdfs_core::errors::{CoreError, Result};
use fdfs_core::types::{FDFS_FILE_EXT_NAME_MAX_LEN, TRUNK_FILE_ID_DIGITS, TRUNK_SLOT_HEADER_LEN};

/// Slot-type byte distinguishing a live slot from unwritten space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    /// Never written (or freed and zeroed); header presence marks this.
    None,
    /// A regular file payload.
    Regular,
    /// A symbolic link; payload is the target logical filename.
    SymLink,
}

impl SlotType {
    fn to_byte(self) -> u8 {
        match self {
            SlotType::None => 0,
            SlotType::Regular => b'F',
            SlotType::SymLink => b'L',
        }
    }

    fn from_byte(b: u8) -> Self {
        match b {
            b'F' => SlotType::Regular,
            b'L' => SlotType::SymLink,
            _ => SlotType::None,
        }
    }
}

/// The fixed header written at the start of every allocated trunk slot (§6):
/// `{ file_type: 1, alloc_size: i32, file_size: i32, crc32: i32, mtime: i32,
/// ext: fixed bytes }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotHeader {
    pub slot_type: SlotType,
    pub alloc_size: u32,
    pub file_size: u32,
    pub crc32: u32,
    pub mtime: u32,
    pub ext: String,
}

impl SlotHeader {
    fn to_bytes(&self) -> [u8; TRUNK_SLOT_HEADER_LEN] {
        let mut buf = [0u8; TRUNK_SLOT_HEADER_LEN];
        buf[0] = self.slot_type.to_byte();
        buf[1..5].copy_from_slice(&self.alloc_size.to_be_bytes());
        buf[5..9].copy_from_slice(&self.file_size.to_be_bytes());
        buf[9..13].copy_from_slice(&self.crc32.to_be_bytes());
        buf[13..17].copy_from_slice(&self.mtime.to_be_bytes());
        let ext_bytes = self.ext.as_bytes();
        let ext_len = ext_bytes.len().min(FDFS_FILE_EXT_NAME_MAX_LEN);
        buf[17..17 + ext_len].copy_from_slice(&ext_bytes[..ext_len]);
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < TRUNK_SLOT_HEADER_LEN {
            return Err(CoreError::ShortRead { expected: TRUNK_SLOT_HEADER_LEN, actual: buf.len() });
        }
        let end = buf[17..17 + FDFS_FILE_EXT_NAME_MAX_LEN]
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        Ok(Self {
            slot_type: SlotType::from_byte(buf[0]),
            alloc_size: u32::from_be_bytes(buf[1..5].try_into().unwrap()),
            file_size: u32::from_be_bytes(buf[5..9].try_into().unwrap()),
            crc32: u32::from_be_bytes(buf[9..13].try_into().unwrap()),
            mtime: u32::from_be_bytes(buf[13..17].try_into().unwrap()),
            ext: String::from_utf8_lossy(&buf[17..17 + end]).to_string(),
        })
    }
}

/// Derives the two-level subdirectory for a trunk container, hashing the
/// base64 of its numeric id the same way filenames derive their subdirs.
pub fn derive_container_subdir(trunk_file_id: u32) -> (u8, u8) {
    let encoded = URL_SAFE_NO_PAD.encode(trunk_file_id.to_be_bytes());
    let h = crc32fast::hash(encoded.as_bytes());
    ((h & 0xFF) as u8, ((h >> 8) & 0xFF) as u8)
}

/// Path to a container file under `store_path/data`.
pub fn container_path(store_path: &Path, trunk_file_id: u32) -> PathBuf {
    let (high, low) = derive_container_subdir(trunk_file_id);
    store_path
        .join("data")
        .join(format!("{high:02x}"))
        .join(format!("{low:02x}"))
        .join(format!("{:0width$}", trunk_file_id, width = TRUNK_FILE_ID_DIGITS))
}

/// Creates a fresh container file of exactly `trunk_file_size` bytes
/// (create-then-truncate), or verifies an existing one is at least that
/// large, growing it if smaller.
pub fn ensure_container(store_path: &Path, trunk_file_id: u32, trunk_file_size: u64) -> Result<PathBuf> {
    let path = container_path(store_path, trunk_file_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).write(true).read(true).open(&path)?;
    let current_len = file.metadata()?.len();
    if current_len < trunk_file_size {
        file.set_len(trunk_file_size)?;
    }
    Ok(path)
}

/// Writes a slot header + payload at `offset` inside a container.
pub fn write_slot(container_path: &Path, offset: u64, header: &SlotHeader, payload: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().write(true).open(container_path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&header.to_bytes())?;
    file.write_all(payload)?;
    Ok(())
}

/// Reads a slot header + `file_size` payload bytes from `offset`.
pub fn read_slot(container_path: &Path, offset: u64) -> Result<(SlotHeader, Vec<u8>)> {
    let mut file = OpenOptions::new().read(true).open(container_path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut header_buf = [0u8; TRUNK_SLOT_HEADER_LEN];
    file.read_exact(&mut header_buf)?;
    let header = SlotHeader::from_bytes(&header_buf)?;
    let mut payload = vec![0u8; header.file_size as usize];
    file.read_exact(&mut payload)?;
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_container_creates_exact_size() {
        let dir = tempdir().unwrap();
        let path = ensure_container(dir.path(), 1, 65536).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 65536);
    }

    #[test]
    fn test_ensure_container_grows_undersized_file() {
        let dir = tempdir().unwrap();
        let path = container_path(dir.path(), 1);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"short").unwrap();

        ensure_container(dir.path(), 1, 65536).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 65536);
    }

    #[test]
    fn test_slot_header_roundtrip() {
        let dir = tempdir().unwrap();
        let path = ensure_container(dir.path(), 1, 65536).unwrap();
        let header = SlotHeader {
            slot_type: SlotType::Regular,
            alloc_size: 1024,
            file_size: 11,
            crc32: 0xdead_beef,
            mtime: 1_700_000_000,
            ext: "jpg".to_string(),
        };
        write_slot(&path, 0, &header, b"hello world").unwrap();
        let (read_header, payload) = read_slot(&path, 0).unwrap();
        assert_eq!(read_header, header);
        assert_eq!(payload, b"hello world");
    }
}
