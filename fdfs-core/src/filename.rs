//! File identifier and remote-filename encoding (§3, §6).
//!
//! A remote filename is self-describing: the tracker never needs a lookup to
//! route a read, because the store-path index, the two-level subdirectory,
//! and a base64-encoded payload carrying the source storage id, create
//! timestamp, file size, CRC32, and a disambiguating random value are all
//! embedded directly in the name. Trunk-backed files carry a second base64
//! segment addressing the slot inside its container, and the high bit of
//! the outer payload's `file_size` field marks "this is a trunk-backed
//! file" (§6).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::errors::{CoreError, Result};
use crate::types::{FDFS_FILE_EXT_NAME_MAX_LEN, TRUNK_FILE_SIZE_FLAG};

/// Default prefix for master (non-slave) files, as real FastDFS deployments
/// use ("M" + two-digit store-path index, e.g. `M00`).
pub const MASTER_FILE_PREFIX: &str = "M";

/// The fixed-size payload embedded (base64-encoded) in every remote filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePayload {
    /// Numeric id of the storage server that first received the upload.
    pub source_storage_id: u32,
    /// Unix timestamp (seconds) the file was created.
    pub create_time: u32,
    /// File size in bytes. The high bit is reserved as the trunk-backed flag.
    pub file_size: u64,
    /// CRC32 checksum of the file contents.
    pub crc32: u32,
    /// Random disambiguator so two files created in the same second with the
    /// same size don't collide.
    pub random: u32,
}

const PAYLOAD_LEN: usize = 4 + 4 + 8 + 4 + 4;

impl FilePayload {
    /// True if the high bit of `file_size` marks this as a trunk-backed file.
    pub fn is_trunk_backed(&self) -> bool {
        self.file_size & TRUNK_FILE_SIZE_FLAG != 0
    }

    /// The real file size, with the trunk-backed flag bit masked off.
    pub fn real_file_size(&self) -> u64 {
        self.file_size & !TRUNK_FILE_SIZE_FLAG
    }

    fn to_bytes(self) -> [u8; PAYLOAD_LEN] {
        let mut buf = [0u8; PAYLOAD_LEN];
        buf[0..4].copy_from_slice(&self.source_storage_id.to_be_bytes());
        buf[4..8].copy_from_slice(&self.create_time.to_be_bytes());
        buf[8..16].copy_from_slice(&self.file_size.to_be_bytes());
        buf[16..20].copy_from_slice(&self.crc32.to_be_bytes());
        buf[20..24].copy_from_slice(&self.random.to_be_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < PAYLOAD_LEN {
            return Err(CoreError::InvalidField("short file payload".to_string()));
        }
        Ok(Self {
            source_storage_id: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            create_time: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            file_size: u64::from_be_bytes(buf[8..16].try_into().unwrap()),
            crc32: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
            random: u32::from_be_bytes(buf[20..24].try_into().unwrap()),
        })
    }

    /// Base64-encodes the payload (URL-safe, unpadded).
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    /// Decodes a base64 payload segment.
    pub fn decode(s: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| CoreError::InvalidField(format!("bad file payload base64: {e}")))?;
        Self::from_bytes(&raw)
    }
}

/// The second base64 segment carried by a trunk-backed file, addressing the
/// slot inside its container (§3 trunk full info, minus path/status which
/// come from the surrounding directory structure and live index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrunkPayload {
    /// Numeric id of the container file.
    pub trunk_file_id: u32,
    /// Byte offset of the slot inside the container.
    pub offset: u64,
    /// Size of the slot (header + payload).
    pub size: u32,
}

const TRUNK_PAYLOAD_LEN: usize = 4 + 8 + 4;

impl TrunkPayload {
    fn to_bytes(self) -> [u8; TRUNK_PAYLOAD_LEN] {
        let mut buf = [0u8; TRUNK_PAYLOAD_LEN];
        buf[0..4].copy_from_slice(&self.trunk_file_id.to_be_bytes());
        buf[4..12].copy_from_slice(&self.offset.to_be_bytes());
        buf[12..16].copy_from_slice(&self.size.to_be_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < TRUNK_PAYLOAD_LEN {
            return Err(CoreError::InvalidField("short trunk payload".to_string()));
        }
        Ok(Self {
            trunk_file_id: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            offset: u64::from_be_bytes(buf[4..12].try_into().unwrap()),
            size: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
        })
    }

    /// Base64-encodes the trunk payload segment.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    /// Decodes a base64 trunk payload segment.
    pub fn decode(s: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| CoreError::InvalidField(format!("bad trunk payload base64: {e}")))?;
        Self::from_bytes(&raw)
    }
}

/// A fully-decoded remote filename: store-path index, two-level
/// subdirectory, payload, optional trunk addressing, and extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFilename {
    /// Store-path index this file lives under (0-based).
    pub store_path_index: u8,
    /// High byte of the two-level subdirectory hash.
    pub sub_dir_high: u8,
    /// Low byte of the two-level subdirectory hash.
    pub sub_dir_low: u8,
    /// The embedded file payload.
    pub payload: FilePayload,
    /// Present only for trunk-backed files.
    pub trunk: Option<TrunkPayload>,
    /// File extension, without the leading dot.
    pub ext: String,
}

/// Derives the two-level subdirectory hash from a payload, the same value
/// deterministically on encode and decode so a reader never needs a lookup.
fn derive_subdir(payload: &FilePayload) -> (u8, u8) {
    let h = crc32fast::hash(&payload.to_bytes());
    ((h & 0xFF) as u8, ((h >> 8) & 0xFF) as u8)
}

impl RemoteFilename {
    /// Builds a remote filename for a freshly stored (non-trunk) file.
    pub fn new_plain(store_path_index: u8, payload: FilePayload, ext: &str) -> Self {
        let (sub_dir_high, sub_dir_low) = derive_subdir(&payload);
        Self {
            store_path_index,
            sub_dir_high,
            sub_dir_low,
            payload,
            trunk: None,
            ext: truncate_ext(ext),
        }
    }

    /// Builds a remote filename for a file packed into a trunk container,
    /// setting the trunk-backed flag bit on the payload's `file_size`.
    pub fn new_trunk_backed(
        store_path_index: u8,
        mut payload: FilePayload,
        trunk: TrunkPayload,
        ext: &str,
    ) -> Self {
        payload.file_size |= TRUNK_FILE_SIZE_FLAG;
        let (sub_dir_high, sub_dir_low) = derive_subdir(&payload);
        Self {
            store_path_index,
            sub_dir_high,
            sub_dir_low,
            payload,
            trunk: Some(trunk),
            ext: truncate_ext(ext),
        }
    }

    /// Renders `<prefix><index2>/HH/HH/<payload>[_<trunk-payload>].<ext>`.
    pub fn encode(&self, prefix: &str) -> String {
        let mut name = format!(
            "{prefix}{:02x}/{:02x}/{:02x}/{}",
            self.store_path_index,
            self.sub_dir_high,
            self.sub_dir_low,
            self.payload.encode(),
        );
        if let Some(trunk) = &self.trunk {
            name.push('_');
            name.push_str(&trunk.encode());
        }
        if !self.ext.is_empty() {
            name.push('.');
            name.push_str(&self.ext);
        }
        name
    }

    /// Parses a remote filename produced by [`encode`](Self::encode).
    pub fn decode(name: &str) -> Result<Self> {
        let mut parts = name.splitn(4, '/');
        let first = parts.next().ok_or_else(|| bad(name))?;
        let sub_high = parts.next().ok_or_else(|| bad(name))?;
        let sub_low = parts.next().ok_or_else(|| bad(name))?;
        let rest = parts.next().ok_or_else(|| bad(name))?;

        if first.len() < 2 {
            return Err(bad(name));
        }
        let store_path_index = u8::from_str_radix(&first[first.len() - 2..], 16).map_err(|_| bad(name))?;
        let sub_dir_high = u8::from_str_radix(sub_high, 16).map_err(|_| bad(name))?;
        let sub_dir_low = u8::from_str_radix(sub_low, 16).map_err(|_| bad(name))?;

        let (stem, ext) = match rest.rsplit_once('.') {
            Some((stem, ext)) => (stem, ext.to_string()),
            None => (rest, String::new()),
        };

        let (payload_str, trunk) = match stem.split_once('_') {
            Some((p, t)) => (p, Some(TrunkPayload::decode(t)?)),
            None => (stem, None),
        };
        let payload = FilePayload::decode(payload_str)?;

        Ok(Self {
            store_path_index,
            sub_dir_high,
            sub_dir_low,
            payload,
            trunk,
            ext,
        })
    }
}

fn truncate_ext(ext: &str) -> String {
    if ext.len() > FDFS_FILE_EXT_NAME_MAX_LEN {
        ext[..FDFS_FILE_EXT_NAME_MAX_LEN].to_string()
    } else {
        ext.to_string()
    }
}

fn bad(name: &str) -> CoreError {
    CoreError::InvalidField(format!("malformed remote filename: {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> FilePayload {
        FilePayload {
            source_storage_id: 7,
            create_time: 1_700_000_000,
            file_size: 4096,
            crc32: 0xdead_beef,
            random: 12345,
        }
    }

    #[test]
    fn test_plain_filename_roundtrip() {
        let rf = RemoteFilename::new_plain(0, sample_payload(), "jpg");
        let encoded = rf.encode(MASTER_FILE_PREFIX);
        let decoded = RemoteFilename::decode(&encoded).unwrap();
        assert_eq!(decoded, rf);
        assert!(!decoded.payload.is_trunk_backed());
        assert_eq!(decoded.payload.real_file_size(), 4096);
    }

    #[test]
    fn test_trunk_backed_filename_roundtrip() {
        let trunk = TrunkPayload { trunk_file_id: 3, offset: 65536, size: 2048 };
        let rf = RemoteFilename::new_trunk_backed(1, sample_payload(), trunk, "bin");
        let encoded = rf.encode(MASTER_FILE_PREFIX);
        let decoded = RemoteFilename::decode(&encoded).unwrap();

        assert!(decoded.payload.is_trunk_backed());
        assert_eq!(decoded.payload.real_file_size(), 4096);
        assert_eq!(decoded.trunk, Some(trunk));
        assert_eq!(decoded.store_path_index, 1);
    }

    #[test]
    fn test_extension_truncated() {
        let rf = RemoteFilename::new_plain(0, sample_payload(), "verylongextension");
        assert_eq!(rf.ext, "verylo");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(RemoteFilename::decode("not-a-filename").is_err());
    }

    #[test]
    fn test_subdir_is_deterministic_from_payload() {
        let a = RemoteFilename::new_plain(0, sample_payload(), "jpg");
        let b = RemoteFilename::new_plain(0, sample_payload(), "png");
        assert_eq!((a.sub_dir_high, a.sub_dir_low), (b.sub_dir_high, b.sub_dir_low));
    }
}
