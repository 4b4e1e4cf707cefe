//! The trunk addressing tuple and its wire encoding (§3 "Trunk full info").
//!
//! `TrunkFullInfo` is the full addressing tuple for a range inside a trunk
//! container, used both in the `TRUNK_ALLOC_SPACE`/`TRUNK_ALLOC_CONFIRM`/
//! `TRUNK_FREE_SPACE` RPC bodies and (via [`encode`](TrunkFullInfo::encode))
//! as the representation embedded in trunk binlog records (§3 "Binlogs").

use crate::errors::{CoreError, Result};

/// Whether a trunk block is reusable or held by an in-flight allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Reusable: not currently allocated.
    Free,
    /// Temporarily reserved by exactly one in-flight allocation.
    Hold,
}

/// The addressing tuple for a range inside a trunk container (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrunkFullInfo {
    /// Index of the store path the container lives under.
    pub store_path_index: u8,
    /// High byte of the container's two-level subdirectory hash.
    pub sub_path_high: u8,
    /// Low byte of the container's two-level subdirectory hash.
    pub sub_path_low: u8,
    /// Numeric id of the container file.
    pub trunk_file_id: u32,
    /// Byte offset of the block inside the container.
    pub offset: u64,
    /// Size of the block in bytes.
    pub size: u32,
    /// FREE or HOLD.
    pub status: BlockStatus,
}

impl TrunkFullInfo {
    /// `[offset, offset + size)` as a half-open range, for overlap checks.
    pub fn range(&self) -> std::ops::Range<u64> {
        self.offset..self.offset + self.size as u64
    }

    /// True if this block and `other` share the same container file.
    pub fn same_file(&self, other: &TrunkFullInfo) -> bool {
        self.store_path_index == other.store_path_index
            && self.sub_path_high == other.sub_path_high
            && self.sub_path_low == other.sub_path_low
            && self.trunk_file_id == other.trunk_file_id
    }

    /// Encodes the tuple as a space-separated ASCII line, matching the field
    /// order used in trunk binlog records (§3): status is encoded last as a
    /// single char, 'F' for free or 'H' for hold.
    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {} {} {} {}",
            self.store_path_index,
            self.sub_path_high,
            self.sub_path_low,
            self.trunk_file_id,
            self.offset,
            self.size,
            match self.status {
                BlockStatus::Free => 'F',
                BlockStatus::Hold => 'H',
            }
        )
    }

    /// Decodes a line produced by [`encode`](Self::encode).
    pub fn decode(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 7 {
            return Err(CoreError::MalformedRecord(format!(
                "expected 7 fields in trunk full info, got {}: {line}",
                fields.len()
            )));
        }
        let parse = |s: &str| -> Result<u64> {
            s.parse::<u64>()
                .map_err(|e| CoreError::MalformedRecord(format!("bad integer field {s:?}: {e}")))
        };

        Ok(Self {
            store_path_index: parse(fields[0])? as u8,
            sub_path_high: parse(fields[1])? as u8,
            sub_path_low: parse(fields[2])? as u8,
            trunk_file_id: parse(fields[3])? as u32,
            offset: parse(fields[4])?,
            size: parse(fields[5])? as u32,
            status: match fields[6] {
                "F" => BlockStatus::Free,
                "H" => BlockStatus::Hold,
                other => {
                    return Err(CoreError::MalformedRecord(format!("bad status field: {other}")))
                }
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let info = TrunkFullInfo {
            store_path_index: 1,
            sub_path_high: 0xab,
            sub_path_low: 0xcd,
            trunk_file_id: 42,
            offset: 65536,
            size: 1024,
            status: BlockStatus::Free,
        };
        let encoded = info.encode();
        let decoded = TrunkFullInfo::decode(&encoded).unwrap();
        assert_eq!(decoded, info);
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn test_hold_status_roundtrip() {
        let info = TrunkFullInfo {
            store_path_index: 0,
            sub_path_high: 0,
            sub_path_low: 0,
            trunk_file_id: 1,
            offset: 0,
            size: 256,
            status: BlockStatus::Hold,
        };
        assert_eq!(TrunkFullInfo::decode(&info.encode()).unwrap().status, BlockStatus::Hold);
    }

    #[test]
    fn test_range_and_same_file() {
        let a = TrunkFullInfo {
            store_path_index: 0,
            sub_path_high: 0,
            sub_path_low: 0,
            trunk_file_id: 1,
            offset: 100,
            size: 50,
            status: BlockStatus::Free,
        };
        assert_eq!(a.range(), 100..150);
        let mut b = a;
        b.offset = 200;
        assert!(a.same_file(&b));
        b.trunk_file_id = 2;
        assert!(!a.same_file(&b));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(TrunkFullInfo::decode("not enough fields").is_err());
        assert!(TrunkFullInfo::decode("1 2 3 4 5 6 X").is_err());
    }
}
