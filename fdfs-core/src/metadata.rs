//! Metadata key/value wire encoding (§6 `SET_METADATA`/`GET_METADATA`).
//!
//! Grounded in the teacher client's `protocol.rs` metadata functions:
//! record separator `0x01`, field separator `0x02`, keys/values truncated to
//! their configured maximums rather than rejected.

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::Result;
use crate::types::{Metadata, FDFS_FIELD_SEPARATOR, FDFS_MAX_META_NAME_LEN, FDFS_MAX_META_VALUE_LEN, FDFS_RECORD_SEPARATOR};

/// Encodes metadata as `key1<0x02>value1<0x01>key2<0x02>value2<0x01>...`.
pub fn encode_metadata(metadata: &Metadata) -> Bytes {
    if metadata.is_empty() {
        return Bytes::new();
    }

    let mut buf = BytesMut::new();
    for (key, value) in metadata {
        let key_bytes = key.as_bytes();
        let value_bytes = value.as_bytes();
        let key_len = key_bytes.len().min(FDFS_MAX_META_NAME_LEN);
        let value_len = value_bytes.len().min(FDFS_MAX_META_VALUE_LEN);

        buf.put_slice(&key_bytes[..key_len]);
        buf.put_u8(FDFS_FIELD_SEPARATOR);
        buf.put_slice(&value_bytes[..value_len]);
        buf.put_u8(FDFS_RECORD_SEPARATOR);
    }
    buf.freeze()
}

/// Decodes wire-format metadata back into a map. Malformed records (not
/// exactly two fields) are silently skipped, matching the teacher's decoder.
pub fn decode_metadata(data: &[u8]) -> Result<Metadata> {
    if data.is_empty() {
        return Ok(Metadata::new());
    }

    let mut metadata = Metadata::new();
    for record in data.split(|&b| b == FDFS_RECORD_SEPARATOR) {
        if record.is_empty() {
            continue;
        }
        let fields: Vec<&[u8]> = record.split(|&b| b == FDFS_FIELD_SEPARATOR).collect();
        if fields.len() != 2 {
            continue;
        }
        let key = String::from_utf8_lossy(fields[0]).to_string();
        let value = String::from_utf8_lossy(fields[1]).to_string();
        metadata.insert(key, value);
    }
    Ok(metadata)
}

/// Applies a merge/overwrite [`MetadataFlag`](crate::types::MetadataFlag) to
/// an existing metadata map, as the storage server does for `SET_METADATA`.
pub fn apply_metadata_update(
    existing: &mut Metadata,
    update: &Metadata,
    flag: crate::types::MetadataFlag,
) {
    if matches!(flag, crate::types::MetadataFlag::Overwrite) {
        existing.clear();
    }
    for (k, v) in update {
        existing.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetadataFlag;
    use std::collections::HashMap;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut meta = HashMap::new();
        meta.insert("author".to_string(), "John Doe".to_string());
        meta.insert("date".to_string(), "2025-01-15".to_string());

        let encoded = encode_metadata(&meta);
        let decoded = decode_metadata(&encoded).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_decode_skips_malformed_records() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"key\x02value\x01");
        raw.extend_from_slice(b"novalue\x01"); // no separator, malformed
        let decoded = decode_metadata(&raw).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("key"), Some(&"value".to_string()));
    }

    #[test]
    fn test_apply_overwrite_replaces_all() {
        let mut existing = HashMap::new();
        existing.insert("a".to_string(), "1".to_string());
        let mut update = HashMap::new();
        update.insert("b".to_string(), "2".to_string());

        apply_metadata_update(&mut existing, &update, MetadataFlag::Overwrite);
        assert_eq!(existing.len(), 1);
        assert_eq!(existing.get("b"), Some(&"2".to_string()));
    }

    #[test]
    fn test_apply_merge_keeps_existing() {
        let mut existing = HashMap::new();
        existing.insert("a".to_string(), "1".to_string());
        let mut update = HashMap::new();
        update.insert("b".to_string(), "2".to_string());

        apply_metadata_update(&mut existing, &update, MetadataFlag::Merge);
        assert_eq!(existing.len(), 2);
        assert_eq!(existing.get("a"), Some(&"1".to_string()));
    }
}
