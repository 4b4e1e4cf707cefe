//! Frame codec and wire-level primitive encoding (§4.1).
//!
//! Grounded in the teacher client's `protocol.rs`: the same header layout,
//! the same big-endian integer packing, the same fixed-width padding scheme
//! for strings. `max_pkg_size` bounds are enforced here so every caller gets
//! the "peer is dropped" behavior §4.1 requires rather than reimplementing
//! the check.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::path::Path;

use crate::errors::{CoreError, Result};
use crate::types::{FrameHeader, FDFS_FILE_EXT_NAME_MAX_LEN, FDFS_PROTO_HEADER_LEN};

/// Encodes a 10-byte frame header (§4.1): 8-byte BE length, 1-byte command,
/// 1-byte status.
pub fn encode_header(length: u64, cmd: u8, status: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(FDFS_PROTO_HEADER_LEN);
    buf.put_u64(length);
    buf.put_u8(cmd);
    buf.put_u8(status);
    buf.freeze()
}

/// Decodes a 10-byte frame header, rejecting bodies outside `[0, max_pkg_size]`
/// per §4.1 ("If length < 0 or length > configured_max_pkg the peer is
/// dropped").
pub fn decode_header(data: &[u8], max_pkg_size: u64) -> Result<FrameHeader> {
    if data.len() < FDFS_PROTO_HEADER_LEN {
        return Err(CoreError::ShortRead {
            expected: FDFS_PROTO_HEADER_LEN,
            actual: data.len(),
        });
    }

    let mut buf = &data[..FDFS_PROTO_HEADER_LEN];
    let length = buf.get_u64();
    let cmd = buf.get_u8();
    let status = buf.get_u8();

    if length > max_pkg_size {
        return Err(CoreError::FramingViolation(length));
    }

    Ok(FrameHeader { length, cmd, status })
}

/// Splits a file identifier `"group/path/to/file"` into its two parts (§3).
pub fn split_file_id(file_id: &str) -> Result<(String, String)> {
    if file_id.is_empty() {
        return Err(CoreError::InvalidField(format!("empty file id: {file_id}")));
    }

    let parts: Vec<&str> = file_id.splitn(2, '/').collect();
    if parts.len() != 2 {
        return Err(CoreError::InvalidField(format!("malformed file id: {file_id}")));
    }

    let (group_name, remote_filename) = (parts[0], parts[1]);
    if group_name.is_empty() || group_name.len() > crate::types::FDFS_GROUP_NAME_MAX_LEN {
        return Err(CoreError::InvalidField(format!("bad group name in file id: {file_id}")));
    }
    if remote_filename.is_empty() {
        return Err(CoreError::InvalidField(format!("empty remote filename in file id: {file_id}")));
    }

    Ok((group_name.to_string(), remote_filename.to_string()))
}

/// Joins a group name and remote filename into a file identifier (§3), the
/// inverse of [`split_file_id`].
pub fn join_file_id(group_name: &str, remote_filename: &str) -> String {
    format!("{group_name}/{remote_filename}")
}

/// Extracts a filename's extension, without the leading dot, truncated to
/// `FDFS_FILE_EXT_NAME_MAX_LEN` characters.
pub fn get_file_ext_name(filename: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();

    if ext.len() > FDFS_FILE_EXT_NAME_MAX_LEN {
        ext[..FDFS_FILE_EXT_NAME_MAX_LEN].to_string()
    } else {
        ext
    }
}

/// Pads `s` to a fixed `length` with trailing zero bytes, truncating if `s`
/// is already longer. Used for every fixed-width string field on the wire.
pub fn pad_string(s: &str, length: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(length);
    let bytes = s.as_bytes();
    let copy_len = bytes.len().min(length);
    buf.put_slice(&bytes[..copy_len]);
    buf.resize(length, 0);
    buf.freeze()
}

/// Strips trailing zero bytes from a fixed-width field, the inverse of
/// [`pad_string`].
pub fn unpad_string(data: &[u8]) -> String {
    let end = data.iter().rposition(|&b| b != 0).map(|i| i + 1).unwrap_or(0);
    String::from_utf8_lossy(&data[..end]).to_string()
}

/// Encodes a `u64` as 8 big-endian bytes.
pub fn encode_int64(n: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u64(n);
    buf.freeze()
}

/// Decodes 8 big-endian bytes into a `u64`, or `0` if too short.
pub fn decode_int64(data: &[u8]) -> u64 {
    if data.len() < 8 {
        return 0;
    }
    (&data[..8]).get_u64()
}

/// Encodes a `u32` as 4 big-endian bytes.
pub fn encode_int32(n: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(n);
    buf.freeze()
}

/// Decodes 4 big-endian bytes into a `u32`, or `0` if too short.
pub fn decode_int32(data: &[u8]) -> u32 {
    if data.len() < 4 {
        return 0;
    }
    (&data[..4]).get_u32()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_header() {
        let encoded = encode_header(1024, 11, 0);
        assert_eq!(encoded.len(), FDFS_PROTO_HEADER_LEN);

        let decoded = decode_header(&encoded, 1 << 20).unwrap();
        assert_eq!(decoded.length, 1024);
        assert_eq!(decoded.cmd, 11);
        assert_eq!(decoded.status, 0);
    }

    #[test]
    fn test_decode_header_rejects_oversized_length() {
        let encoded = encode_header(1 << 30, 11, 0);
        let err = decode_header(&encoded, 1024).unwrap_err();
        assert!(matches!(err, CoreError::FramingViolation(_)));
    }

    #[test]
    fn test_split_join_file_id() {
        let file_id = "group1/M00/00/00/test.jpg";
        let (group, name) = split_file_id(file_id).unwrap();
        assert_eq!(group, "group1");
        assert_eq!(name, "M00/00/00/test.jpg");
        assert_eq!(join_file_id(&group, &name), file_id);
    }

    #[test]
    fn test_get_file_ext_name() {
        assert_eq!(get_file_ext_name("test.jpg"), "jpg");
        assert_eq!(get_file_ext_name("file.tar.gz"), "gz");
        assert_eq!(get_file_ext_name("noext"), "");
        assert_eq!(get_file_ext_name("file.verylongext"), "verylo");
    }

    #[test]
    fn test_pad_unpad_string_roundtrip() {
        let padded = pad_string("test", 16);
        assert_eq!(padded.len(), 16);
        assert_eq!(unpad_string(&padded), "test");
    }

    #[test]
    fn test_pad_string_truncates() {
        let padded = pad_string("abcdefgh", 4);
        assert_eq!(&padded[..], b"abcd");
    }

    #[test]
    fn test_int_roundtrip() {
        assert_eq!(decode_int64(&encode_int64(0xdead_beef_cafe)), 0xdead_beef_cafe);
        assert_eq!(decode_int32(&encode_int32(0xcafebabe)), 0xcafebabe);
    }
}
