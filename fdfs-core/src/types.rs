//! Protocol constants, command codes, and wire-level data structures.
//!
//! Numeric command codes are stable constants, not chosen per call site —
//! matching what spec.md calls out in §6 ("numeric codes are fixed
//! constants in the source").

/// Default tracker listen port.
pub const TRACKER_DEFAULT_PORT: u16 = 22122;
/// Default storage listen port.
pub const STORAGE_DEFAULT_PORT: u16 = 23000;

/// Size of the frame header in bytes (§4.1).
pub const FDFS_PROTO_HEADER_LEN: usize = 10;

/// Maximum length of a group name (§9 — `FDFS_GROUP_NAME_MAX_LEN = 15`).
pub const FDFS_GROUP_NAME_MAX_LEN: usize = 15;
/// Maximum length of a storage server ID (§9 — `FDFS_STORAGE_ID_MAX_SIZE = 16`).
pub const FDFS_STORAGE_ID_MAX_SIZE: usize = 16;
/// Maximum length of a file extension name.
pub const FDFS_FILE_EXT_NAME_MAX_LEN: usize = 6;
/// Maximum length of a metadata key.
pub const FDFS_MAX_META_NAME_LEN: usize = 64;
/// Maximum length of a metadata value.
pub const FDFS_MAX_META_VALUE_LEN: usize = 256;
/// Maximum length of the remote-filename prefix.
pub const FDFS_FILE_PREFIX_MAX_LEN: usize = 16;
/// Size of a fixed-width IP address field on the wire.
pub const IP_ADDRESS_SIZE: usize = 16;
/// Width of a formatted store-path index (two hex digits).
pub const FDFS_STORE_PATH_INDEX_LEN: usize = 2;
/// Minimum size of a tracked free block; anything smaller is discarded (§4.6).
pub const DEFAULT_SLOT_MIN_SIZE: u32 = 256;
/// Default size of a freshly created trunk container file (§4.7).
pub const DEFAULT_TRUNK_FILE_SIZE: u64 = 64 * 1024 * 1024;
/// Width of the zero-padded trunk file id embedded in a container's path.
pub const TRUNK_FILE_ID_DIGITS: usize = 6;
/// Fixed header size written at the start of every trunk slot (§4.7, §6).
pub const TRUNK_SLOT_HEADER_LEN: usize = 1 + 4 + 4 + 4 + 4 + FDFS_FILE_EXT_NAME_MAX_LEN;

/// Metadata field separator (between key and value).
pub const FDFS_FIELD_SEPARATOR: u8 = 0x02;
/// Metadata record separator (between key/value pairs).
pub const FDFS_RECORD_SEPARATOR: u8 = 0x01;

/// Bit set in the outer base64 `file_size` field to mark a trunk-backed file.
pub const TRUNK_FILE_SIZE_FLAG: u64 = 1 << 63;

/// Tracker-side protocol commands (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackerCommand {
    /// `SERVICE_QUERY_STORE_WITHOUT_GROUP_ONE`
    ServiceQueryStoreWithoutGroupOne = 101,
    /// `SERVICE_QUERY_FETCH_ONE`
    ServiceQueryFetchOne = 102,
    /// `SERVICE_QUERY_UPDATE`
    ServiceQueryUpdate = 103,
    /// `SERVICE_QUERY_STORE_WITH_GROUP_ONE`
    ServiceQueryStoreWithGroupOne = 104,
    /// `SERVICE_QUERY_FETCH_ALL`
    ServiceQueryFetchAll = 105,
    /// `SERVICE_QUERY_STORE_WITHOUT_GROUP_ALL`
    ServiceQueryStoreWithoutGroupAll = 106,
    /// `SERVICE_QUERY_STORE_WITH_GROUP_ALL`
    ServiceQueryStoreWithGroupAll = 107,
    /// `SERVER_LIST_ONE_GROUP`
    ServerListOneGroup = 90,
    /// `SERVER_LIST_ALL_GROUPS`
    ServerListAllGroups = 91,
    /// `SERVER_LIST_STORAGE`
    ServerListStorage = 92,
    /// `SERVER_DELETE_STORAGE`
    ServerDeleteStorage = 93,
    /// `STORAGE_REPORT_IP_CHANGED`
    StorageReportIpChanged = 94,
    /// `STORAGE_REPORT_STATUS` — a storage server reporting a peer's status change.
    StorageReportStatus = 95,
    /// `STORAGE_REPORT_DISK_USAGE`
    StorageReportDiskUsage = 96,
    /// `STORAGE_SYNC_TIMESTAMP`
    StorageSyncTimestamp = 97,
    /// `STORAGE_SYNC_REPORT` — sync-catchup completion report from a destination.
    StorageSyncReport = 98,
    /// `SERVER_DELETE_GROUP`
    ServerDeleteGroup = 88,
    /// `SET_TRUNK_SERVER`
    SetTrunkServer = 86,
    /// `STORAGE_BEAT` — periodic heartbeat from a storage server.
    StorageBeat = 80,
    /// `STORAGE_GET_STATUS`
    StorageGetStatus = 81,
    /// `STORAGE_GET_SERVER_ID`
    StorageGetServerId = 82,
}

impl From<TrackerCommand> for u8 {
    fn from(cmd: TrackerCommand) -> u8 {
        cmd as u8
    }
}

/// Storage-side protocol commands (§6), reached after tracker routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StorageCommand {
    /// `UPLOAD_FILE`
    UploadFile = 11,
    /// `DELETE_FILE`
    DeleteFile = 12,
    /// `SET_METADATA`
    SetMetadata = 13,
    /// `DOWNLOAD_FILE`
    DownloadFile = 14,
    /// `GET_METADATA`
    GetMetadata = 15,
    /// `UPLOAD_SLAVE_FILE`
    UploadSlaveFile = 21,
    /// `QUERY_FILE_INFO`
    QueryFileInfo = 22,
    /// `UPLOAD_APPENDER_FILE`
    UploadAppenderFile = 23,
    /// `APPEND_FILE`
    AppendFile = 24,
    /// `SYNC_BINLOG` — peer-to-peer storage binlog shipping (§4.5).
    SyncBinlog = 31,
    /// `TRUNCATE_BINLOG_FILE` — announce a sync-source reset (§4.5).
    TruncateBinlogFile = 32,
    /// Active-test keepalive ping sent when a sync source has nothing to send.
    ActiveTest = 33,
    /// `MODIFY_FILE`
    ModifyFile = 34,
    /// `TRUNCATE_FILE`
    TruncateFile = 36,
    /// `REGENERATE_APPENDER_FILENAME`
    RegenerateAppenderFilename = 38,
    /// `TRUNK_ALLOC_SPACE` — forwarded to the group's trunk server (§4.6).
    TrunkAllocSpace = 40,
    /// `TRUNK_ALLOC_CONFIRM`
    TrunkAllocConfirm = 41,
    /// `TRUNK_FREE_SPACE`
    TrunkFreeSpace = 42,
    /// `TRUNK_SYNC_BINLOG` — peer-to-peer trunk binlog shipping (§4.9).
    TrunkSyncBinlog = 43,
    /// `TRUNK_TRUNCATE_BINLOG_FILE`
    TrunkTruncateBinlogFile = 44,
}

impl From<StorageCommand> for u8 {
    fn from(cmd: StorageCommand) -> u8 {
        cmd as u8
    }
}

/// Storage server lifecycle status (§4.4 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StorageStatus {
    /// Never reported in; placeholder for an unknown id.
    None = 0,
    /// First heartbeat received, no sync source chosen yet.
    Init = 1,
    /// A sync source has been chosen; awaiting the first sync pass.
    WaitSync = 2,
    /// Sync in progress.
    Syncing = 3,
    /// Caught up and reachable, but not yet promoted to serve writes.
    Online = 4,
    /// Fully caught up and serving reads and writes.
    Active = 5,
    /// Heartbeat went stale past `check_active_interval`.
    Offline = 6,
    /// Reported a changed IP address; awaiting admin confirmation.
    IpChanged = 7,
    /// Removed by explicit admin command. Terminal.
    Deleted = 8,
}

impl StorageStatus {
    /// Decodes a wire status byte, defaulting to `None` for unknown values.
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Init,
            2 => Self::WaitSync,
            3 => Self::Syncing,
            4 => Self::Online,
            5 => Self::Active,
            6 => Self::Offline,
            7 => Self::IpChanged,
            8 => Self::Deleted,
            _ => Self::None,
        }
    }
}

/// Metadata set/merge flag (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetadataFlag {
    /// Replace all existing metadata with the new values.
    Overwrite = b'O',
    /// Merge new metadata with existing metadata.
    Merge = b'M',
}

impl From<MetadataFlag> for u8 {
    fn from(flag: MetadataFlag) -> u8 {
        flag as u8
    }
}

/// Decoded frame header (§4.1): 8-byte length, 1-byte command, 1-byte status.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Length of the body that follows, in bytes.
    pub length: u64,
    /// Command code (request type, or response type echoed back).
    pub cmd: u8,
    /// Status code: 0 is success, anything else a small error code.
    pub status: u8,
}

/// Endpoint a client or storage node can route a request to.
#[derive(Debug, Clone)]
pub struct StorageEndpoint {
    /// IP address of the storage server.
    pub ip_addr: String,
    /// Listen port of the storage server.
    pub port: u16,
    /// Index of the storage path to use for a new upload (0-based).
    pub store_path_index: u8,
}

impl StorageEndpoint {
    /// Formats the `host:port` address used to key the connection pool.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip_addr, self.port)
    }
}

/// Information about a file stored in the cluster (§6 `QUERY_FILE_INFO`).
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Size of the file in bytes.
    pub file_size: u64,
    /// Unix timestamp when the file was created.
    pub create_time: u64,
    /// CRC32 checksum of the file contents.
    pub crc32: u32,
    /// IP address of the source storage server that received the upload.
    pub source_ip_addr: String,
}

/// Metadata dictionary type (§6 `SET_METADATA`/`GET_METADATA`).
pub type Metadata = std::collections::HashMap<String, String>;
