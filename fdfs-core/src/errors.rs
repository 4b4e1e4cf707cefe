//! Error taxonomy (§7).
//!
//! Grounded in the teacher client's `errors.rs`: one `thiserror` enum with a
//! `#[source]`-carrying `Network` variant, plus a status-code mapping
//! function. Expanded into the full kind set §7 calls for — Transport,
//! Protocol, NotFound, AlreadyExists, Busy, Exhausted, InvalidState,
//! Internal — so handlers can match on kind rather than string-sniff a
//! message, the way `map_status_to_error` already intends but only partially
//! covers in the teacher.

use thiserror::Error;

/// Result type alias used throughout the cluster.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Cluster-wide error type, covering every kind named in §7.
#[derive(Error, Debug)]
pub enum CoreError {
    // --- Transport ---
    /// Connecting to a peer timed out.
    #[error("connection timeout to {0}")]
    ConnectTimeout(String),

    /// A read or write on an established connection timed out.
    #[error("network timeout during {0}")]
    NetworkTimeout(String),

    /// A read or write failed at the OS level.
    #[error("network error during {operation} to {addr}: {source}")]
    Network {
        /// The operation being attempted ("connect", "read", "write", ...).
        operation: String,
        /// The peer address involved.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A frame's declared body length was negative or exceeded the configured max.
    #[error("framing violation: body length {0} out of range")]
    FramingViolation(u64),

    /// The peer closed the connection before delivering the expected bytes.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Bytes the protocol expected.
        expected: usize,
        /// Bytes actually received before EOF.
        actual: usize,
    },

    // --- Protocol ---
    /// An unrecognized command byte was received.
    #[error("unknown command: {0}")]
    UnknownCommand(u8),

    /// A command's body length didn't match what that command requires.
    #[error("wrong body length for command {cmd}: {len}")]
    WrongBodyLength {
        /// The command in question.
        cmd: u8,
        /// The body length actually received.
        len: u64,
    },

    /// A field failed validation (bad group name, bad file id, ...).
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// Generic protocol-level status code the peer returned, with no closer mapping.
    #[error("protocol error (code {code}): {message}")]
    Protocol {
        /// Raw status byte from the peer.
        code: u8,
        /// Human-readable description.
        message: String,
    },

    // --- Not found ---
    /// No group with this name is registered.
    #[error("no such group: {0}")]
    GroupNotFound(String),

    /// No file with this identifier exists.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// No storage server with this id is registered.
    #[error("no such storage server: {0}")]
    StorageNotFound(String),

    // --- Already exists ---
    /// Attempted to add something that already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    // --- Busy ---
    /// An admin command can't proceed because the target is currently active.
    #[error("busy: {0}")]
    Busy(String),

    /// The group's trunk server is not currently known/available.
    #[error("trunk server unavailable, try again later")]
    TrunkServerUnavailable,

    // --- Exhausted ---
    /// No writable storage server could be found.
    #[error("no storage server available")]
    NoStorageServer,

    /// The trunk allocator has no free space and could not grow.
    #[error("insufficient trunk space")]
    InsufficientSpace,

    /// The process-wide connection cap has been reached.
    #[error("malloc task buff failed: max connections reached")]
    MaxConnectionsReached,

    // --- Invalid state ---
    /// A heartbeat or report arrived for a storage id the tracker never saw register.
    #[error("invalid state: heartbeat from unknown storage {0}")]
    UnknownStorageHeartbeat(String),

    /// Compaction (or another staged protocol) was asked to start from a bad stage.
    #[error("invalid state: {0}")]
    InvalidState(String),

    // --- Internal ---
    /// The client (or a pool) has been closed.
    #[error("client is closed")]
    Closed,

    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error not otherwise covered above (disk, not network).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error decoding a protocol field.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// A numeric field failed to parse out of a text binlog/mark/snapshot record.
    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

impl CoreError {
    /// The status byte to put on the wire when returning this error from a
    /// request handler (§4.1, §7).
    pub fn status_code(&self) -> u8 {
        match self {
            CoreError::FileNotFound(_) | CoreError::GroupNotFound(_) | CoreError::StorageNotFound(_) => 2,
            CoreError::AlreadyExists(_) => 6,
            CoreError::InvalidArgument(_) | CoreError::InvalidField(_) => 22,
            CoreError::InsufficientSpace => 28,
            CoreError::Busy(_) | CoreError::TrunkServerUnavailable => 16,
            CoreError::UnknownCommand(_) => 33,
            CoreError::Protocol { code, .. } => *code,
            _ => 255,
        }
    }

    /// True if this error should close the connection per §7's propagation
    /// policy ("close the connection only on transport or protocol errors").
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            CoreError::ConnectTimeout(_)
                | CoreError::NetworkTimeout(_)
                | CoreError::Network { .. }
                | CoreError::FramingViolation(_)
                | CoreError::ShortRead { .. }
                | CoreError::UnknownCommand(_)
                | CoreError::WrongBodyLength { .. }
        )
    }
}

/// Maps a wire status byte back into a `CoreError`, mirroring
/// `status_code` above. Returns `None` for status 0 (success).
///
/// Common codes: 0 success, 2 `ENOENT`, 6 `EEXIST`, 16 `EBUSY`,
/// 22 `EINVAL`, 28 `ENOSPC`.
pub fn map_status_to_error(status: u8) -> Option<CoreError> {
    match status {
        0 => None,
        2 => Some(CoreError::FileNotFound(String::new())),
        6 => Some(CoreError::AlreadyExists(String::new())),
        16 => Some(CoreError::Busy(String::new())),
        22 => Some(CoreError::InvalidArgument(String::new())),
        28 => Some(CoreError::InsufficientSpace),
        other => Some(CoreError::Protocol {
            code: other,
            message: format!("unmapped status code: {other}"),
        }),
    }
}
