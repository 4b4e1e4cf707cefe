//! Shared wire protocol and plumbing for the tracker/storage cluster.
//!
//! This crate holds everything that both sides of the wire (and the client
//! library) need to agree on: the 10-byte frame header (§4.1), protocol
//! constants and command codes, the error taxonomy (§7), the filename codec
//! (§3/§6), and a generic async connection pool (§4.2) plus a round-robin
//! tracker-group client (§4.3) shared by storage heartbeats and the client
//! library's tracker queries.

#![warn(missing_docs)]

pub mod connection;
pub mod errors;
pub mod filename;
pub mod metadata;
pub mod protocol;
pub mod tracker_client;
pub mod trunk;
pub mod types;

pub use connection::{Connection, ConnectionPool};
pub use errors::{CoreError, Result};
pub use tracker_client::TrackerGroupClient;
pub use types::*;
