//! Round-robin-with-wraparound tracker selection (§4.3).
//!
//! The teacher client only ever spoke to a single configured tracker.
//! `TrackerGroupClient` generalizes that to the full tracker list a real
//! deployment has: `get_connection` tries the last tracker that worked,
//! then scans forward through the remaining trackers, wrapping once, and
//! on success advances the "current" index to the one that answered. Used
//! by both the client library (for `service_query_*`) and by storage nodes
//! reporting status/heartbeats.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionPool};
use crate::errors::{CoreError, Result};
use crate::protocol::{decode_header, encode_header};
use crate::types::FrameHeader;

/// A request/response round trip against whichever tracker answers first,
/// starting from the group's current index.
pub struct TrackerGroupClient {
    addrs: Vec<String>,
    current: AtomicUsize,
    pool: Arc<ConnectionPool>,
    network_timeout_ms: u64,
    max_pkg_size: u64,
}

impl TrackerGroupClient {
    /// Builds a group client over `addrs` (each `host:port`), sharing `pool`
    /// with any other clients that talk to the same cluster.
    pub fn new(
        addrs: Vec<String>,
        pool: Arc<ConnectionPool>,
        network_timeout_ms: u64,
        max_pkg_size: u64,
    ) -> Result<Self> {
        if addrs.is_empty() {
            return Err(CoreError::InvalidArgument("tracker list must not be empty".to_string()));
        }
        Ok(Self { addrs, current: AtomicUsize::new(0), pool, network_timeout_ms, max_pkg_size })
    }

    /// Number of configured trackers.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Whether any trackers are configured (always `false` after `new`, kept
    /// for clippy's `len_without_is_empty`).
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Acquires a connection to a tracker, trying the current index first
    /// and then scanning forward with wraparound. Advances the current index
    /// to whichever tracker answered.
    pub async fn get_connection(&self) -> Result<(Connection, usize)> {
        let start = self.current.load(Ordering::Relaxed) % self.addrs.len();
        let mut last_err = None;

        for step in 0..self.addrs.len() {
            let idx = (start + step) % self.addrs.len();
            let addr = &self.addrs[idx];
            match self.pool.acquire(addr).await {
                Ok(conn) => {
                    if step != 0 {
                        debug!(tracker = %addr, "tracker failover, advancing current index");
                    }
                    self.current.store(idx, Ordering::Relaxed);
                    return Ok((conn, idx));
                }
                Err(e) => {
                    warn!(tracker = %addr, error = %e, "tracker unreachable, trying next");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(CoreError::NoStorageServer))
    }

    /// Returns `conn` to the pool (`keep = true` unless the caller knows the
    /// connection is unusable, e.g. after a framing violation).
    pub async fn release(&self, conn: Connection, keep: bool) {
        self.pool.release(conn, keep).await;
    }

    /// Sends a request frame and reads back the response header plus body,
    /// against whichever tracker answers first. On protocol/transport
    /// failure from the chosen tracker the connection is dropped rather than
    /// pooled, but the group as a whole is not retried here — callers that
    /// want failover across a hiccup should call this again.
    pub async fn request(&self, cmd: u8, body: &[u8]) -> Result<(FrameHeader, Bytes)> {
        let (mut conn, _idx) = self.get_connection().await?;
        let header = encode_header(body.len() as u64, cmd, 0);

        let result = async {
            conn.send(&header, self.network_timeout_ms).await?;
            if !body.is_empty() {
                conn.send(body, self.network_timeout_ms).await?;
            }
            let resp_header_bytes =
                conn.receive_full(crate::types::FDFS_PROTO_HEADER_LEN, self.network_timeout_ms).await?;
            let resp_header = decode_header(&resp_header_bytes, self.max_pkg_size)?;
            if resp_header.status != 0 {
                if let Some(err) = crate::errors::map_status_to_error(resp_header.status) {
                    // Drain the body so the connection stays framed even
                    // though we're about to drop it.
                    let _ = conn.receive_full(resp_header.length as usize, self.network_timeout_ms).await;
                    return Err(err);
                }
            }
            let body = if resp_header.length > 0 {
                conn.receive_full(resp_header.length as usize, self.network_timeout_ms).await?
            } else {
                Bytes::new()
            };
            Ok((resp_header, body))
        }
        .await;

        match &result {
            Ok(_) => self.release(conn, true).await,
            Err(e) => self.release(conn, !e.closes_connection()).await,
        }
        result
    }

    /// Polls every configured tracker with `ACTIVE_TEST`-style pings (any
    /// command the caller supplies) and returns the addresses that answered,
    /// used by storage nodes that need to report to all trackers rather than
    /// just the current one.
    pub async fn broadcast(&self, cmd: u8, body: &[u8]) -> Vec<Result<Bytes>> {
        let mut out = Vec::with_capacity(self.addrs.len());
        for addr in &self.addrs {
            let res = async {
                let mut conn = self.pool.acquire(addr).await?;
                let header = encode_header(body.len() as u64, cmd, 0);
                conn.send(&header, self.network_timeout_ms).await?;
                if !body.is_empty() {
                    conn.send(body, self.network_timeout_ms).await?;
                }
                let resp_header_bytes = conn
                    .receive_full(crate::types::FDFS_PROTO_HEADER_LEN, self.network_timeout_ms)
                    .await?;
                let resp_header = decode_header(&resp_header_bytes, self.max_pkg_size)?;
                let body = if resp_header.length > 0 {
                    conn.receive_full(resp_header.length as usize, self.network_timeout_ms).await?
                } else {
                    Bytes::new()
                };
                self.pool.release(conn, true).await;
                Ok(body)
            }
            .await;
            out.push(res);
        }
        out
    }

    /// Connect timeout/read timeout pair used for ad hoc out-of-band
    /// connections (e.g. liveness probes) that shouldn't go through the pool.
    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rejects_empty_addr_list() {
        let pool = ConnectionPool::new(4, Duration::from_millis(100), Duration::from_secs(60));
        let err = TrackerGroupClient::new(vec![], pool, 1000, 1 << 20).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_get_connection_fails_over_unreachable_trackers() {
        let pool = ConnectionPool::new(4, Duration::from_millis(50), Duration::from_secs(60));
        let client = TrackerGroupClient::new(
            vec!["240.0.0.1:9".to_string(), "240.0.0.2:9".to_string()],
            pool,
            200,
            1 << 20,
        )
        .unwrap();
        let err = client.get_connection().await.unwrap_err();
        assert!(matches!(err, CoreError::ConnectTimeout(_) | CoreError::Network { .. }));
    }
}
