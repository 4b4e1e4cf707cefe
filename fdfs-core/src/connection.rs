//! Async TCP connection and per-endpoint connection pool (§4.2).
//!
//! Grounded in the teacher client's `connection.rs`: the same `Connection`
//! wrapper around a `TcpStream` with a `last_used` timestamp, the same
//! bounded FIFO-per-key pool shape. Extended per §4.2 with a background
//! sweeper task (the teacher only reaps on `put`) and an in-use counter so
//! `acquire` can bound concurrent connections per key rather than growing
//! without limit.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::errors::{CoreError, Result};

/// A pooled TCP connection to a tracker or storage server.
pub struct Connection {
    stream: TcpStream,
    addr: String,
    last_used: Instant,
}

impl Connection {
    /// Wraps an already-connected stream.
    pub fn new(stream: TcpStream, addr: String) -> Self {
        Self { stream, addr, last_used: Instant::now() }
    }

    /// Writes `data` in full, bounded by `timeout_ms` (§4.1, §5).
    pub async fn send(&mut self, data: &[u8], timeout_ms: u64) -> Result<()> {
        match timeout(Duration::from_millis(timeout_ms), self.stream.write_all(data)).await {
            Ok(Ok(())) => {
                self.last_used = Instant::now();
                Ok(())
            }
            Ok(Err(e)) => Err(CoreError::Network {
                operation: "write".to_string(),
                addr: self.addr.clone(),
                source: e,
            }),
            Err(_) => Err(CoreError::NetworkTimeout(format!("write to {}", self.addr))),
        }
    }

    /// Reads exactly `size` bytes, bounded by `timeout_ms` for the whole read.
    pub async fn receive_full(&mut self, size: usize, timeout_ms: u64) -> Result<Bytes> {
        let mut buf = vec![0u8; size];
        match timeout(Duration::from_millis(timeout_ms), self.stream.read_exact(&mut buf)).await {
            Ok(Ok(())) => {
                self.last_used = Instant::now();
                Ok(Bytes::from(buf))
            }
            Ok(Err(e)) => Err(CoreError::Network {
                operation: "read".to_string(),
                addr: self.addr.clone(),
                source: e,
            }),
            Err(_) => Err(CoreError::NetworkTimeout(format!("read from {}", self.addr))),
        }
    }

    /// Splits into owned read/write halves for full-duplex use (binlog sync
    /// workers read acks while writing frames).
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Timestamp of the last send/receive.
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// The peer address this connection is for.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

struct EndpointPool {
    idle: Vec<Connection>,
    in_use: usize,
}

/// A bounded, per-endpoint pool of reusable TCP connections (§4.2).
pub struct ConnectionPool {
    max_conns: usize,
    connect_timeout: Duration,
    idle_timeout: Duration,
    pools: Arc<Mutex<HashMap<String, EndpointPool>>>,
    closed: Arc<AtomicBool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    waiters: Arc<AtomicUsize>,
}

impl ConnectionPool {
    /// Creates an empty pool; connections are opened lazily on `acquire`.
    pub fn new(max_conns: usize, connect_timeout: Duration, idle_timeout: Duration) -> Arc<Self> {
        let pool = Arc::new(Self {
            max_conns,
            connect_timeout,
            idle_timeout,
            pools: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
            sweeper: Mutex::new(None),
            waiters: Arc::new(AtomicUsize::new(0)),
        });
        pool.clone().spawn_sweeper();
        pool
    }

    fn spawn_sweeper(self: Arc<Self>) {
        let pools = self.pools.clone();
        let closed = self.closed.clone();
        let idle_timeout = self.idle_timeout;
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(30).min(idle_timeout));
            loop {
                tick.tick().await;
                if closed.load(Ordering::Relaxed) {
                    return;
                }
                let mut pools = pools.lock().await;
                for pool in pools.values_mut() {
                    pool.idle.retain(|c| c.last_used().elapsed() <= idle_timeout);
                }
            }
        });
        // Fire-and-forget: store so `close` can abort it; ignore lock
        // contention since this only runs once at construction.
        if let Ok(mut guard) = self.sweeper.try_lock() {
            *guard = Some(handle);
        }
    }

    /// Acquires a connection to `addr`, reusing an idle one if available and
    /// fresh, otherwise opening a new TCP connection (bounded by
    /// `connect_timeout`). Blocks if `max_conns` are already in use for this
    /// address.
    pub async fn acquire(&self, addr: &str) -> Result<Connection> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(CoreError::Closed);
        }

        loop {
            {
                let mut pools = self.pools.lock().await;
                let pool = pools.entry(addr.to_string()).or_insert_with(|| EndpointPool {
                    idle: Vec::new(),
                    in_use: 0,
                });

                while let Some(conn) = pool.idle.pop() {
                    if conn.last_used().elapsed() < self.idle_timeout {
                        pool.in_use += 1;
                        return Ok(conn);
                    }
                }

                if pool.in_use < self.max_conns {
                    pool.in_use += 1;
                    break;
                }
            }
            // At capacity: yield and retry rather than fail outright, matching
            // §4.2 ("else waits").
            self.waiters.fetch_add(1, Ordering::Relaxed);
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.waiters.fetch_sub(1, Ordering::Relaxed);
        }

        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(Connection::new(stream, addr.to_string()))
            }
            Ok(Err(e)) => {
                self.release_slot(addr).await;
                Err(CoreError::Network {
                    operation: "connect".to_string(),
                    addr: addr.to_string(),
                    source: e,
                })
            }
            Err(_) => {
                self.release_slot(addr).await;
                Err(CoreError::ConnectTimeout(addr.to_string()))
            }
        }
    }

    async fn release_slot(&self, addr: &str) {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get_mut(addr) {
            pool.in_use = pool.in_use.saturating_sub(1);
        }
    }

    /// Returns a connection to the pool for reuse, or drops it if the pool is
    /// closed, full, or the connection has been idle too long.
    pub async fn release(&self, conn: Connection, keep: bool) {
        let addr = conn.addr().to_string();
        let mut pools = self.pools.lock().await;
        let Some(pool) = pools.get_mut(&addr) else { return };
        pool.in_use = pool.in_use.saturating_sub(1);

        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        if keep && pool.idle.len() < self.max_conns && conn.last_used().elapsed() <= self.idle_timeout {
            pool.idle.push(conn);
        }
    }

    /// Shuts the pool down: further `acquire` calls fail with
    /// [`CoreError::Closed`], idle connections are dropped. Safe to call
    /// more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
        }
        self.pools.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_fails_after_close() {
        let pool = ConnectionPool::new(4, Duration::from_millis(100), Duration::from_secs(1));
        pool.close().await;
        pool.close().await; // idempotent
        let err = pool.acquire("127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, CoreError::Closed));
    }

    #[tokio::test]
    async fn test_acquire_connect_timeout() {
        // 240.0.0.1 is reserved, unroutable; connect should not complete.
        let pool = ConnectionPool::new(4, Duration::from_millis(50), Duration::from_secs(1));
        let err = pool.acquire("240.0.0.1:9").await.unwrap_err();
        assert!(matches!(err, CoreError::ConnectTimeout(_) | CoreError::Network { .. }));
    }
}
