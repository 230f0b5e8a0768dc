//! Exclusive-checkout connection pool.
//!
//! Guarded operations (`WATCH`/`MULTI`/`EXEC`) are only sound when no other
//! command interleaves on the same connection, so every store operation checks
//! a connection out for its full duration. Connections are created lazily up
//! to the configured size; a connection that saw an error is discarded instead
//! of returned.

use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Mutex;
use std::sync::PoisonError;

use redis::Client;
use redis::aio::MultiplexedConnection;
use tokio::sync::Semaphore;
use tokio::sync::SemaphorePermit;

use remutex_core::StoreError;

pub(crate) struct ConnectionPool {
    client: Client,
    permits: Semaphore,
    idle: Mutex<Vec<MultiplexedConnection>>,
}

impl ConnectionPool {
    pub(crate) fn new(client: Client, size: usize) -> Self {
        Self {
            client,
            permits: Semaphore::new(size.max(1)),
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Check out a connection, waiting for a free slot when the pool is busy.
    pub(crate) async fn checkout(&self) -> Result<PooledConnection<'_>, StoreError> {
        let permit = self.permits.acquire().await.map_err(|_| StoreError::Closed)?;
        let reused = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| StoreError::Connection {
                    reason: format!("connect: {e}"),
                })?,
        };
        Ok(PooledConnection {
            pool: self,
            conn,
            broken: false,
            _permit: permit,
        })
    }

    fn restore(&self, conn: MultiplexedConnection) {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).push(conn);
    }
}

/// A connection held exclusively until dropped.
pub(crate) struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: MultiplexedConnection,
    broken: bool,
    _permit: SemaphorePermit<'a>,
}

impl PooledConnection<'_> {
    /// Mark the connection as unusable; it will not rejoin the pool.
    pub(crate) fn discard(&mut self) {
        self.broken = true;
    }
}

impl Deref for PooledConnection<'_> {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if !self.broken {
            // The handle is cheaply cloneable; the original drops with self.
            self.pool.restore(self.conn.clone());
        }
    }
}
