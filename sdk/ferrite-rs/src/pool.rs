//! Connection pooling for Ferrite.
//!
//! A semaphore bounds how many connections exist at once; idle connections
//! are cached and reused. Connections that were left mid-exchange are
//! dropped on return instead of being cached.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::connection::{Connection, ConnectionConfig};
use crate::error::{Error, Result};

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connection settings for each pooled connection.
    pub connection: ConnectionConfig,
    /// Maximum number of connections in the pool.
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_size: 8,
        }
    }
}

/// A pool of reusable connections to a Ferrite server.
pub struct Pool {
    config: ConnectionConfig,
    connections: parking_lot::Mutex<Vec<Connection>>,
    semaphore: Arc<Semaphore>,
    max_size: usize,
}

impl Pool {
    /// Create a new connection pool. No connection is opened until first use.
    pub fn new(config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            config: config.connection,
            connections: parking_lot::Mutex::new(Vec::with_capacity(max_size)),
            semaphore: Arc::new(Semaphore::new(max_size)),
            max_size,
        }
    }

    /// Check out a connection, waiting while all `max_size` are in use.
    ///
    /// Returns [`Error::PoolClosed`] once [`Pool::close`] has been called.
    pub async fn get(&self) -> Result<PooledConnection<'_>> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed {
                max_size: self.max_size,
            })?;

        let cached = { self.connections.lock().pop() };
        let conn = match cached {
            Some(c) => c,
            None => Connection::connect(&self.config).await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self,
            _permit: permit,
        })
    }

    /// Stop handing out connections and drop the idle ones.
    pub fn close(&self) {
        self.semaphore.close();
        self.connections.lock().clear();
    }

    /// Settings used for every connection the pool opens.
    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Maximum number of simultaneously checked-out connections.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Current number of idle connections sitting in the pool.
    pub fn idle_count(&self) -> usize {
        self.connections.lock().len()
    }

    fn put_back(&self, conn: Connection) {
        if !conn.is_reusable() {
            debug!("discarding connection with unread replies");
            return;
        }
        if self.semaphore.is_closed() {
            return;
        }
        self.connections.lock().push(conn);
    }
}

/// A connection checked out from the pool, returned on drop.
pub struct PooledConnection<'a> {
    conn: Option<Connection>,
    pool: &'a Pool,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }
}

impl std::ops::Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl std::ops::DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection is present until drop")
    }
}
