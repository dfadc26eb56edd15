//! Async Ferrite client.
//!
//! This module provides the primary async client for interacting with a
//! Ferrite (or Redis-compatible) server's stream commands over TCP.

use bytes::Bytes;

use crate::commands::streams::{
    self, PendingEntryReply, PendingSummaryReply, StreamEntry,
};
use crate::connection::ConnectionConfig;
use crate::error::Result;
use crate::pool::{Pool, PoolConfig, PooledConnection};
use crate::types::{ToArg, Value};

/// An asynchronous Ferrite client.
///
/// Wraps a connection pool. Every call checks out one connection for the
/// duration of the command; callers that want to pipeline hold a connection
/// themselves via [`AsyncClient::connection`].
///
/// # Examples
///
/// ```ignore
/// use ferrite_rs::AsyncClient;
///
/// let client = AsyncClient::connect("127.0.0.1", 6379).await?;
/// let id = client.xadd("orders", &[("sku", "A-1")]).await?;
///
/// let mut conn = client.connection().await?;
/// let mut pipeline = conn.pipeline();
/// pipeline.queue(ferrite_rs::commands::streams::xadd_args("orders", &[("sku", "A-2")])).await?;
/// pipeline.queue(ferrite_rs::commands::streams::xadd_args("orders", &[("sku", "A-3")])).await?;
/// let replies = pipeline.execute().await?;
/// ```
pub struct AsyncClient {
    pool: Pool,
}

impl AsyncClient {
    /// Connect to a Ferrite server with default settings.
    ///
    /// Connections are opened lazily, so this never touches the network.
    pub async fn connect(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::connect_with(ConnectionConfig::from_addr(host, port)).await
    }

    /// Connect using a full [`ConnectionConfig`].
    pub async fn connect_with(config: ConnectionConfig) -> Result<Self> {
        Self::connect_pooled(PoolConfig {
            connection: config,
            ..Default::default()
        })
        .await
    }

    /// Connect using a full [`PoolConfig`] with custom pool settings.
    pub async fn connect_pooled(config: PoolConfig) -> Result<Self> {
        Ok(Self {
            pool: Pool::new(config),
        })
    }

    /// Check out a connection, e.g. to run a [`crate::connection::Pipeline`].
    pub async fn connection(&self) -> Result<PooledConnection<'_>> {
        self.pool.get().await
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Close the pool; later calls fail with [`crate::Error::PoolClosed`].
    pub fn close(&self) {
        self.pool.close();
    }

    // ── Stream commands ─────────────────────────────────────────────────

    /// XADD key * field value ...: append an entry, returning its id.
    pub async fn xadd<F: ToArg, V: ToArg>(
        &self,
        key: impl ToArg,
        fields: &[(F, V)],
    ) -> Result<String> {
        let mut conn = self.pool.get().await?;
        streams::xadd(&mut conn, key, fields).await
    }

    /// XREADGROUP GROUP group consumer [COUNT n] STREAMS key id
    pub async fn xreadgroup(
        &self,
        group: impl ToArg,
        consumer: impl ToArg,
        count: Option<usize>,
        key: impl ToArg,
        id: impl ToArg,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.pool.get().await?;
        streams::xreadgroup(&mut conn, group, consumer, count, key, id).await
    }

    /// XACK key group id [id ...]: returns how many ids were pending.
    pub async fn xack(
        &self,
        key: impl ToArg,
        group: impl ToArg,
        ids: &[impl ToArg],
    ) -> Result<i64> {
        let mut conn = self.pool.get().await?;
        streams::xack(&mut conn, key, group, ids).await
    }

    /// XPENDING key group
    pub async fn xpending_summary(
        &self,
        key: impl ToArg,
        group: impl ToArg,
    ) -> Result<PendingSummaryReply> {
        let mut conn = self.pool.get().await?;
        streams::xpending_summary(&mut conn, key, group).await
    }

    /// XPENDING key group start end count [consumer]
    pub async fn xpending_range(
        &self,
        key: impl ToArg,
        group: impl ToArg,
        start: &str,
        end: &str,
        count: usize,
        consumer: Option<&str>,
    ) -> Result<Vec<PendingEntryReply>> {
        let mut conn = self.pool.get().await?;
        streams::xpending_range(&mut conn, key, group, start, end, count, consumer).await
    }

    /// XGROUP CREATE key group id [MKSTREAM]
    pub async fn xgroup_create(
        &self,
        key: impl ToArg,
        group: impl ToArg,
        id: &str,
        mkstream: bool,
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;
        streams::xgroup_create(&mut conn, key, group, id, mkstream).await
    }

    // ── Raw command execution ───────────────────────────────────────────

    /// Execute an arbitrary command with raw arguments.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let val = client.execute(&["XLEN", "orders"]).await?;
    /// ```
    pub async fn execute(&self, args: &[impl ToArg]) -> Result<Value> {
        let raw: Vec<Bytes> = args.iter().map(|a| a.to_arg()).collect();
        let mut conn = self.pool.get().await?;
        conn.execute(&raw).await
    }
}
