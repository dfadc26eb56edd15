//! # ferrite-rs: Rust client for Ferrite streams
//!
//! An async RESP2 client for [Ferrite](https://github.com/ferritelabs/ferrite)
//! and other Redis-compatible servers, covering the stream and consumer-group
//! commands.
//!
//! ## Features
//!
//! - **Async-first**: built on Tokio and `tokio_util::codec`
//! - **Explicit pipelining**: queue N commands, flush once, read N replies
//! - **Connection pooling**: bounded, lazy, drops connections left mid-exchange
//! - **Multiplexing**: one connection carries many in-flight batches, written in order
//! - **Stream commands**: XADD, XREADGROUP, XACK, XPENDING, XGROUP CREATE
//!
//! ## Quick Start
//!
//! ```ignore
//! use ferrite_rs::AsyncClient;
//!
//! #[tokio::main]
//! async fn main() -> ferrite_rs::Result<()> {
//!     let client = AsyncClient::connect("127.0.0.1", 6379).await?;
//!     client.xgroup_create("orders", "billing", "$", true).await?;
//!
//!     let id = client.xadd("orders", &[("sku", "A-1")]).await?;
//!     let entries = client
//!         .xreadgroup("billing", "worker-1", Some(10), "orders", ">")
//!         .await?;
//!     client.xack("orders", "billing", &[id.as_str()]).await?;
//!     Ok(())
//! }
//! ```

pub mod async_client;
pub mod codec;
pub mod commands;
pub mod connection;
pub mod error;
pub mod multiplexed;
pub mod pool;
pub mod types;

// ── Re-exports for ergonomic top-level usage ────────────────────────────────

pub use async_client::AsyncClient;
pub use codec::RespCodec;
pub use commands::streams::{PendingEntryReply, PendingSummaryReply, StreamEntry};
pub use connection::{Connection, ConnectionConfig, Pipeline};
pub use error::{Error, Result};
pub use multiplexed::{MultiplexedConnection, PendingReplies};
pub use pool::{Pool, PoolConfig, PooledConnection};
pub use types::{ToArg, Value};
