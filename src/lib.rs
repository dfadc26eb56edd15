//! # Ferrite Pipeline
//!
//! Throughput-oriented produce / consume / acknowledge stages over an
//! append-only log with consumer groups (Ferrite or Redis streams).
//!
//! The three stages never call each other. They share a [`store::LogStore`]
//! and hand data across explicitly:
//!
//! | Stage | Input | Output |
//! |-------|-------|--------|
//! | [`Producer`] | record bodies | assigned ids, in input order |
//! | [`Consumer`] | cadence + cancellation | records, in delivery order |
//! | [`Acknowledger`] | record ids | an [`AckSummary`] |
//!
//! Delivery is at-least-once: a record stays in the group's pending list
//! until it is acknowledged.
//!
//! ```ignore
//! use std::sync::Arc;
//! use ferrite_pipeline::{PipelineConfig, Producer, Consumer, Acknowledger};
//! use ferrite_pipeline::store::RespLogStore;
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = PipelineConfig::from_file("pipeline.toml")?;
//! config.validate()?;
//! let store = Arc::new(RespLogStore::connect(config.pool_config()).await?);
//!
//! let consumer = Consumer::new(store.clone(), config.consumer_config());
//! let acker = Acknowledger::new(store.clone(), config.ack_config());
//! let cancel = CancellationToken::new();
//! let ids = consumer.records(cancel.clone()).map(|record| {
//!     // process record.body
//!     record.id
//! });
//! let summary = acker.run(ids).await?;
//! ```

pub mod ack;
pub mod config;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod producer;
pub mod record;
pub mod store;
pub mod telemetry;

pub use ack::{AckConfig, AckFailurePolicy, AckSummary, Acknowledger};
pub use config::PipelineConfig;
pub use consumer::{Consumer, ConsumerConfig};
pub use error::{PipelineError, Result};
pub use producer::{BatchOutcome, Producer, ProducerConfig};
pub use record::{PendingEntry, PendingSummary, Record, RecordBody, RecordId};
pub use store::{AppendHandle, GroupRead, LogStore, ReadOffset, RecordOutcome};
