//! [`LogStore`] backed by a Ferrite (or Redis) server.

use std::sync::Arc;

use async_trait::async_trait;
use ferrite_rs::commands::streams::xadd_args;
use ferrite_rs::{AsyncClient, MultiplexedConnection, PoolConfig, StreamEntry, Value};
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{AppendHandle, GroupRead, LogStore, RecordOutcome};
use crate::error::{PipelineError, Result};
use crate::record::{PendingEntry, PendingSummary, Record, RecordBody, RecordId};

/// Log store speaking RESP2 through a pooled [`AsyncClient`].
///
/// Appends share one [`MultiplexedConnection`] so batches reach the server
/// in submission order; reads, acks and pending queries use the pool.
pub struct RespLogStore {
    client: AsyncClient,
    appender: Mutex<Option<Arc<MultiplexedConnection>>>,
}

impl RespLogStore {
    /// Wrap an existing client.
    pub fn new(client: AsyncClient) -> Self {
        Self {
            client,
            appender: Mutex::new(None),
        }
    }

    /// Build a client from pool settings.
    pub async fn connect(config: PoolConfig) -> Result<Self> {
        Ok(Self::new(AsyncClient::connect_pooled(config).await?))
    }

    /// The underlying client, e.g. for group provisioning.
    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    /// The append connection, reopened if the previous one failed.
    async fn appender(&self) -> Result<Arc<MultiplexedConnection>> {
        let mut slot = self.appender.lock().await;
        if let Some(conn) = slot.as_ref().filter(|c| !c.is_closed()) {
            return Ok(conn.clone());
        }
        let conn = Arc::new(
            MultiplexedConnection::connect(self.client.pool().connection_config()).await?,
        );
        *slot = Some(conn.clone());
        Ok(conn)
    }
}

/// Server error replies are store errors; everything else stays a client error.
fn store_err(err: ferrite_rs::Error) -> PipelineError {
    match err {
        ferrite_rs::Error::Server(msg) => PipelineError::Store(msg),
        other => PipelineError::Client(other),
    }
}

fn utf8(bytes: bytes::Bytes) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| PipelineError::UnexpectedReply(format!("non UTF-8 field: {}", e)))
}

fn to_record(entry: StreamEntry) -> Result<Record> {
    let id = entry.id.parse()?;
    let body = entry
        .fields
        .into_iter()
        .map(|(k, v)| -> Result<(String, String)> { Ok((utf8(k)?, utf8(v)?)) })
        .collect::<Result<Vec<(String, String)>>>()?
        .into_iter()
        .collect();
    Ok(Record { id, body })
}

/// Pair each body with its XADD reply; error replies reject only that record.
fn outcomes(bodies: Vec<RecordBody>, replies: Vec<Value>) -> Result<Vec<RecordOutcome>> {
    if replies.len() != bodies.len() {
        return Err(PipelineError::UnexpectedReply(format!(
            "{} replies for {} appends",
            replies.len(),
            bodies.len()
        )));
    }
    bodies
        .into_iter()
        .zip(replies)
        .map(|(body, reply)| -> Result<RecordOutcome> {
            match reply {
                Value::Error(cause) => Ok(RecordOutcome::Rejected { body, cause }),
                other => {
                    let id: RecordId = other.into_string()?.parse()?;
                    Ok(RecordOutcome::Appended(id))
                }
            }
        })
        .collect()
}

fn parse_optional_id(id: Option<String>) -> Result<Option<RecordId>> {
    id.map(|s| s.parse()).transpose()
}

#[async_trait]
impl LogStore for RespLogStore {
    async fn submit_batch(&self, stream: &str, bodies: Vec<RecordBody>) -> Result<AppendHandle> {
        let commands = bodies
            .iter()
            .map(|body| xadd_args(stream, body.fields()))
            .collect();
        let appender = self.appender().await?;
        let replies = appender.send_batch(commands).await?;
        let stream = stream.to_string();

        Ok(async move {
            let replies = replies.recv().await?;
            debug!(stream = %stream, records = bodies.len(), "pipelined append batch");
            outcomes(bodies, replies)
        }
        .boxed())
    }

    async fn read_group(&self, read: &GroupRead) -> Result<Vec<Record>> {
        let entries = self
            .client
            .xreadgroup(
                &read.group,
                &read.consumer,
                Some(read.count),
                &read.stream,
                read.offset.as_arg(),
            )
            .await
            .map_err(store_err)?;
        entries.into_iter().map(to_record).collect()
    }

    async fn ack(&self, stream: &str, group: &str, id: &RecordId) -> Result<bool> {
        let removed = self
            .client
            .xack(stream, group, &[id.to_string()])
            .await
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary> {
        let reply = self
            .client
            .xpending_summary(stream, group)
            .await
            .map_err(store_err)?;
        Ok(PendingSummary {
            count: reply.count,
            lowest: parse_optional_id(reply.lowest)?,
            highest: parse_optional_id(reply.highest)?,
            consumers: reply.consumers,
        })
    }

    async fn pending_entries(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>> {
        let rows = self
            .client
            .xpending_range(stream, group, "-", "+", count, None)
            .await
            .map_err(store_err)?;
        rows.into_iter()
            .map(|row| -> Result<PendingEntry> {
                Ok(PendingEntry {
                    id: row.id.parse()?,
                    consumer: row.consumer,
                    idle: row.idle,
                    delivery_count: row.delivery_count,
                })
            })
            .collect()
    }
}
