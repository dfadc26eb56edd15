//! Log store abstraction
//!
//! The stages never talk to a server directly; they go through [`LogStore`],
//! which models the three log operations (append, group read, acknowledge)
//! plus pending-list inspection. Two implementations are provided:
//!
//! - [`MemoryLogStore`]: in-process log with consumer-group semantics
//! - [`RespLogStore`]: a Ferrite/Redis server reached through `ferrite-rs`

mod memory;
mod resp;

pub use memory::{GroupStart, MemoryLogStore};
pub use resp::RespLogStore;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::{PipelineError, Result};
use crate::record::{PendingEntry, PendingSummary, Record, RecordBody, RecordId};

/// Which records a group read asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOffset {
    /// Records never delivered to any consumer of the group (`>`).
    New,
    /// This consumer's own delivered-but-unacknowledged records (`0`).
    Pending,
    /// This consumer's pending records with an id greater than the given one.
    PendingAfter(RecordId),
}

impl ReadOffset {
    /// The id argument used on the wire.
    pub fn as_arg(&self) -> String {
        match self {
            ReadOffset::New => ">".to_string(),
            ReadOffset::Pending => "0".to_string(),
            ReadOffset::PendingAfter(id) => id.to_string(),
        }
    }
}

/// A consumer-group read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRead {
    /// Stream name
    pub stream: String,
    /// Consumer group name
    pub group: String,
    /// Consumer (group member) name
    pub consumer: String,
    /// Offset semantics
    pub offset: ReadOffset,
    /// Maximum number of records to return
    pub count: usize,
}

/// Result of appending one record as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The store assigned this id.
    Appended(RecordId),
    /// The store refused the record.
    Rejected {
        /// The record as submitted
        body: RecordBody,
        /// Reason given by the store
        cause: String,
    },
}

impl RecordOutcome {
    /// The assigned id, if the record was appended.
    pub fn id(&self) -> Option<RecordId> {
        match self {
            RecordOutcome::Appended(id) => Some(*id),
            RecordOutcome::Rejected { .. } => None,
        }
    }

    /// Whether the record was appended.
    pub fn is_appended(&self) -> bool {
        matches!(self, RecordOutcome::Appended(_))
    }
}

/// Outcomes of a submitted batch, resolved once the store has answered.
pub type AppendHandle = BoxFuture<'static, Result<Vec<RecordOutcome>>>;

/// An append-only log with consumer groups.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Send every body as one pipelined batch and return a handle to its outcomes.
    ///
    /// Once this resolves the batch holds its place in the log: a batch
    /// submitted afterwards is appended after it, whichever handle resolves
    /// first. Outcomes are positional: the n-th outcome belongs to the n-th
    /// body. `Err`, from here or from the handle, means the batch as a whole
    /// failed (transport) and no outcome is known.
    async fn submit_batch(&self, stream: &str, bodies: Vec<RecordBody>) -> Result<AppendHandle>;

    /// Append every body as one pipelined batch and wait for the outcomes.
    async fn append_batch(
        &self,
        stream: &str,
        bodies: Vec<RecordBody>,
    ) -> Result<Vec<RecordOutcome>> {
        self.submit_batch(stream, bodies).await?.await
    }

    /// Append a single record.
    async fn append(&self, stream: &str, body: RecordBody) -> Result<RecordId> {
        let mut outcomes = self.append_batch(stream, vec![body]).await?;
        match outcomes.pop() {
            Some(RecordOutcome::Appended(id)) => Ok(id),
            Some(RecordOutcome::Rejected { cause, .. }) => Err(PipelineError::Rejected { cause }),
            None => Err(PipelineError::UnexpectedReply(
                "append returned no outcome".to_string(),
            )),
        }
    }

    /// Read records for one consumer of a group, in delivery order.
    async fn read_group(&self, read: &GroupRead) -> Result<Vec<Record>>;

    /// Acknowledge a record. Returns `false` if it was not pending.
    async fn ack(&self, stream: &str, group: &str, id: &RecordId) -> Result<bool>;

    /// Summary of the group's pending list.
    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary>;

    /// Up to `count` pending entries of the group, lowest id first.
    async fn pending_entries(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>>;
}
