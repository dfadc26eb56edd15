//! Record model shared by the stages and the log stores.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PipelineError;

/// Record id assigned by the log store (`<ms>-<seq>`).
///
/// Ids are totally ordered: first by millisecond timestamp, then by the
/// sequence number within that millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RecordId {
    /// Milliseconds timestamp
    pub ms: u64,
    /// Sequence number within the millisecond
    pub seq: u64,
}

impl RecordId {
    /// The smallest possible id (`0-0`).
    pub const MIN: RecordId = RecordId { ms: 0, seq: 0 };

    /// The largest possible id.
    pub const MAX: RecordId = RecordId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    /// Create a new record id
    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// The id immediately after this one.
    pub fn next(&self) -> Option<RecordId> {
        if self.seq < u64::MAX {
            Some(RecordId::new(self.ms, self.seq + 1))
        } else if self.ms < u64::MAX {
            Some(RecordId::new(self.ms + 1, 0))
        } else {
            None
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for RecordId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PipelineError::InvalidRecordId(s.to_string());
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        Ok(RecordId {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// Ordered field/value pairs making up a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RecordBody {
    fields: Vec<(String, String)>,
}

impl RecordBody {
    /// An empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, keeping insertion order.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All fields in insertion order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the body has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Consume the body, returning its fields.
    pub fn into_fields(self) -> Vec<(String, String)> {
        self.fields
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RecordBody {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A record as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Id assigned on append
    pub id: RecordId,
    /// Record contents
    pub body: RecordBody,
}

/// A delivered-but-unacknowledged record in a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Record id
    pub id: RecordId,
    /// Consumer the record was last delivered to
    pub consumer: String,
    /// Time since last delivery
    pub idle: Duration,
    /// How many times the record has been delivered
    pub delivery_count: u64,
}

/// Group-wide view of the pending list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSummary {
    /// Number of pending entries
    pub count: u64,
    /// Smallest pending id
    pub lowest: Option<RecordId>,
    /// Largest pending id
    pub highest: Option<RecordId>,
    /// Pending entries per consumer, sorted by consumer name
    pub consumers: Vec<(String, u64)>,
}

impl PendingSummary {
    /// True when nothing is awaiting acknowledgment.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
