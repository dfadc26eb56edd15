//! In-process log store with consumer-group semantics.
//!
//! Mirrors the behaviour of a Redis stream closely enough to stand in for a
//! server in tests and benchmarks: ids are `ms-seq` and strictly increasing,
//! each group keeps a last-delivered cursor and a pending entries list (PEL)
//! with per-consumer ownership and delivery counts.

use std::collections::{BTreeMap, HashMap};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::{self, FutureExt};
use parking_lot::Mutex;

use super::{AppendHandle, GroupRead, LogStore, ReadOffset, RecordOutcome};
use crate::error::{PipelineError, Result};
use crate::record::{PendingEntry, PendingSummary, Record, RecordBody, RecordId};

const WRONG_ARITY: &str = "ERR wrong number of arguments for 'xadd' command";

/// Where a new consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// Deliver the whole stream (`0`).
    Beginning,
    /// Deliver only records appended after the group is created (`$`).
    Latest,
    /// Deliver records after the given id.
    At(RecordId),
}

#[derive(Debug)]
struct Delivery {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct ConsumerGroup {
    last_delivered: RecordId,
    pending: BTreeMap<RecordId, Delivery>,
}

#[derive(Debug, Default)]
struct StreamLog {
    entries: BTreeMap<RecordId, RecordBody>,
    last_id: RecordId,
    groups: HashMap<String, ConsumerGroup>,
}

impl StreamLog {
    fn next_id(&self) -> RecordId {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        if now_ms > self.last_id.ms {
            RecordId::new(now_ms, 0)
        } else {
            // Same millisecond, or the clock went backwards.
            RecordId::new(self.last_id.ms, self.last_id.seq + 1)
        }
    }

    fn append(&mut self, body: RecordBody) -> RecordId {
        let id = self.next_id();
        self.entries.insert(id, body);
        self.last_id = id;
        id
    }
}

/// In-memory [`LogStore`].
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    streams: Mutex<HashMap<String, StreamLog>>,
}

impl MemoryLogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a consumer group (`XGROUP CREATE`).
    ///
    /// With `mkstream` an absent stream is created empty; otherwise it must exist.
    pub fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
        mkstream: bool,
    ) -> Result<()> {
        let mut streams = self.streams.lock();
        if !streams.contains_key(stream) && !mkstream {
            return Err(PipelineError::Store(
                "ERR The XGROUP subcommand requires the key to exist. \
                 Note that for CREATE you may want to use the MKSTREAM option \
                 to create an empty stream automatically."
                    .to_string(),
            ));
        }
        let log = streams.entry(stream.to_string()).or_default();
        if log.groups.contains_key(group) {
            return Err(PipelineError::Store(
                "BUSYGROUP Consumer Group name already exists".to_string(),
            ));
        }
        let last_delivered = match start {
            GroupStart::Beginning => RecordId::MIN,
            GroupStart::Latest => log.last_id,
            GroupStart::At(id) => id,
        };
        log.groups.insert(
            group.to_string(),
            ConsumerGroup {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Number of records in a stream (`XLEN`).
    pub fn len(&self, stream: &str) -> usize {
        self.streams
            .lock()
            .get(stream)
            .map(|log| log.entries.len())
            .unwrap_or(0)
    }

    /// Whether the stream is absent or empty.
    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }
}

fn no_group(stream: &str, group: &str, command: &str) -> PipelineError {
    PipelineError::Store(format!(
        "NOGROUP No such key '{}' or consumer group '{}'{}",
        stream, group, command
    ))
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn submit_batch(&self, stream: &str, bodies: Vec<RecordBody>) -> Result<AppendHandle> {
        let outcomes: Vec<RecordOutcome> = {
            let mut streams = self.streams.lock();
            let log = streams.entry(stream.to_string()).or_default();
            bodies
                .into_iter()
                .map(|body| {
                    if body.is_empty() {
                        RecordOutcome::Rejected {
                            body,
                            cause: WRONG_ARITY.to_string(),
                        }
                    } else {
                        RecordOutcome::Appended(log.append(body))
                    }
                })
                .collect()
        };
        Ok(future::ready(Ok(outcomes)).boxed())
    }

    async fn read_group(&self, read: &GroupRead) -> Result<Vec<Record>> {
        let mut streams = self.streams.lock();
        let log = streams
            .get_mut(&read.stream)
            .ok_or_else(|| no_group(&read.stream, &read.group, " in XREADGROUP with GROUP option"))?;
        let StreamLog {
            entries, groups, ..
        } = log;
        let group = groups
            .get_mut(&read.group)
            .ok_or_else(|| no_group(&read.stream, &read.group, " in XREADGROUP with GROUP option"))?;
        let limit = if read.count == 0 { usize::MAX } else { read.count };
        let now = Instant::now();

        let after = match read.offset {
            ReadOffset::New => {
                let Some(start) = group.last_delivered.next() else {
                    return Ok(Vec::new());
                };
                let records: Vec<Record> = entries
                    .range(start..)
                    .take(limit)
                    .map(|(id, body)| Record {
                        id: *id,
                        body: body.clone(),
                    })
                    .collect();
                for record in &records {
                    group.pending.insert(
                        record.id,
                        Delivery {
                            consumer: read.consumer.clone(),
                            delivered_at: now,
                            delivery_count: 1,
                        },
                    );
                }
                if let Some(last) = records.last() {
                    group.last_delivered = last.id;
                }
                return Ok(records);
            }
            ReadOffset::Pending => RecordId::MIN,
            ReadOffset::PendingAfter(id) => id,
        };

        // Re-delivery of this consumer's own pending entries.
        let mut records = Vec::new();
        for (id, delivery) in group.pending.range_mut(after..) {
            if records.len() >= limit {
                break;
            }
            if *id == after || delivery.consumer != read.consumer {
                continue;
            }
            delivery.delivered_at = now;
            delivery.delivery_count += 1;
            records.push(Record {
                id: *id,
                body: entries.get(id).cloned().unwrap_or_default(),
            });
        }
        Ok(records)
    }

    async fn ack(&self, stream: &str, group: &str, id: &RecordId) -> Result<bool> {
        let mut streams = self.streams.lock();
        Ok(streams
            .get_mut(stream)
            .and_then(|log| log.groups.get_mut(group))
            .map(|g| g.pending.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary> {
        let streams = self.streams.lock();
        let group = streams
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .ok_or_else(|| no_group(stream, group, ""))?;

        let mut per_consumer: BTreeMap<&str, u64> = BTreeMap::new();
        for delivery in group.pending.values() {
            *per_consumer.entry(delivery.consumer.as_str()).or_default() += 1;
        }
        Ok(PendingSummary {
            count: group.pending.len() as u64,
            lowest: group.pending.keys().next().copied(),
            highest: group.pending.keys().next_back().copied(),
            consumers: per_consumer
                .into_iter()
                .map(|(name, n)| (name.to_string(), n))
                .collect(),
        })
    }

    async fn pending_entries(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>> {
        let streams = self.streams.lock();
        let group = streams
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .ok_or_else(|| no_group(stream, group, ""))?;
        Ok(group
            .pending
            .iter()
            .take(count)
            .map(|(id, d)| PendingEntry {
                id: *id,
                consumer: d.consumer.clone(),
                idle: d.delivered_at.elapsed(),
                delivery_count: d.delivery_count,
            })
            .collect())
    }
}
