//! Consumer stage
//!
//! Polls the log store on a fixed cadence with a consumer-group read for
//! records never delivered to any member (`>`), and flattens each poll into
//! individual records. A failed poll is logged and yields nothing; the next
//! tick tries again. Cancellation stops new polls and lets in-flight ones
//! finish, so every record the store handed out is still emitted.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::metrics;
use crate::record::Record;
use crate::store::{GroupRead, LogStore, ReadOffset};

/// Consumer stage configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Stream to read
    pub stream: String,
    /// Consumer group
    pub group: String,
    /// This member's name within the group
    pub consumer: String,
    /// Time between polls
    pub poll_interval: Duration,
    /// Maximum records per poll
    pub count: usize,
    /// Polls in flight at once
    pub max_in_flight_polls: usize,
}

impl ConsumerConfig {
    /// Defaults for the given stream, group and consumer.
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            poll_interval: Duration::from_millis(100),
            count: 100,
            max_in_flight_polls: 1,
        }
    }
}

/// Consumer-group reader.
pub struct Consumer {
    store: Arc<dyn LogStore>,
    config: ConsumerConfig,
}

impl Consumer {
    /// Create a consumer. Zero widths and intervals are raised to the smallest usable value.
    pub fn new(store: Arc<dyn LogStore>, mut config: ConsumerConfig) -> Self {
        config.poll_interval = config.poll_interval.max(Duration::from_millis(1));
        config.count = config.count.max(1);
        config.max_in_flight_polls = config.max_in_flight_polls.max(1);
        Self { store, config }
    }

    /// Consumer configuration
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    fn request(&self, offset: ReadOffset) -> GroupRead {
        GroupRead {
            stream: self.config.stream.clone(),
            group: self.config.group.clone(),
            consumer: self.config.consumer.clone(),
            offset,
            count: self.config.count,
        }
    }

    /// Live-tail the group until `cancel` fires.
    ///
    /// The first poll is issued immediately. Polls complete and are emitted in
    /// the order they were issued. Ticks missed while downstream is slow are
    /// delayed rather than replayed in a burst.
    ///
    /// The stream may be built anywhere; the timer starts on its first poll,
    /// which must happen inside a Tokio runtime.
    pub fn records(&self, cancel: CancellationToken) -> impl Stream<Item = Record> + Send + 'static {
        let period = self.config.poll_interval;
        let ticks = stream::once(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            IntervalStream::new(interval)
        })
        .flatten();

        let store = self.store.clone();
        let request = Arc::new(self.request(ReadOffset::New));

        ticks
            .take_until(cancel.cancelled_owned())
            .map(move |_| poll(store.clone(), request.clone()))
            .buffered(self.config.max_in_flight_polls)
            .flat_map(stream::iter)
    }

    /// Issue a single group read.
    pub async fn poll_once(&self, offset: ReadOffset) -> Result<Vec<Record>> {
        self.store.read_group(&self.request(offset)).await
    }

    /// Re-read everything already delivered to this consumer but not acknowledged.
    ///
    /// Pages through the pending list `count` records at a time. Each record
    /// read counts as another delivery.
    pub async fn recover_pending(&self) -> Result<Vec<Record>> {
        let mut recovered = Vec::new();
        let mut offset = ReadOffset::Pending;
        loop {
            let page = self.store.read_group(&self.request(offset)).await?;
            let Some(last) = page.last() else {
                break;
            };
            offset = ReadOffset::PendingAfter(last.id);
            recovered.extend(page);
        }
        debug!(
            stream = %self.config.stream,
            group = %self.config.group,
            consumer = %self.config.consumer,
            recovered = recovered.len(),
            "pending records recovered"
        );
        Ok(recovered)
    }
}

async fn poll(store: Arc<dyn LogStore>, request: Arc<GroupRead>) -> Vec<Record> {
    match store.read_group(&request).await {
        Ok(records) => {
            metrics::record_poll(&request.stream, records.len(), true);
            if !records.is_empty() {
                debug!(
                    stream = %request.stream,
                    consumer = %request.consumer,
                    records = records.len(),
                    "poll delivered records"
                );
            }
            records
        }
        Err(e) => {
            metrics::record_poll(&request.stream, 0, false);
            warn!(
                stream = %request.stream,
                group = %request.group,
                consumer = %request.consumer,
                error = %e,
                "poll failed, retrying on next tick"
            );
            Vec::new()
        }
    }
}
