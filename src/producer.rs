//! Producer stage
//!
//! Records are grouped into batches bounded by both size and linger time,
//! each batch is appended as one pipelined round-trip, and up to
//! `max_in_flight_batches` batches await the store concurrently. Batches
//! are submitted one after another, so the log holds them in input order,
//! and outcomes come back in that order regardless of which batch the store
//! answers first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::{PipelineError, Result};
use crate::metrics;
use crate::record::{RecordBody, RecordId};
use crate::store::{LogStore, RecordOutcome};

/// Producer stage configuration
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Stream records are appended to
    pub stream: String,
    /// Upper bound on records per batch
    pub max_batch_size: usize,
    /// Longest a partial batch waits before it is sent
    pub linger: Duration,
    /// Batches in flight at once
    pub max_in_flight_batches: usize,
}

impl ProducerConfig {
    /// Defaults for the given stream.
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            max_batch_size: 100,
            linger: Duration::from_millis(10),
            max_in_flight_batches: 4,
        }
    }
}

/// Per-record results of one batch, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Position of the batch within the [`Producer::batches`] call that cut
    /// it, starting at zero. Always zero for [`Producer::send_batch`].
    pub sequence: u64,
    /// One outcome per submitted record
    pub outcomes: Vec<RecordOutcome>,
}

impl BatchOutcome {
    /// Ids of appended records, in order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.outcomes.iter().filter_map(RecordOutcome::id).collect()
    }

    /// Rejected records with their position in the batch.
    pub fn rejected(&self) -> Vec<(usize, &RecordBody, &str)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| match o {
                RecordOutcome::Rejected { body, cause } => Some((i, body, cause.as_str())),
                RecordOutcome::Appended(_) => None,
            })
            .collect()
    }

    /// True when every record was appended.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(RecordOutcome::is_appended)
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Lets batches submit strictly in sequence order.
///
/// Only submission is serialized. Waiting for the store's answer overlaps
/// freely across batches.
struct SubmitOrder {
    next: watch::Sender<u64>,
}

impl SubmitOrder {
    fn new() -> Self {
        let (next, _) = watch::channel(0);
        Self { next }
    }

    async fn wait_turn(&self, sequence: u64) {
        let mut turn = self.next.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = turn.wait_for(|next| *next >= sequence).await;
    }

    fn finish_turn(&self) {
        self.next.send_modify(|next| *next += 1);
    }
}

/// Batching, pipelining producer.
#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn LogStore>,
    config: ProducerConfig,
}

impl Producer {
    /// Create a producer. Zero widths are raised to one.
    pub fn new(store: Arc<dyn LogStore>, mut config: ProducerConfig) -> Self {
        config.max_batch_size = config.max_batch_size.max(1);
        config.max_in_flight_batches = config.max_in_flight_batches.max(1);
        Self { store, config }
    }

    /// Producer configuration
    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Append one batch right away.
    pub async fn send_batch(&self, records: Vec<RecordBody>) -> Result<BatchOutcome> {
        self.dispatch(0, records, None).await
    }

    /// Batch the input and emit one outcome per batch, in submission order.
    ///
    /// Up to `max_in_flight_batches` batches wait on the store at once, but
    /// each is submitted only after the one before it, so ids increase
    /// across batches as well as within them.
    ///
    /// The first failed batch is emitted as an error and ends the stream. No
    /// batch is cut after that; batches already in flight are abandoned and
    /// their outcomes are unknown.
    pub fn batches<S>(&self, input: S) -> impl Stream<Item = Result<BatchOutcome>> + Send + 'static
    where
        S: Stream<Item = RecordBody> + Send + 'static,
    {
        let producer = self.clone();
        let order = Arc::new(SubmitOrder::new());
        let mut next_sequence = 0u64;
        let in_flight = tokio_stream::StreamExt::chunks_timeout(
            input,
            self.config.max_batch_size,
            self.config.linger,
        )
        .map(move |records| {
            let sequence = next_sequence;
            next_sequence += 1;
            producer.dispatch(sequence, records, Some(order.clone()))
        })
        .buffered(self.config.max_in_flight_batches)
        .boxed();

        stream::unfold(Some(in_flight), |state| async move {
            let mut in_flight = state?;
            let result = in_flight.next().await?;
            let next = if result.is_ok() { Some(in_flight) } else { None };
            Some((result, next))
        })
    }

    /// Batch the input and emit one outcome per record, in input order.
    ///
    /// A failed batch is emitted as a single error, after which the stream ends.
    pub fn produce<S>(&self, input: S) -> impl Stream<Item = Result<RecordOutcome>> + Send + 'static
    where
        S: Stream<Item = RecordBody> + Send + 'static,
    {
        self.batches(input).flat_map(|result| {
            let items: Vec<Result<RecordOutcome>> = match result {
                Ok(batch) => batch.outcomes.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(items)
        })
    }

    /// Submit a batch, in turn when `order` is given, then await its outcomes.
    fn dispatch(
        &self,
        sequence: u64,
        records: Vec<RecordBody>,
        order: Option<Arc<SubmitOrder>>,
    ) -> impl std::future::Future<Output = Result<BatchOutcome>> + Send + 'static {
        let store = self.store.clone();
        let stream = self.config.stream.clone();

        async move {
            let size = records.len();
            let started = Instant::now();

            if let Some(order) = &order {
                order.wait_turn(sequence).await;
            }
            let submitted = store.submit_batch(&stream, records).await;
            if let Some(order) = &order {
                order.finish_turn();
            }
            let result = match submitted {
                Ok(handle) => handle.await,
                Err(e) => Err(e),
            };

            match result {
                Ok(outcomes) if outcomes.len() == size => {
                    let batch = BatchOutcome { sequence, outcomes };
                    let rejected = size - batch.ids().len();
                    metrics::record_batch(&stream, size, rejected, started.elapsed());
                    debug!(
                        stream = %stream,
                        sequence,
                        size,
                        rejected,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "batch appended"
                    );
                    Ok(batch)
                }
                Ok(outcomes) => {
                    metrics::record_batch_failed(&stream, size);
                    error!(stream = %stream, sequence, size, got = outcomes.len(), "short batch reply");
                    Err(PipelineError::UnexpectedReply(format!(
                        "{} outcomes for a batch of {}",
                        outcomes.len(),
                        size
                    )))
                }
                Err(e) => {
                    metrics::record_batch_failed(&stream, size);
                    error!(stream = %stream, sequence, size, error = %e, "batch failed");
                    Err(e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{PendingEntry, PendingSummary, Record};
    use crate::store::{AppendHandle, GroupRead, GroupStart, MemoryLogStore, ReadOffset};
    use async_trait::async_trait;
    use futures::{FutureExt, TryStreamExt};
    use parking_lot::Mutex;

    fn body(key: &str) -> RecordBody {
        RecordBody::new().field("key", key)
    }

    fn config(max_batch_size: usize, in_flight: usize) -> ProducerConfig {
        ProducerConfig {
            stream: "S".into(),
            max_batch_size,
            linger: Duration::from_millis(5),
            max_in_flight_batches: in_flight,
        }
    }

    /// Where [`UnevenStore`] spends its delay.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Delay {
        /// Before the batch reaches the log
        Submit,
        /// After the batch is in the log, before its outcomes are returned
        Reply,
    }

    /// Records every batch size and delays early batches longer than later ones.
    struct UnevenStore {
        inner: MemoryLogStore,
        sizes: Mutex<Vec<usize>>,
        delay: Delay,
    }

    impl UnevenStore {
        fn new(delay: Delay) -> Self {
            let inner = MemoryLogStore::new();
            inner
                .create_group("S", "G", GroupStart::Beginning, true)
                .unwrap();
            Self {
                inner,
                sizes: Mutex::new(Vec::new()),
                delay,
            }
        }

        /// Keys in log order.
        async fn stored_keys(&self) -> Vec<String> {
            self.inner
                .read_group(&GroupRead {
                    stream: "S".into(),
                    group: "G".into(),
                    consumer: "check".into(),
                    offset: ReadOffset::New,
                    count: 0,
                })
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.body.get("key").unwrap_or_default().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl LogStore for UnevenStore {
        async fn submit_batch(
            &self,
            stream: &str,
            bodies: Vec<RecordBody>,
        ) -> Result<AppendHandle> {
            let nth = {
                let mut sizes = self.sizes.lock();
                sizes.push(bodies.len());
                sizes.len() as u64
            };
            let pause = Duration::from_millis(40u64.saturating_sub(nth * 10));
            if self.delay == Delay::Submit {
                tokio::time::sleep(pause).await;
            }
            let outcomes = self.inner.append_batch(stream, bodies).await?;
            let delay = self.delay;
            Ok(async move {
                if delay == Delay::Reply {
                    tokio::time::sleep(pause).await;
                }
                Ok(outcomes)
            }
            .boxed())
        }

        async fn read_group(&self, read: &GroupRead) -> Result<Vec<Record>> {
            self.inner.read_group(read).await
        }

        async fn ack(&self, stream: &str, group: &str, id: &RecordId) -> Result<bool> {
            self.inner.ack(stream, group, id).await
        }

        async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary> {
            self.inner.pending_summary(stream, group).await
        }

        async fn pending_entries(
            &self,
            stream: &str,
            group: &str,
            count: usize,
        ) -> Result<Vec<PendingEntry>> {
            self.inner.pending_entries(stream, group, count).await
        }
    }

    #[tokio::test]
    async fn test_produce_preserves_input_order() {
        let store = Arc::new(MemoryLogStore::new());
        let producer = Producer::new(store.clone(), config(3, 4));

        let input = stream::iter((0..10).map(|i| body(&i.to_string())));
        let outcomes: Vec<RecordOutcome> = producer.produce(input).try_collect().await.unwrap();

        let ids: Vec<RecordId> = outcomes.iter().filter_map(RecordOutcome::id).collect();
        assert_eq!(ids.len(), 10);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(store.len("S"), 10);
    }

    #[tokio::test]
    async fn test_batches_respect_max_size_and_order() {
        // Replies for early batches arrive last.
        let store = Arc::new(UnevenStore::new(Delay::Reply));
        let producer = Producer::new(store.clone(), config(2, 3));

        let input = stream::iter((0..5).map(|i| body(&i.to_string())));
        let batches: Vec<BatchOutcome> = producer.batches(input).try_collect().await.unwrap();

        let sequences: Vec<u64> = batches.iter().map(|b| b.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(*store.sizes.lock(), vec![2, 2, 1]);
        assert!(batches.iter().all(BatchOutcome::is_complete));

        let ids: Vec<RecordId> = batches.iter().flat_map(BatchOutcome::ids).collect();
        assert_eq!(ids.len(), 5);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(store.stored_keys().await, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_slow_first_submit_does_not_reorder_log() {
        let store = Arc::new(UnevenStore::new(Delay::Submit));
        let producer = Producer::new(
            store.clone(),
            ProducerConfig {
                stream: "S".into(),
                max_batch_size: 2,
                ..ProducerConfig::new("S")
            },
        );
        assert!(producer.config().max_in_flight_batches > 1);

        let input = stream::iter(["a", "b", "c", "d"].map(body));
        let outcomes: Vec<RecordOutcome> = producer.produce(input).try_collect().await.unwrap();

        let ids: Vec<RecordId> = outcomes.iter().filter_map(RecordOutcome::id).collect();
        assert_eq!(ids.len(), 4);
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids out of order: {:?}", ids);
        assert_eq!(store.stored_keys().await, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_sequence_restarts_per_batches_call() {
        let producer = Producer::new(Arc::new(MemoryLogStore::new()), config(1, 2));

        let single = producer.send_batch(vec![body("x")]).await.unwrap();
        assert_eq!(single.sequence, 0);

        for _ in 0..2 {
            let input = stream::iter(vec![body("a"), body("b")]);
            let batches: Vec<BatchOutcome> =
                producer.clone().batches(input).try_collect().await.unwrap();
            let sequences: Vec<u64> = batches.iter().map(|b| b.sequence).collect();
            assert_eq!(sequences, vec![0, 1]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_linger_flushes_partial_batch() {
        let store = Arc::new(MemoryLogStore::new());
        let producer = Producer::new(store.clone(), config(100, 1));

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let mut batches = Box::pin(
            producer.batches(tokio_stream::wrappers::ReceiverStream::new(rx)),
        );
        tx.send(body("a")).await.unwrap();
        tx.send(body("b")).await.unwrap();

        // Input stays open; only the linger timer can cut this batch.
        let batch = batches.next().await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        drop(tx);
        assert!(batches.next().await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_record_keeps_its_position() {
        let store = Arc::new(MemoryLogStore::new());
        let producer = Producer::new(store, config(10, 1));

        let batch = producer
            .send_batch(vec![body("a"), RecordBody::new(), body("c")])
            .await
            .unwrap();

        assert!(!batch.is_complete());
        assert_eq!(batch.ids().len(), 2);
        let rejected = batch.rejected();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, 1);
        assert!(rejected[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_zero_widths_are_clamped() {
        let producer = Producer::new(Arc::new(MemoryLogStore::new()), config(0, 0));
        assert_eq!(producer.config().max_batch_size, 1);
        assert_eq!(producer.config().max_in_flight_batches, 1);
    }

    #[tokio::test]
    async fn test_empty_input_ends_stream() {
        let producer = Producer::new(Arc::new(MemoryLogStore::new()), config(4, 2));
        let out: Vec<Result<RecordOutcome>> =
            producer.produce(stream::empty()).collect().await;
        assert!(out.is_empty());
    }
}
