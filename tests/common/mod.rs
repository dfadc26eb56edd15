//! Shared test utilities for pipeline integration tests.
//!
//! Import via `mod common;` in integration test files:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use ferrite_pipeline::store::{GroupStart, MemoryLogStore};
use ferrite_pipeline::{
    AppendHandle, GroupRead, LogStore, PendingEntry, PendingSummary, PipelineError, ReadOffset,
    Record, RecordBody, RecordId, RecordOutcome, Result,
};
use ferrite_rs::codec::encode_value;
use ferrite_rs::{RespCodec, Value};

// ============================================================================
// Store helpers
// ============================================================================

/// A memory store with group `group` on `stream` reading from the beginning.
#[allow(dead_code)]
pub fn store_with_group(stream: &str, group: &str) -> Arc<MemoryLogStore> {
    let store = Arc::new(MemoryLogStore::new());
    store
        .create_group(stream, group, GroupStart::Beginning, true)
        .expect("group should be created");
    store
}

/// `{"key": value}` record body.
#[allow(dead_code)]
pub fn keyed(value: &str) -> RecordBody {
    RecordBody::new().field("key", value)
}

// ============================================================================
// Fault injection
// ============================================================================

/// Wraps a [`MemoryLogStore`] and fails selected calls.
///
/// Failures are client-side transport errors, the same thing a dropped
/// connection produces through the RESP store.
#[derive(Default)]
pub struct FaultyStore {
    /// The real store behind the faults
    pub inner: MemoryLogStore,
    /// Fail this many upcoming batch submissions
    pub fail_appends: AtomicUsize,
    /// Fail this many upcoming `read_group` calls
    pub fail_reads: AtomicUsize,
    /// Ids whose ack always fails
    pub fail_acks: Mutex<HashSet<RecordId>>,
    /// Delay applied to every `read_group` call
    pub read_delay: Mutex<Duration>,
    /// Number of `read_group` calls seen
    pub reads: AtomicUsize,
    /// Number of batch submissions seen
    pub appends: AtomicUsize,
}

#[allow(dead_code)]
impl FaultyStore {
    /// A faulty store with `group` already created on `stream`.
    pub fn with_group(stream: &str, group: &str) -> Arc<Self> {
        let store = Arc::new(Self::default());
        store
            .inner
            .create_group(stream, group, GroupStart::Beginning, true)
            .expect("group should be created");
        store
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn transport_error() -> PipelineError {
        PipelineError::Client(ferrite_rs::Error::ConnectionClosed)
    }
}

#[async_trait]
impl LogStore for FaultyStore {
    async fn submit_batch(&self, stream: &str, bodies: Vec<RecordBody>) -> Result<AppendHandle> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if Self::take_fault(&self.fail_appends) {
            return Err(Self::transport_error());
        }
        self.inner.submit_batch(stream, bodies).await
    }

    async fn read_group(&self, read: &GroupRead) -> Result<Vec<Record>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.read_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if Self::take_fault(&self.fail_reads) {
            return Err(Self::transport_error());
        }
        self.inner.read_group(read).await
    }

    async fn ack(&self, stream: &str, group: &str, id: &RecordId) -> Result<bool> {
        if self.fail_acks.lock().contains(id) {
            return Err(Self::transport_error());
        }
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

// ============================================================================
// Loopback RESP server
// ============================================================================

/// A RESP2 server answering stream commands from a [`MemoryLogStore`].
pub struct LoopbackServer {
    /// Port the server listens on
    pub port: u16,
    /// The store behind the server
    pub store: Arc<MemoryLogStore>,
    shutdown: CancellationToken,
}

#[allow(dead_code)]
impl LoopbackServer {
    /// Bind to a random local port and start serving.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind to random port");
        let port = listener.local_addr().expect("should have local addr").port();
        let store = Arc::new(MemoryLogStore::new());
        let shutdown = CancellationToken::new();

        let accept_store = store.clone();
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let socket = tokio::select! {
                    biased;
                    _ = accept_shutdown.cancelled() => return,
                    accepted = listener.accept() => match accepted {
                        Ok((socket, _)) => socket,
                        Err(_) => return,
                    },
                };
                tokio::spawn(serve(socket, accept_store.clone(), accept_shutdown.clone()));
            }
        });

        Self {
            port,
            store,
            shutdown,
        }
    }

    /// Pool settings pointing at this server.
    pub fn pool_config(&self, max_size: usize) -> ferrite_rs::PoolConfig {
        ferrite_rs::PoolConfig {
            connection: ferrite_rs::ConnectionConfig {
                response_timeout: Duration::from_secs(2),
                ..ferrite_rs::ConnectionConfig::from_addr("127.0.0.1", self.port)
            },
            max_size,
        }
    }

    /// Stop accepting and drop every open connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve(socket: TcpStream, store: Arc<MemoryLogStore>, shutdown: CancellationToken) {
    let (read, mut write) = socket.into_split();
    let mut commands = FramedRead::new(read, RespCodec::default());
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            frame = commands.next() => frame,
        };
        let Some(Ok(Value::Array(parts))) = frame else {
            return;
        };
        let args: Vec<Bytes> = parts
            .into_iter()
            .filter_map(|part| part.into_bytes().ok())
            .collect();
        let reply = dispatch(&store, &args).await;
        let mut buf = BytesMut::new();
        encode_value(&reply, &mut buf);
        if write.write_all(&buf).await.is_err() {
            return;
        }
    }
}

fn text(arg: Option<&Bytes>) -> String {
    arg.map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default()
}

fn bulk(s: impl Into<String>) -> Value {
    Value::String(Bytes::from(s.into()))
}

fn store_error(err: PipelineError) -> Value {
    match err {
        PipelineError::Store(msg) => Value::Error(msg),
        other => Value::Error(format!("ERR {}", other)),
    }
}

fn arity(command: &str) -> Value {
    Value::Error(format!(
        "ERR wrong number of arguments for '{}' command",
        command
    ))
}

async fn dispatch(store: &MemoryLogStore, args: &[Bytes]) -> Value {
    let name = text(args.first()).to_ascii_uppercase();
    match name.as_str() {
        "XADD" => xadd(store, args).await,
        "XREADGROUP" => xreadgroup(store, args).await,
        "XACK" => xack(store, args).await,
        "XPENDING" => xpending(store, args).await,
        "XGROUP" => xgroup(store, args),
        "PING" => Value::Status("PONG".into()),
        _ => Value::Error(format!("ERR unknown command '{}'", name)),
    }
}

async fn xadd(store: &MemoryLogStore, args: &[Bytes]) -> Value {
    // XADD key * field value ...
    if args.len() < 3 || (args.len() - 3) % 2 != 0 {
        return arity("xadd");
    }
    let key = text(args.get(1));
    let body: RecordBody = args[3..]
        .chunks(2)
        .map(|pair| (text(pair.first()), text(pair.get(1))))
        .collect();
    match store.append_batch(&key, vec![body]).await {
        Ok(mut outcomes) => match outcomes.pop() {
            Some(RecordOutcome::Appended(id)) => bulk(id.to_string()),
            Some(RecordOutcome::Rejected { cause, .. }) => Value::Error(cause),
            None => Value::Error("ERR empty append".into()),
        },
        Err(e) => store_error(e),
    }
}

async fn xreadgroup(store: &MemoryLogStore, args: &[Bytes]) -> Value {
    // XREADGROUP GROUP g c [COUNT n] STREAMS key id
    let upper: Vec<String> = args.iter().map(|a| text(Some(a)).to_ascii_uppercase()).collect();
    let Some(streams_at) = upper.iter().position(|a| a == "STREAMS") else {
        return Value::Error("ERR syntax error".into());
    };
    if upper.get(1).map(String::as_str) != Some("GROUP") || args.len() != streams_at + 3 {
        return Value::Error("ERR syntax error".into());
    }
    let count = match upper.iter().position(|a| a == "COUNT") {
        Some(i) => match text(args.get(i + 1)).parse::<usize>() {
            Ok(n) => n,
            Err(_) => return Value::Error("ERR value is not an integer or out of range".into()),
        },
        None => 0,
    };
    let key = text(args.get(streams_at + 1));
    let id = text(args.get(streams_at + 2));
    let offset = if id == ">" {
        ReadOffset::New
    } else {
        match id.parse::<RecordId>() {
            Ok(after) if after == RecordId::MIN => ReadOffset::Pending,
            Ok(after) => ReadOffset::PendingAfter(after),
            Err(_) => {
                return Value::Error(
                    "ERR Invalid stream ID specified as stream command argument".into(),
                )
            }
        }
    };

    let read = GroupRead {
        stream: key.clone(),
        group: text(args.get(2)),
        consumer: text(args.get(3)),
        offset,
        count,
    };
    match store.read_group(&read).await {
        Ok(records) if records.is_empty() && offset == ReadOffset::New => Value::Nil,
        Ok(records) => {
            let entries = records
                .into_iter()
                .map(|r| {
                    let fields = r
                        .body
                        .into_fields()
                        .into_iter()
                        .flat_map(|(k, v)| [bulk(k), bulk(v)])
                        .collect();
                    Value::Array(vec![bulk(r.id.to_string()), Value::Array(fields)])
                })
                .collect();
            Value::Array(vec![Value::Array(vec![bulk(key), Value::Array(entries)])])
        }
        Err(e) => store_error(e),
    }
}

async fn xack(store: &MemoryLogStore, args: &[Bytes]) -> Value {
    if args.len() < 4 {
        return arity("xack");
    }
    let key = text(args.get(1));
    let group = text(args.get(2));
    let mut removed = 0;
    for raw in &args[3..] {
        let Ok(id) = text(Some(raw)).parse::<RecordId>() else {
            return Value::Error("ERR Invalid stream ID specified as stream command argument".into());
        };
        match store.ack(&key, &group, &id).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => return store_error(e),
        }
    }
    Value::Integer(removed)
}

async fn xpending(store: &MemoryLogStore, args: &[Bytes]) -> Value {
    let key = text(args.get(1));
    let group = text(args.get(2));
    match args.len() {
        3 => match store.pending_summary(&key, &group).await {
            Ok(summary) if summary.is_empty() => Value::Array(vec![
                Value::Integer(0),
                Value::Nil,
                Value::Nil,
                Value::Nil,
            ]),
            Ok(summary) => Value::Array(vec![
                Value::Integer(summary.count as i64),
                summary.lowest.map(|id| bulk(id.to_string())).unwrap_or(Value::Nil),
                summary.highest.map(|id| bulk(id.to_string())).unwrap_or(Value::Nil),
                Value::Array(
                    summary
                        .consumers
                        .into_iter()
                        .map(|(name, n)| Value::Array(vec![bulk(name), bulk(n.to_string())]))
                        .collect(),
                ),
            ]),
            Err(e) => store_error(e),
        },
        6 | 7 => {
            // Only the full range is supported here.
            let Ok(count) = text(args.get(5)).parse::<usize>() else {
                return Value::Error("ERR value is not an integer or out of range".into());
            };
            let consumer = args.get(6).map(|c| text(Some(c)));
            match store.pending_entries(&key, &group, usize::MAX).await {
                Ok(entries) => Value::Array(
                    entries
                        .into_iter()
                        .filter(|e| consumer.as_deref().map_or(true, |c| c == e.consumer))
                        .take(count)
                        .map(|e| {
                            Value::Array(vec![
                                bulk(e.id.to_string()),
                                bulk(e.consumer),
                                Value::Integer(e.idle.as_millis() as i64),
                                Value::Integer(e.delivery_count as i64),
                            ])
                        })
                        .collect(),
                ),
                Err(e) => store_error(e),
            }
        }
        _ => arity("xpending"),
    }
}

fn xgroup(store: &MemoryLogStore, args: &[Bytes]) -> Value {
    // XGROUP CREATE key group id [MKSTREAM]
    if !text(args.get(1)).eq_ignore_ascii_case("CREATE") || args.len() < 5 {
        return Value::Error("ERR syntax error".into());
    }
    let start = match text(args.get(4)).as_str() {
        "$" => GroupStart::Latest,
        "0" | "0-0" => GroupStart::Beginning,
        other => match other.parse::<RecordId>() {
            Ok(id) => GroupStart::At(id),
            Err(_) => {
                return Value::Error(
                    "ERR Invalid stream ID specified as stream command argument".into(),
                )
            }
        },
    };
    let mkstream = text(args.get(5)).eq_ignore_ascii_case("MKSTREAM");
    match store.create_group(&text(args.get(2)), &text(args.get(3)), start, mkstream) {
        Ok(()) => Value::Status("OK".into()),
        Err(e) => store_error(e),
    }
}
