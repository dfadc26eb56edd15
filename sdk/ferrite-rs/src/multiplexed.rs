//! One connection shared by many in-flight batches.
//!
//! Batches are written whole, under a lock, and each registers a waiter
//! before its bytes hit the socket. A background task reads replies and
//! hands them to waiters in registration order. The server therefore sees
//! batches in the order they were sent, while callers may wait for their
//! replies concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::codec::RespCodec;
use crate::connection::{Connection, ConnectionConfig};
use crate::error::{Error, Result};
use crate::types::Value;

type Transport = Framed<TcpStream, RespCodec>;

struct Waiter {
    replies: usize,
    tx: oneshot::Sender<Result<Vec<Value>>>,
}

struct Writer {
    sink: SplitSink<Transport, Vec<Bytes>>,
    waiters: mpsc::UnboundedSender<Waiter>,
}

/// A connection that accepts new batches while earlier ones await replies.
pub struct MultiplexedConnection {
    writer: Mutex<Writer>,
    closed: Arc<AtomicBool>,
}

/// Replies owed for one sent batch.
#[must_use = "replies are only observed by awaiting recv()"]
pub struct PendingReplies {
    rx: oneshot::Receiver<Result<Vec<Value>>>,
}

impl PendingReplies {
    /// Wait for one reply per command, in the order the commands were sent.
    ///
    /// Error replies come back in place as [`Value::Error`].
    pub async fn recv(self) -> Result<Vec<Value>> {
        self.rx.await.map_err(|_| Error::ConnectionClosed)?
    }
}

/// Marks the connection closed unless disarmed; a batch abandoned half
/// written leaves the stream unusable.
struct CloseOnDrop<'a> {
    closed: &'a AtomicBool,
    armed: bool,
}

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

impl MultiplexedConnection {
    /// Connect, run the usual handshake, and start the reply reader.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let (framed, response_timeout) = Connection::connect(config).await?.into_parts();
        let (sink, stream) = framed.split();
        let (waiters, pending) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(read_replies(
            stream,
            pending,
            response_timeout,
            closed.clone(),
        ));

        Ok(Self {
            writer: Mutex::new(Writer { sink, waiters }),
            closed,
        })
    }

    /// Write every command and flush once.
    ///
    /// Once this returns, the batch is on the wire ahead of any batch sent
    /// later on this connection.
    pub async fn send_batch(&self, commands: Vec<Vec<Bytes>>) -> Result<PendingReplies> {
        let (tx, rx) = oneshot::channel();
        if commands.is_empty() {
            let _ = tx.send(Ok(Vec::new()));
            return Ok(PendingReplies { rx });
        }

        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let mut guard = CloseOnDrop {
            closed: &self.closed,
            armed: true,
        };

        let count = commands.len();
        writer
            .waiters
            .send(Waiter { replies: count, tx })
            .map_err(|_| Error::ConnectionClosed)?;
        for command in commands {
            writer.sink.feed(command).await?;
        }
        writer.sink.flush().await?;

        guard.armed = false;
        trace!(commands = count, "batch sent");
        Ok(PendingReplies { rx })
    }

    /// Whether the connection has failed and must be replaced.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn read_replies(
    mut stream: SplitStream<Transport>,
    mut waiters: mpsc::UnboundedReceiver<Waiter>,
    response_timeout: Duration,
    closed: Arc<AtomicBool>,
) {
    while let Some(waiter) = waiters.recv().await {
        let mut replies = Vec::with_capacity(waiter.replies);
        let mut failure = None;
        while replies.len() < waiter.replies {
            match tokio::time::timeout(response_timeout, stream.next()).await {
                Ok(Some(Ok(value))) => replies.push(value),
                Ok(Some(Err(e))) => failure = Some(e),
                Ok(None) => failure = Some(Error::ConnectionClosed),
                Err(_) => failure = Some(Error::Timeout(response_timeout)),
            }
            if failure.is_some() {
                break;
            }
        }

        let Some(err) = failure else {
            let _ = waiter.tx.send(Ok(replies));
            continue;
        };

        // Reply framing is lost: fail this waiter and everyone queued behind it.
        closed.store(true, Ordering::SeqCst);
        debug!(error = %err, "multiplexed connection failed");
        let _ = waiter.tx.send(Err(err));
        waiters.close();
        while let Some(rest) = waiters.recv().await {
            let _ = rest.tx.send(Err(Error::ConnectionClosed));
        }
        return;
    }
}
