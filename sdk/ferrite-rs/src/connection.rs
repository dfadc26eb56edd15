//! TCP connection management for Ferrite.
//!
//! A [`Connection`] wraps a framed TCP stream speaking RESP2. Every command
//! goes through a scoped [`Pipeline`]: commands are queued without flushing,
//! the pipeline flushes once, then reads exactly one reply per queued command.
//! A single command is simply a pipeline of one.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::trace;

use crate::codec::RespCodec;
use crate::error::{Error, Result};
use crate::types::Value;

/// Default read/write buffer size (8 KB).
const DEFAULT_BUF_SIZE: usize = 8 * 1024;

/// Configuration for connecting to a Ferrite server.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Optional password for AUTH.
    pub password: Option<String>,
    /// Database index to SELECT on connect.
    pub database: u8,
    /// Read/write buffer size in bytes.
    pub buffer_size: usize,
    /// Upper bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for each reply once a pipeline is flushed.
    pub response_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6379,
            password: None,
            database: 0,
            buffer_size: DEFAULT_BUF_SIZE,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    /// Create a config from a host and port.
    pub fn from_addr(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// The `host:port` string used to dial the server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A framed RESP2 connection.
pub struct Connection {
    framed: Framed<TcpStream, RespCodec>,
    response_timeout: Duration,
    /// Set while replies are owed to us; a connection left dirty (error or
    /// an abandoned pipeline) has an unknown number of replies in flight.
    dirty: bool,
}

impl Connection {
    /// Open a new connection using the given configuration.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let addr = config.address();
        let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout(config.connect_timeout))??;
        tcp.set_nodelay(true)?;

        let mut conn = Self {
            framed: Framed::with_capacity(tcp, RespCodec::default(), config.buffer_size),
            response_timeout: config.response_timeout,
            dirty: false,
        };

        if let Some(ref password) = config.password {
            let reply = conn
                .execute(&[Bytes::from("AUTH"), Bytes::copy_from_slice(password.as_bytes())])
                .await
                .map_err(|e| Error::Auth(e.to_string()))?;
            match reply {
                Value::Status(ref s) if s == "OK" => {}
                _ => return Err(Error::Auth(format!("unexpected AUTH response: {}", reply))),
            }
        }

        if config.database != 0 {
            let reply = conn
                .execute(&[
                    Bytes::from("SELECT"),
                    Bytes::from(config.database.to_string()),
                ])
                .await?;
            match reply {
                Value::Status(ref s) if s == "OK" => {}
                _ => {
                    return Err(Error::Protocol(format!(
                        "unexpected SELECT response: {}",
                        reply
                    )))
                }
            }
        }

        trace!(addr = %addr, "connection established");
        Ok(conn)
    }

    /// Send a single command and read its reply. Error replies become `Error::Server`.
    pub async fn execute(&mut self, args: &[Bytes]) -> Result<Value> {
        let mut pipeline = self.pipeline();
        pipeline.queue(args.to_vec()).await?;
        pipeline
            .execute()
            .await?
            .pop()
            .ok_or(Error::ConnectionClosed)?
            .into_result()
    }

    /// Open a scoped pipeline on this connection.
    pub fn pipeline(&mut self) -> Pipeline<'_> {
        Pipeline {
            conn: self,
            queued: 0,
        }
    }

    /// Whether the connection can be handed to another caller.
    pub fn is_reusable(&self) -> bool {
        !self.dirty
    }

    /// Give up the framed transport and the reply timeout.
    pub(crate) fn into_parts(self) -> (Framed<TcpStream, RespCodec>, Duration) {
        (self.framed, self.response_timeout)
    }
}

/// A batch of commands sharing one flush.
///
/// The only way to get replies is [`Pipeline::execute`], which consumes the
/// pipeline, so a queued batch is always flushed exactly once.
#[must_use = "queued commands are not sent until execute() is awaited"]
pub struct Pipeline<'a> {
    conn: &'a mut Connection,
    queued: usize,
}

impl Pipeline<'_> {
    /// Queue a command without flushing.
    ///
    /// The framed writer only touches the socket once its buffer passes the
    /// high-water mark; nothing forces a flush until `execute`.
    pub async fn queue(&mut self, args: Vec<Bytes>) -> Result<()> {
        self.conn.dirty = true;
        self.conn.framed.feed(args).await?;
        self.queued += 1;
        Ok(())
    }

    /// Number of commands queued so far.
    pub fn len(&self) -> usize {
        self.queued
    }

    /// Whether nothing has been queued.
    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Flush once and read one reply per queued command, in queue order.
    ///
    /// Error replies are returned in place as [`Value::Error`]. An `Err` from
    /// this method means the transport failed and no reply can be trusted.
    pub async fn execute(mut self) -> Result<Vec<Value>> {
        if self.queued == 0 {
            return Ok(Vec::new());
        }

        self.conn.framed.flush().await?;

        let mut replies = Vec::with_capacity(self.queued);
        while replies.len() < self.queued {
            let next = tokio::time::timeout(self.conn.response_timeout, self.conn.framed.next())
                .await
                .map_err(|_| Error::Timeout(self.conn.response_timeout))?;
            match next {
                Some(Ok(value)) => replies.push(value),
                Some(Err(e)) => return Err(e),
                None => return Err(Error::ConnectionClosed),
            }
        }

        self.conn.dirty = false;
        trace!(replies = replies.len(), "pipeline drained");
        Ok(replies)
    }
}
