//! Error types for the Ferrite client SDK.

/// Result type alias for Ferrite client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when interacting with a Ferrite server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred during communication.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The server returned a RESP error response.
    #[error("server error: {0}")]
    Server(String),

    /// The RESP protocol data was malformed or unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The response type did not match what was expected.
    #[error("unexpected response type: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// The expected type description.
        expected: &'static str,
        /// The actual type description.
        actual: String,
    },

    /// The connection to the server was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection pool has been shut down and hands out no more connections.
    #[error("connection pool closed (max size: {max_size})")]
    PoolClosed {
        /// The maximum pool size.
        max_size: usize,
    },

    /// A timeout occurred waiting for a response.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// An invalid argument was provided to a command.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Returns true if the error means the connection itself can no longer be trusted.
    ///
    /// Server errors and reply-shape mismatches leave the connection usable;
    /// everything else (I/O, timeouts, framing) does not.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Protocol(_)
                | Error::ConnectionClosed
                | Error::PoolClosed { .. }
                | Error::Timeout(_)
                | Error::Auth(_)
        )
    }
}
