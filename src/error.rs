//! Error types for the pipeline stages

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by the log store and the stages built on it
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Failure reported by the RESP client (transport, framing, server reply)
    #[error("client error: {0}")]
    Client(#[from] ferrite_rs::Error),

    /// The log store refused a command (e.g. NOGROUP)
    #[error("store error: {0}")]
    Store(String),

    /// A single record was rejected by the log store
    #[error("record rejected: {cause}")]
    Rejected {
        /// Reason given by the store
        cause: String,
    },

    /// A record id did not have the `ms-seq` form
    #[error("invalid record id: {0}")]
    InvalidRecordId(String),

    /// The store answered with a reply of the wrong shape
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// An acknowledgment failed and the stage is configured to stop on failure
    #[error("ack of {id} failed: {cause}")]
    AckFailed {
        /// Record id that could not be acknowledged
        id: String,
        /// Underlying failure
        cause: String,
    },
}

impl PipelineError {
    /// Returns true if the connection to the log store failed, as opposed to
    /// the store answering with an error.
    pub fn is_transport(&self) -> bool {
        match self {
            PipelineError::Client(e) => e.is_transport(),
            _ => false,
        }
    }
}
