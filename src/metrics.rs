//! Metrics recording utilities
//!
//! Thin wrappers over the `metrics` facade. No exporter is installed here;
//! the embedding process decides where the numbers go.

use metrics::{counter, histogram};
use std::time::Duration;

/// Record a completed producer batch
pub fn record_batch(stream: &str, size: usize, rejected: usize, duration: Duration) {
    let labels = [("stream", stream.to_string())];
    counter!("pipeline_producer_batches_total", &labels).increment(1);
    histogram!("pipeline_producer_batch_size", &labels).record(size as f64);
    histogram!("pipeline_producer_batch_duration_seconds", &labels)
        .record(duration.as_secs_f64());

    let appended = size.saturating_sub(rejected) as u64;
    counter!(
        "pipeline_producer_records_total",
        "stream" => stream.to_string(),
        "status" => "appended"
    )
    .increment(appended);
    if rejected > 0 {
        counter!(
            "pipeline_producer_records_total",
            "stream" => stream.to_string(),
            "status" => "rejected"
        )
        .increment(rejected as u64);
    }
}

/// Record a producer batch that failed as a whole
pub fn record_batch_failed(stream: &str, size: usize) {
    counter!(
        "pipeline_producer_records_total",
        "stream" => stream.to_string(),
        "status" => "failed"
    )
    .increment(size as u64);
}

/// Record a consumer poll
pub fn record_poll(stream: &str, records: usize, success: bool) {
    let labels = [
        ("stream", stream.to_string()),
        ("status", if success { "ok" } else { "error" }.to_string()),
    ];
    counter!("pipeline_consumer_polls_total", &labels).increment(1);
    if records > 0 {
        counter!("pipeline_consumer_records_total", "stream" => stream.to_string())
            .increment(records as u64);
    }
}

/// Outcome of one acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Removed from the pending list
    Acked,
    /// Was not pending
    Noop,
    /// The call failed
    Failed,
}

impl AckStatus {
    fn as_str(&self) -> &'static str {
        match self {
            AckStatus::Acked => "acked",
            AckStatus::Noop => "noop",
            AckStatus::Failed => "failed",
        }
    }
}

/// Record an acknowledgment
pub fn record_ack(stream: &str, status: AckStatus) {
    counter!(
        "pipeline_acks_total",
        "stream" => stream.to_string(),
        "status" => status.as_str()
    )
    .increment(1);
}
