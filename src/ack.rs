//! Acknowledgment stage
//!
//! Consumes record ids and acknowledges them with bounded concurrency.
//! Acks are idempotent and independent, so completions may arrive in any
//! order. What happens on a failed ack is set by [`AckFailurePolicy`].

use std::sync::Arc;

use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::metrics::{self, AckStatus};
use crate::record::RecordId;
use crate::store::LogStore;

/// Behaviour when an acknowledge call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckFailurePolicy {
    /// Log, count and continue; the record stays pending for later reclaim.
    #[default]
    LogAndSkip,
    /// Stop at the first failure and return it.
    FailStage,
}

/// Acknowledgment stage configuration
#[derive(Debug, Clone)]
pub struct AckConfig {
    /// Stream the records belong to
    pub stream: String,
    /// Consumer group
    pub group: String,
    /// Acks in flight at once
    pub max_in_flight: usize,
    /// Failure handling
    pub failure_policy: AckFailurePolicy,
}

impl AckConfig {
    /// Defaults for the given stream and group.
    pub fn new(stream: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            max_in_flight: 16,
            failure_policy: AckFailurePolicy::default(),
        }
    }
}

/// Totals for one run of the stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckSummary {
    /// Removed from the pending list
    pub acked: u64,
    /// Not pending any more (already acknowledged)
    pub already_acked: u64,
    /// Failed and skipped
    pub failed: u64,
}

/// Bounded-concurrency acknowledger.
pub struct Acknowledger {
    store: Arc<dyn LogStore>,
    config: AckConfig,
}

impl Acknowledger {
    /// Create an acknowledger. A zero width is raised to one.
    pub fn new(store: Arc<dyn LogStore>, mut config: AckConfig) -> Self {
        config.max_in_flight = config.max_in_flight.max(1);
        Self { store, config }
    }

    /// Acknowledger configuration
    pub fn config(&self) -> &AckConfig {
        &self.config
    }

    /// Acknowledge one record. `Ok(false)` means it was not pending.
    pub async fn ack_one(&self, id: RecordId) -> Result<bool> {
        let result = self
            .store
            .ack(&self.config.stream, &self.config.group, &id)
            .await;
        let status = match result {
            Ok(true) => AckStatus::Acked,
            Ok(false) => AckStatus::Noop,
            Err(_) => AckStatus::Failed,
        };
        metrics::record_ack(&self.config.stream, status);
        result
    }

    /// Acknowledge every id from `ids` until the input ends.
    ///
    /// Under [`AckFailurePolicy::FailStage`] the first failure is returned as
    /// [`PipelineError::AckFailed`] and acks still in flight are abandoned.
    pub async fn run<S>(&self, ids: S) -> Result<AckSummary>
    where
        S: Stream<Item = RecordId> + Send,
    {
        let results = ids
            .map(|id| async move { (id, self.ack_one(id).await) })
            .buffer_unordered(self.config.max_in_flight);
        tokio::pin!(results);

        let mut summary = AckSummary::default();
        while let Some((id, result)) = results.next().await {
            match result {
                Ok(true) => summary.acked += 1,
                Ok(false) => summary.already_acked += 1,
                Err(e) => match self.config.failure_policy {
                    AckFailurePolicy::LogAndSkip => {
                        warn!(
                            stream = %self.config.stream,
                            group = %self.config.group,
                            id = %id,
                            error = %e,
                            "ack failed, record left pending"
                        );
                        summary.failed += 1;
                    }
                    AckFailurePolicy::FailStage => {
                        return Err(PipelineError::AckFailed {
                            id: id.to_string(),
                            cause: e.to_string(),
                        });
                    }
                },
            }
        }

        debug!(
            stream = %self.config.stream,
            group = %self.config.group,
            acked = summary.acked,
            already_acked = summary.already_acked,
            failed = summary.failed,
            "ack stage finished"
        );
        Ok(summary)
    }
}
