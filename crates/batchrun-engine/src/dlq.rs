//! Dead-letter router.
//!
//! Persists rejected records with enough context to diagnose and
//! replay them. Delivery itself goes through the retry controller
//! under a distinct, more tolerant policy. If even that is exhausted,
//! the configured escalation policy decides between failing the run
//! and marking it degraded; either way the loss is loud, never silent.

use std::sync::Arc;

use batchrun_state::JobStore;
use batchrun_types::error::DependencyError;
use batchrun_types::record::{RejectReason, RejectedRecord, Timestamp};
use batchrun_types::run::{JobId, TableName};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::retry::{self, RetryPolicy};

/// What to do when dead-letter delivery itself exhausts its retries.
///
/// Operator policy, explicit and configurable: `FailRun` (default)
/// aborts the run so no record is ever lost without trace; `Degrade`
/// logs the loss, keeps the run going, and flags the completion event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqExhaustionPolicy {
    #[default]
    FailRun,
    Degrade,
}

/// Outcome of one dead-letter delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqOutcome {
    /// Record persisted durably.
    Persisted,
    /// Delivery exhausted and policy is `Degrade`; record was logged
    /// but not persisted.
    Dropped,
}

/// Routes rejected records to the durable dead-letter store.
pub struct DeadLetterRouter {
    store: Arc<dyn JobStore>,
    job: JobId,
    run_id: i64,
    table: TableName,
    policy: RetryPolicy,
    on_exhausted: DlqExhaustionPolicy,
}

impl DeadLetterRouter {
    /// Create a router for one run's dead-letter table.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        job: JobId,
        run_id: i64,
        table: TableName,
        policy: RetryPolicy,
        on_exhausted: DlqExhaustionPolicy,
    ) -> Self {
        Self {
            store,
            job,
            run_id,
            table,
            policy,
            on_exhausted,
        }
    }

    /// Persist one rejected record.
    ///
    /// `attempts` is the number of load attempts made before rejection
    /// (1 for schema violations, which are never retried).
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] only when delivery is exhausted and
    /// the escalation policy is [`DlqExhaustionPolicy::FailRun`].
    pub async fn reject(
        &self,
        payload_json: String,
        reason: RejectReason,
        error_message: String,
        attempts: u32,
    ) -> Result<DlqOutcome, EngineError> {
        let record = RejectedRecord {
            payload_json,
            reason,
            error_message,
            attempts,
            rejected_at: Timestamp::new(chrono::Utc::now().to_rfc3339()),
        };

        let records = std::slice::from_ref(&record);
        let result = retry::execute(&self.policy, "dead-letter append", || async {
            self.store
                .insert_rejected(&self.job, self.run_id, &self.table, records)
                .map_err(|e| DependencyError::transient_store("DLQ_IO", e.to_string()))?;
            Ok(())
        })
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    job = self.job.as_str(),
                    run_id = self.run_id,
                    reason = %record.reason,
                    attempts = record.attempts,
                    "Record routed to dead-letter store"
                );
                Ok(DlqOutcome::Persisted)
            }
            Err(err) => match self.on_exhausted {
                DlqExhaustionPolicy::FailRun => {
                    tracing::error!(
                        job = self.job.as_str(),
                        run_id = self.run_id,
                        error = %err,
                        "Dead-letter delivery exhausted, failing run"
                    );
                    Err(EngineError::Dependency(err.last_error().clone()))
                }
                DlqExhaustionPolicy::Degrade => {
                    tracing::error!(
                        job = self.job.as_str(),
                        run_id = self.run_id,
                        payload = %record.payload_json,
                        reason = %record.reason,
                        error = %err,
                        "Dead-letter delivery exhausted, continuing degraded"
                    );
                    Ok(DlqOutcome::Dropped)
                }
            },
        }
    }
}
