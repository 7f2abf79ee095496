//! Per-run completion event.
//!
//! Exactly one [`CompletionEvent`] is emitted per job run, success or
//! failure. Consumers rely on the fixed field set; the `event` field is
//! always `"job_completed"` so downstream log routing can match on it.

use crate::record::Timestamp;
use serde::{Deserialize, Serialize};

/// Name of the completion event type, fixed for routing.
pub const COMPLETION_EVENT_NAME: &str = "job_completed";

/// Structured summary of one job run.
///
/// Invariant: for every run that completes its loading phase,
/// `valid_records + dlq_records` equals the number of records observed
/// in the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    /// Event type, always [`COMPLETION_EVENT_NAME`].
    pub event: String,
    /// Job name.
    pub job: String,
    /// Run timestamp (ISO-8601).
    pub timestamp: Timestamp,
    /// Records committed to the warehouse (including idempotent skips).
    pub valid_records: u64,
    /// Records routed to the dead-letter store.
    pub dlq_records: u64,
    /// Wall-clock run duration in seconds.
    pub duration_seconds: f64,
    /// `false` only if the run failed or timed out; partial rejection
    /// is normal operation.
    pub success: bool,
    /// Failure or timeout reason, absent on clean runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CompletionEvent {
    /// Build a completion event with the fixed `event` field filled in.
    #[must_use]
    pub fn new(
        job: impl Into<String>,
        timestamp: Timestamp,
        valid_records: u64,
        dlq_records: u64,
        duration_seconds: f64,
        success: bool,
        reason: Option<String>,
    ) -> Self {
        Self {
            event: COMPLETION_EVENT_NAME.to_string(),
            job: job.into(),
            timestamp,
            valid_records,
            dlq_records,
            duration_seconds,
            success,
            reason,
        }
    }
}
