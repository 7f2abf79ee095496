//! Completion reporting.
//!
//! The engine emits exactly one [`CompletionEvent`] per run through a
//! [`CompletionSink`]. The default sink writes the event to the
//! structured log as a single JSON object; tests capture events with
//! an in-memory sink instead.

use batchrun_types::event::CompletionEvent;

/// Destination for per-run completion events.
///
/// Implementations must not fail the run: reporting is best-effort and
/// happens after the run's fate is already decided.
pub trait CompletionSink: Send + Sync {
    /// Deliver one completion event.
    fn emit(&self, event: &CompletionEvent);
}

/// Sink that logs completion events as structured JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl CompletionSink for LogSink {
    fn emit(&self, event: &CompletionEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                tracing::info!(
                    job = %event.job,
                    success = event.success,
                    valid_records = event.valid_records,
                    dlq_records = event.dlq_records,
                    payload = %json,
                    "Job completed"
                );
            }
            Err(err) => {
                // Serialization of a plain struct should not fail; log
                // the fields themselves so the run still leaves a trace.
                tracing::error!(
                    job = %event.job,
                    success = event.success,
                    valid_records = event.valid_records,
                    dlq_records = event.dlq_records,
                    error = %err,
                    "Job completed (event serialization failed)"
                );
            }
        }
    }
}
