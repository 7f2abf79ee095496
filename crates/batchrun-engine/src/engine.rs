//! Job execution engine.
//!
//! Drives one run through its phases: extract, validate, load,
//! report. Validation is a pure sequential pass; loading fans out over
//! a bounded set of concurrent tasks, each handling one record
//! end-to-end (idempotency check, guarded insert, ledger update).
//! Record-scoped failures are routed to the dead-letter store and the
//! run continues; batch-scoped failures end the run as failed. Either
//! way exactly one completion event is emitted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use batchrun_state::JobStore;
use batchrun_types::event::CompletionEvent;
use batchrun_types::record::{RejectReason, Timestamp, ValidatedRecord};
use batchrun_types::run::{RunStats, RunStatus, TableName};
use tokio::task::JoinSet;

use crate::collaborators::{Extractor, Warehouse};
use crate::config::JobConfig;
use crate::dlq::{DeadLetterRouter, DlqOutcome};
use crate::error::EngineError;
use crate::guard::IdempotencyGuard;
use crate::report::CompletionSink;
use crate::retry::{self, RetryError, RetryPolicy};

const DEADLINE_REASON: &str = "run deadline exceeded";

/// Phases of one run, in order. A run moves forward only; any
/// batch-scoped failure jumps straight to reporting with a failed
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Extracting,
    Validating,
    Loading,
    Reporting,
}

impl RunPhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Extracting => "extracting",
            Self::Validating => "validating",
            Self::Loading => "loading",
            Self::Reporting => "reporting",
        }
    }
}

/// How one spawned load task ended.
enum LoadOutcome {
    /// Inserted and recorded in the ledger.
    Committed,
    /// Ledger already held the key; no warehouse call was made.
    AlreadyCommitted,
    /// Insert gave up; the record goes to the dead-letter store.
    Rejected {
        payload_json: String,
        error_message: String,
        attempts: u32,
    },
}

/// What a run accumulated before it finished or gave up.
struct RunOutcome {
    stats: RunStats,
    timed_out: bool,
    /// Rejected records whose dead-letter delivery was exhausted and
    /// dropped under the degrade policy. Never silent: a non-zero
    /// count flags the completion event.
    degraded: u64,
    error: Option<EngineError>,
}

/// Orchestrates runs of one configured job.
pub struct JobEngine {
    config: JobConfig,
    extractor: Arc<dyn Extractor>,
    warehouse: Arc<dyn Warehouse>,
    store: Arc<dyn JobStore>,
    sink: Arc<dyn CompletionSink>,
}

impl JobEngine {
    /// Assemble an engine from a validated config and its collaborators.
    #[must_use]
    pub fn new(
        config: JobConfig,
        extractor: Arc<dyn Extractor>,
        warehouse: Arc<dyn Warehouse>,
        store: Arc<dyn JobStore>,
        sink: Arc<dyn CompletionSink>,
    ) -> Self {
        Self {
            config,
            extractor,
            warehouse,
            store,
            sink,
        }
    }

    /// Execute one run.
    ///
    /// `cursor` is the job's persisted extraction position, if any.
    /// A completion event is emitted on every path before returning,
    /// including failures.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when a batch-scoped failure ends the
    /// run: extraction exhaustion, ledger unavailability, or exhausted
    /// dead-letter delivery under the fail-run policy. Record-scoped
    /// failures never surface here; they end up in the dead-letter
    /// store and the run returns `Ok`.
    pub async fn run(&self, cursor: Option<&str>) -> Result<CompletionEvent, EngineError> {
        let started = Instant::now();
        let job = &self.config.job;

        tracing::info!(
            job = job.as_str(),
            destination = self.config.destination_table.as_str(),
            concurrency = self.config.concurrency,
            "Starting job run"
        );

        let outcome = match self.store.start_run(job) {
            Ok(run_id) => self.execute(run_id, cursor, started).await,
            Err(err) => RunOutcome {
                stats: RunStats {
                    error_message: Some(err.to_string()),
                    ..RunStats::default()
                },
                timed_out: false,
                degraded: 0,
                error: Some(EngineError::Infrastructure(anyhow::anyhow!(
                    "failed to start run: {err}"
                ))),
            },
        };

        let success = outcome.error.is_none() && !outcome.timed_out;
        let reason = outcome
            .stats
            .error_message
            .clone()
            .or_else(|| outcome.timed_out.then(|| DEADLINE_REASON.to_string()));

        let event = CompletionEvent::new(
            job.as_str(),
            Timestamp::new(chrono::Utc::now().to_rfc3339()),
            outcome.stats.records_committed,
            outcome.stats.records_rejected,
            started.elapsed().as_secs_f64(),
            success,
            reason,
        );
        self.sink.emit(&event);

        match outcome.error {
            None => Ok(event),
            Some(err) => Err(err),
        }
    }

    /// Run the extract/validate/load phases, always finalizing the run
    /// row with whatever was accumulated.
    async fn execute(&self, run_id: i64, cursor: Option<&str>, started: Instant) -> RunOutcome {
        let router = DeadLetterRouter::new(
            self.store.clone(),
            self.config.job.clone(),
            run_id,
            self.config.dead_letter_table.clone(),
            self.config.dead_letter_retry.clone(),
            self.config.on_dlq_exhausted,
        );
        let deadline = self
            .config
            .deadline_seconds
            .map(|secs| started + Duration::from_secs(secs));

        let mut outcome = self.process_batch(run_id, cursor, &router, deadline).await;

        self.enter_phase(run_id, RunPhase::Reporting);
        let status = if outcome.error.is_some() || outcome.timed_out {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        if outcome.timed_out && outcome.stats.error_message.is_none() {
            outcome.stats.error_message = Some(DEADLINE_REASON.to_string());
        }
        if outcome.degraded > 0 {
            tracing::warn!(
                job = self.config.job.as_str(),
                run_id,
                degraded = outcome.degraded,
                "Run finished with dead-letter records dropped under degrade policy"
            );
            if outcome.stats.error_message.is_none() {
                outcome.stats.error_message = Some(format!(
                    "dead-letter delivery degraded: {} records dropped",
                    outcome.degraded
                ));
            }
        }
        if let Err(err) = self.store.complete_run(run_id, status, &outcome.stats) {
            // The run's fate is already decided; don't mask it.
            tracing::warn!(
                job = self.config.job.as_str(),
                run_id,
                error = %err,
                "Failed to finalize run row"
            );
        }

        tracing::info!(
            job = self.config.job.as_str(),
            run_id,
            status = %status,
            records_extracted = outcome.stats.records_extracted,
            records_committed = outcome.stats.records_committed,
            records_rejected = outcome.stats.records_rejected,
            "Job run finished"
        );
        outcome
    }

    fn enter_phase(&self, run_id: i64, phase: RunPhase) {
        tracing::debug!(
            job = self.config.job.as_str(),
            run_id,
            phase = phase.as_str(),
            "Entering run phase"
        );
    }

    async fn process_batch(
        &self,
        run_id: i64,
        cursor: Option<&str>,
        router: &DeadLetterRouter,
        deadline: Option<Instant>,
    ) -> RunOutcome {
        let mut stats = RunStats::default();
        let mut degraded = 0u64;

        // Extraction is batch-scoped: no records, no run.
        self.enter_phase(run_id, RunPhase::Extracting);
        let fetch = retry::execute(&self.config.batch_retry, "source fetch", || async {
            self.extractor.fetch_batch(cursor).await
        })
        .await;
        let raw_batch = match fetch {
            Ok(batch) => batch,
            Err(err) => {
                stats.error_message = Some(format!("extraction failed: {}", err.last_error()));
                return RunOutcome {
                    stats,
                    timed_out: false,
                    degraded,
                    error: Some(EngineError::Dependency(err.last_error().clone())),
                };
            }
        };
        stats.records_extracted = raw_batch.len() as u64;
        let batch_id = format!("{}-run-{run_id}", self.config.job);

        // Validation: pure, sequential, never stops the run.
        self.enter_phase(run_id, RunPhase::Validating);
        let mut validated = Vec::with_capacity(raw_batch.len());
        for raw in &raw_batch {
            match self.config.schema.validate(raw, &batch_id) {
                Ok(record) => validated.push(record),
                Err(failure) => {
                    stats.records_rejected += 1;
                    let reject = router
                        .reject(
                            serde_json::Value::Object(raw.clone()).to_string(),
                            RejectReason::SchemaViolation,
                            failure.to_string(),
                            1,
                        )
                        .await;
                    match reject {
                        Ok(DlqOutcome::Persisted) => {}
                        Ok(DlqOutcome::Dropped) => degraded += 1,
                        Err(err) => {
                            stats.error_message = Some(err.to_string());
                            return RunOutcome {
                                stats,
                                timed_out: false,
                                degraded,
                                error: Some(err),
                            };
                        }
                    }
                }
            }
        }

        // Loading: bounded fan-out, one task per record.
        self.enter_phase(run_id, RunPhase::Loading);
        let guard = Arc::new(IdempotencyGuard::new(
            self.store.clone(),
            self.config.destination_table.clone(),
        ));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.concurrency.max(1)));
        let mut join_set: JoinSet<Result<LoadOutcome, EngineError>> = JoinSet::new();
        let mut timed_out = false;
        let mut first_error: Option<EngineError> = None;

        for record in validated {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(
                    job = self.config.job.as_str(),
                    run_id,
                    "Deadline reached, no further records admitted"
                );
                timed_out = true;
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    first_error = Some(EngineError::Infrastructure(anyhow::anyhow!(
                        "load semaphore closed: {err}"
                    )));
                    break;
                }
            };
            let warehouse = self.warehouse.clone();
            let guard = guard.clone();
            let table = self.config.destination_table.clone();
            let load_retry = self.config.load_retry.clone();
            let batch_retry = self.config.batch_retry.clone();
            join_set.spawn(async move {
                let _permit = permit;
                load_one(&*warehouse, &guard, &table, &load_retry, &batch_retry, record).await
            });
        }

        // Drain everything that was admitted; in-flight records finish
        // even after a deadline or a batch-scoped error.
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(LoadOutcome::Committed | LoadOutcome::AlreadyCommitted)) => {
                    stats.records_committed += 1;
                }
                Ok(Ok(LoadOutcome::Rejected {
                    payload_json,
                    error_message,
                    attempts,
                })) => {
                    stats.records_rejected += 1;
                    let reject = router
                        .reject(payload_json, RejectReason::LoadFailure, error_message, attempts)
                        .await;
                    match reject {
                        Ok(DlqOutcome::Persisted) => {}
                        Ok(DlqOutcome::Dropped) => degraded += 1,
                        Err(err) => {
                            if first_error.is_none() {
                                first_error = Some(err);
                            }
                        }
                    }
                }
                Ok(Err(err)) => {
                    tracing::error!(
                        job = self.config.job.as_str(),
                        run_id,
                        error = %err,
                        "Load task failed"
                    );
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(EngineError::Infrastructure(anyhow::anyhow!(
                            "load task join error: {join_err}"
                        )));
                    }
                }
            }
        }

        if let Some(err) = &first_error {
            stats.error_message = Some(err.to_string());
        }
        RunOutcome {
            stats,
            timed_out,
            degraded,
            error: first_error,
        }
    }
}

/// Load one record end-to-end: ledger check, guarded insert, ledger
/// update. Ledger access goes through the batch-scoped retry policy;
/// its exhaustion is a batch-scoped error, not a record rejection.
async fn load_one(
    warehouse: &dyn Warehouse,
    guard: &IdempotencyGuard,
    table: &TableName,
    load_retry: &RetryPolicy,
    batch_retry: &RetryPolicy,
    record: ValidatedRecord,
) -> Result<LoadOutcome, EngineError> {
    let key = record.record_key.clone();

    let admitted = retry::execute(batch_retry, "ledger check", || async {
        guard.should_commit(&key)
    })
    .await
    .map_err(|err| EngineError::Dependency(err.last_error().clone()))?;
    if !admitted {
        tracing::debug!(record_key = %key, "Skipping already-committed record");
        return Ok(LoadOutcome::AlreadyCommitted);
    }

    let insert = retry::execute(load_retry, "warehouse insert", || async {
        warehouse.insert(table, &record).await
    })
    .await;

    match insert {
        Ok(()) => {
            retry::execute(batch_retry, "ledger mark", || async {
                guard.mark_committed(&key)
            })
            .await
            .map_err(|err| EngineError::Dependency(err.last_error().clone()))?;
            Ok(LoadOutcome::Committed)
        }
        Err(err @ (RetryError::Fatal { .. } | RetryError::Exhausted { .. })) => {
            guard.release(&key);
            Ok(LoadOutcome::Rejected {
                payload_json: serde_json::Value::Object(record.fields.clone()).to_string(),
                error_message: err.to_string(),
                attempts: err.attempts(),
            })
        }
    }
}
