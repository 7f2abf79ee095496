//! Job store trait definition.
//!
//! [`JobStore`] defines the storage contract for the idempotency
//! ledger, dead-letter records, and run history. Model types live in
//! [`batchrun_types`].

use batchrun_types::record::RejectedRecord;
use batchrun_types::run::{JobId, RunStats, RunStatus, TableName};

use crate::error;

/// Storage contract for job state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn JobStore>`.
/// Multiple job instances may operate against the same store
/// concurrently; [`claim_key`](JobStore::claim_key) is the atomic
/// check-and-set that keeps them from double-committing.
pub trait JobStore: Send + Sync {
    /// Begin a new job run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn start_run(&self, job: &JobId) -> error::Result<i64>;

    /// Finalize a job run with status and aggregate stats.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()>;

    /// Whether `key` has already been committed to `table`.
    ///
    /// Ledger keys are scoped per destination table, never globally.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn contains_key(&self, table: &TableName, key: &str) -> error::Result<bool>;

    /// Atomically record `key` as committed to `table`.
    ///
    /// Insert-if-absent: returns `true` if this call claimed the key,
    /// `false` if it was already present. Concurrent callers for the
    /// same (table, key) pair see exactly one `true`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn claim_key(&self, table: &TableName, key: &str) -> error::Result<bool>;

    /// Persist rejected records for a run into the job's dead-letter
    /// table. Returns the count inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn insert_rejected(
        &self,
        job: &JobId,
        run_id: i64,
        table: &TableName,
        records: &[RejectedRecord],
    ) -> error::Result<u64>;

    /// Count dead-letter records persisted for a run (inspection/replay).
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn rejected_count(&self, job: &JobId, run_id: i64) -> error::Result<i64>;
}
