//! External collaborator traits.
//!
//! The engine orchestrates these but owns none of them: the source is
//! behind [`Extractor`], the warehouse behind [`Warehouse`]. Both are
//! consumed through the retry controller, so implementations report
//! failures as classified [`DependencyError`]s rather than retrying
//! internally.

use async_trait::async_trait;
use batchrun_types::error::DependencyError;
use batchrun_types::record::{RawRecord, ValidatedRecord};
use batchrun_types::run::TableName;

/// Source of raw records for one run.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetch the batch for this run. May be empty.
    ///
    /// `cursor` is the job's persisted extraction position, if any.
    ///
    /// # Errors
    ///
    /// Returns a classified [`DependencyError`]; transient source
    /// errors are retried by the engine under the batch-scoped policy.
    async fn fetch_batch(&self, cursor: Option<&str>) -> Result<Vec<RawRecord>, DependencyError>;
}

/// Destination warehouse for validated records.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Insert one validated record into `table`.
    ///
    /// Writes are treated as at-least-once; the idempotency guard
    /// converts them into effectively-once.
    ///
    /// # Errors
    ///
    /// Returns a classified [`DependencyError`]; retry handling is the
    /// engine's job.
    async fn insert(&self, table: &TableName, record: &ValidatedRecord)
        -> Result<(), DependencyError>;
}
