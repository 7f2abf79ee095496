//! Durable job state for batchrun ETL jobs.
//!
//! Provides the [`JobStore`] trait and a [`SqliteJobStore`]
//! implementation covering the idempotency ledger, dead-letter
//! records, and run history.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::JobStore;
pub use error::StateError;
pub use sqlite::SqliteJobStore;
