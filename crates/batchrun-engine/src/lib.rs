//! Resilient record-processing engine for batchrun ETL jobs.
//!
//! One [`JobEngine`](engine::JobEngine) run pulls a batch from an
//! extractor, validates every record against the job's declared schema,
//! loads valid records into the warehouse behind the retry controller
//! and the idempotency guard, routes everything else to the dead-letter
//! store, and finishes by emitting exactly one completion event.

#![warn(clippy::pedantic)]

pub mod collaborators;
pub mod config;
pub mod dlq;
pub mod engine;
pub mod error;
pub mod guard;
pub mod logging;
pub mod report;
pub mod retry;
pub mod schema;

pub use config::JobConfig;
pub use engine::JobEngine;
pub use error::EngineError;
pub use retry::RetryPolicy;
pub use schema::RecordSchema;
