//! Shared data model for batchrun ETL jobs.
//!
//! Pure data types used by the engine and the state crate: records in
//! their three lifecycle stages, the structured dependency error model,
//! run tracking types, and the per-run completion event.

#![warn(clippy::pedantic)]

pub mod error;
pub mod event;
pub mod record;
pub mod run;
