//! Idempotency guard over the durable commit ledger.
//!
//! A run may be retried wholesale after partial completion, and
//! multiple instances may run concurrently against the same ledger.
//! The guard makes the per-record check-then-set a single critical
//! section: an in-process reservation keeps two concurrent loaders in
//! this run from both passing the not-yet-committed check, and the
//! ledger's atomic insert-if-absent covers cross-instance races.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use batchrun_state::JobStore;
use batchrun_types::error::DependencyError;
use batchrun_types::run::TableName;

/// Guards warehouse commits for one destination table.
///
/// The ledger is the single source of truth for "already delivered":
/// warehouse writes are at-least-once, and the guard converts that into
/// effectively-once from the engine's perspective.
pub struct IdempotencyGuard {
    store: Arc<dyn JobStore>,
    table: TableName,
    in_flight: Mutex<HashSet<String>>,
}

impl IdempotencyGuard {
    /// Create a guard scoped to `table`.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, table: TableName) -> Self {
        Self {
            store,
            table,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Whether a write for `record_key` should proceed.
    ///
    /// Returns `false` when the key is already committed (or another
    /// loader in this run holds it in flight); `true` reserves the key
    /// for this caller until [`mark_committed`](Self::mark_committed)
    /// or [`release`](Self::release).
    ///
    /// # Errors
    ///
    /// Ledger access failures are reported as retryable store errors;
    /// the engine retries them under the batch-scoped policy.
    pub fn should_commit(&self, record_key: &str) -> Result<bool, DependencyError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| DependencyError::internal("GUARD_LOCK", "guard lock poisoned"))?;

        if in_flight.contains(record_key) {
            return Ok(false);
        }
        let committed = self
            .store
            .contains_key(&self.table, record_key)
            .map_err(ledger_error)?;
        if committed {
            return Ok(false);
        }
        in_flight.insert(record_key.to_string());
        Ok(true)
    }

    /// Record `record_key` as committed after a successful write.
    ///
    /// # Errors
    ///
    /// Ledger access failures are reported as retryable store errors.
    pub fn mark_committed(&self, record_key: &str) -> Result<(), DependencyError> {
        // claim_key result is ignored: a concurrent job instance
        // having claimed first is fine, the write was at-least-once.
        self.store
            .claim_key(&self.table, record_key)
            .map_err(ledger_error)?;
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(record_key);
        }
        Ok(())
    }

    /// Drop the in-process reservation after a failed write so a
    /// later replay can retry the key.
    pub fn release(&self, record_key: &str) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(record_key);
        }
    }
}

fn ledger_error(err: batchrun_state::StateError) -> DependencyError {
    DependencyError::transient_store("LEDGER_IO", err.to_string())
}
