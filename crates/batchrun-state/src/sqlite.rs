//! `SQLite`-backed implementation of [`JobStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety. The
//! `committed_keys` primary key makes `claim_key` an atomic
//! insert-if-absent, which is what converts at-least-once warehouse
//! writes into effectively-once delivery.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use batchrun_types::record::RejectedRecord;
use batchrun_types::run::{JobId, RunStats, RunStatus, TableName};
use chrono::Utc;
use rusqlite::Connection;

use crate::backend::JobStore;
use crate::error::{self, StateError};

/// Idempotent DDL for job state tables.
const CREATE_TABLES: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS job_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    records_extracted INTEGER DEFAULT 0,
    records_committed INTEGER DEFAULT 0,
    records_rejected INTEGER DEFAULT 0,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS committed_keys (
    destination TEXT NOT NULL,
    record_key TEXT NOT NULL,
    committed_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (destination, record_key)
);

CREATE TABLE IF NOT EXISTS dlq_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job TEXT NOT NULL,
    run_id INTEGER NOT NULL REFERENCES job_runs(id),
    destination TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    reason TEXT NOT NULL,
    error_message TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    rejected_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_dlq_job_run ON dlq_records (job, run_id);
";

/// `SQLite`-backed job state storage.
///
/// Create with [`SqliteJobStore::open`] for file-backed persistence or
/// [`SqliteJobStore::in_memory`] for tests.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    #[cfg(test)]
    fn get_run_row(
        &self,
        run_id: i64,
    ) -> error::Result<(String, i64, Option<String>, Option<String>)> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT status, records_committed, finished_at, error_message \
             FROM job_runs WHERE id = ?1",
            [run_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .map_err(StateError::backend)
    }

    #[cfg(test)]
    fn first_dlq_reason_error(&self, job: &JobId) -> error::Result<(String, String)> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT reason, error_message FROM dlq_records \
             WHERE job = ?1 ORDER BY id LIMIT 1",
            rusqlite::params![job.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(StateError::backend)
    }
}

impl JobStore for SqliteJobStore {
    fn start_run(&self, job: &JobId) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO job_runs (job, status) VALUES (?1, ?2)",
            rusqlite::params![job.as_str(), RunStatus::Running.as_str()],
        )
        .map_err(StateError::backend)?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = datetime('now'), \
             records_extracted = ?2, records_committed = ?3, records_rejected = ?4, \
             error_message = ?5 WHERE id = ?6",
            rusqlite::params![
                status.as_str(),
                stats.records_extracted as i64,
                stats.records_committed as i64,
                stats.records_rejected as i64,
                stats.error_message,
                run_id,
            ],
        )
        .map_err(StateError::backend)?;
        Ok(())
    }

    fn contains_key(&self, table: &TableName, key: &str) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM committed_keys \
                 WHERE destination = ?1 AND record_key = ?2",
                rusqlite::params![table.as_str(), key],
                |row| row.get(0),
            )
            .map_err(StateError::backend)?;
        Ok(count > 0)
    }

    fn claim_key(&self, table: &TableName, key: &str) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let rows_affected = conn
            .execute(
                "INSERT OR IGNORE INTO committed_keys (destination, record_key, committed_at) \
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![table.as_str(), key, now],
            )
            .map_err(|e| StateError::backend_context("claim_key: execute", e))?;
        Ok(rows_affected > 0)
    }

    fn insert_rejected(
        &self,
        job: &JobId,
        run_id: i64,
        table: &TableName,
        records: &[RejectedRecord],
    ) -> error::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("insert_rejected: begin tx", e))?;
        let mut stmt = tx
            .prepare(
                "INSERT INTO dlq_records \
                 (job, run_id, destination, payload_json, reason, error_message, attempts, rejected_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(|e| StateError::backend_context("insert_rejected: prepare", e))?;

        let mut count = 0u64;
        for record in records {
            stmt.execute(rusqlite::params![
                job.as_str(),
                run_id,
                table.as_str(),
                record.payload_json,
                record.reason.as_str(),
                record.error_message,
                record.attempts,
                record.rejected_at.as_str(),
            ])
            .map_err(|e| StateError::backend_context("insert_rejected: execute", e))?;
            count += 1;
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::backend_context("insert_rejected: commit", e))?;

        Ok(count)
    }

    fn rejected_count(&self, job: &JobId, run_id: i64) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM dlq_records WHERE job = ?1 AND run_id = ?2",
            rusqlite::params![job.as_str(), run_id],
            |row| row.get(0),
        )
        .map_err(StateError::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchrun_types::record::{RejectReason, Timestamp};

    fn job(name: &str) -> JobId {
        JobId::new(name)
    }

    fn table(name: &str) -> TableName {
        TableName::new(name)
    }

    fn rejected(payload: &str, msg: &str) -> RejectedRecord {
        RejectedRecord {
            payload_json: payload.into(),
            reason: RejectReason::SchemaViolation,
            error_message: msg.into(),
            attempts: 1,
            rejected_at: Timestamp::new("2026-08-25T12:00:00+00:00"),
        }
    }

    #[test]
    fn run_lifecycle() {
        let store = SqliteJobStore::in_memory().unwrap();
        let run_id = store.start_run(&job("orders-daily")).unwrap();
        assert!(run_id > 0);

        store
            .complete_run(
                run_id,
                RunStatus::Completed,
                &RunStats {
                    records_extracted: 1000,
                    records_committed: 995,
                    records_rejected: 5,
                    error_message: None,
                },
            )
            .unwrap();

        let (status, committed, finished, _error) = store.get_run_row(run_id).unwrap();
        assert_eq!(status, "completed");
        assert_eq!(committed, 995);
        assert!(finished.is_some());
    }

    #[test]
    fn run_failure_records_error() {
        let store = SqliteJobStore::in_memory().unwrap();
        let run_id = store.start_run(&job("orders-daily")).unwrap();

        store
            .complete_run(
                run_id,
                RunStatus::Failed,
                &RunStats {
                    records_extracted: 50,
                    records_committed: 0,
                    records_rejected: 0,
                    error_message: Some("source unreachable".into()),
                },
            )
            .unwrap();

        let (status, _committed, _finished, error_msg) = store.get_run_row(run_id).unwrap();
        assert_eq!(status, "failed");
        assert_eq!(error_msg, Some("source unreachable".into()));
    }

    #[test]
    fn multiple_runs_get_distinct_ids() {
        let store = SqliteJobStore::in_memory().unwrap();
        let run1 = store.start_run(&job("j")).unwrap();
        let run2 = store.start_run(&job("j")).unwrap();
        assert_ne!(run1, run2);
        assert!(run2 > run1);
    }

    #[test]
    fn claim_key_is_insert_if_absent() {
        let store = SqliteJobStore::in_memory().unwrap();
        assert!(!store.contains_key(&table("trusted.orders"), "k1").unwrap());

        assert!(store.claim_key(&table("trusted.orders"), "k1").unwrap());
        assert!(store.contains_key(&table("trusted.orders"), "k1").unwrap());

        // Second claim for the same (table, key) loses.
        assert!(!store.claim_key(&table("trusted.orders"), "k1").unwrap());
    }

    #[test]
    fn keys_are_scoped_per_table() {
        let store = SqliteJobStore::in_memory().unwrap();
        assert!(store.claim_key(&table("trusted.orders"), "k1").unwrap());
        assert!(store.claim_key(&table("trusted.invoices"), "k1").unwrap());
        assert!(store.contains_key(&table("trusted.orders"), "k1").unwrap());
        assert!(store
            .contains_key(&table("trusted.invoices"), "k1")
            .unwrap());
    }

    #[test]
    fn claims_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("jobs.db");

        {
            let store = SqliteJobStore::open(&path).unwrap();
            assert!(store.claim_key(&table("trusted.orders"), "k1").unwrap());
        }

        let store = SqliteJobStore::open(&path).unwrap();
        assert!(store.contains_key(&table("trusted.orders"), "k1").unwrap());
        assert!(!store.claim_key(&table("trusted.orders"), "k1").unwrap());
    }

    #[test]
    fn dlq_insert_and_count() {
        let store = SqliteJobStore::in_memory().unwrap();
        let run_id = store.start_run(&job("j")).unwrap();

        let records = vec![
            rejected(r#"{"id":1}"#, "id: required field missing"),
            rejected(r#"{"id":2}"#, "amount: expected number"),
        ];

        let count = store
            .insert_rejected(&job("j"), run_id, &table("dlq.orders"), &records)
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(store.rejected_count(&job("j"), run_id).unwrap(), 2);

        let (reason, error_msg) = store.first_dlq_reason_error(&job("j")).unwrap();
        assert_eq!(reason, "schema_violation");
        assert_eq!(error_msg, "id: required field missing");
    }

    #[test]
    fn dlq_empty_insert_is_noop() {
        let store = SqliteJobStore::in_memory().unwrap();
        let count = store
            .insert_rejected(&job("j"), 1, &table("dlq.orders"), &[])
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn dlq_invalid_run_id_includes_operation_context() {
        let store = SqliteJobStore::in_memory().unwrap();
        let records = vec![rejected(r#"{"id":1}"#, "bad row")];

        let err = store
            .insert_rejected(&job("j"), 999, &table("dlq.orders"), &records)
            .expect_err("invalid run id should fail");
        assert!(err.to_string().contains("insert_rejected"));
    }
}
