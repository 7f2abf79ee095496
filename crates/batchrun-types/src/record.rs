//! Record lifecycle types.
//!
//! A [`RawRecord`] exists only for the duration of one run. Validation
//! promotes it to an immutable [`ValidatedRecord`] or, on failure,
//! to a [`RejectedRecord`] bound for the dead-letter store. Every raw
//! record entering the pipeline terminates in exactly one of the two.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Untyped key-value record as produced by the source.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// ISO-8601 formatted timestamp string.
///
/// Thin wrapper providing type clarity. No format validation; callers
/// are trusted to provide valid ISO-8601 strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// Create a new timestamp from an ISO-8601 string.
    #[must_use]
    pub fn new(iso8601: impl Into<String>) -> Self {
        Self(iso8601.into())
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A raw record proven to satisfy the job schema.
///
/// Immutable once created. `record_key` is deterministic over the
/// record's natural identifying fields and drives the idempotency
/// ledger; `batch_id` identifies the source batch the record arrived in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRecord {
    /// Deterministic key over the schema's key fields (hex digest).
    pub record_key: String,
    /// Identifier of the source batch this record belongs to.
    pub batch_id: String,
    /// The validated field values.
    pub fields: RawRecord,
}

/// Why a record was routed to the dead-letter store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Failed schema validation; never retried.
    SchemaViolation,
    /// Warehouse write exhausted its retry budget.
    LoadFailure,
}

impl RejectReason {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SchemaViolation => "schema_violation",
            Self::LoadFailure => "load_failure",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record that could not be committed, bound for the dead-letter store.
///
/// Written once, never mutated. Carries enough context to diagnose and
/// replay the record by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// JSON-serialized original payload.
    pub payload_json: String,
    /// Reason classification.
    pub reason: RejectReason,
    /// Human-readable error description.
    pub error_message: String,
    /// Number of attempts made before rejection (1 for schema failures).
    pub attempts: u32,
    /// When the rejection occurred.
    pub rejected_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_transparent_serde() {
        let ts = Timestamp::new("2026-08-25T10:30:00Z");
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2026-08-25T10:30:00Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, back);
    }

    #[test]
    fn reject_reason_as_str() {
        assert_eq!(RejectReason::SchemaViolation.as_str(), "schema_violation");
        assert_eq!(RejectReason::LoadFailure.as_str(), "load_failure");
    }

    #[test]
    fn rejected_record_roundtrip() {
        let rec = RejectedRecord {
            payload_json: r#"{"id": 7, "name": null}"#.into(),
            reason: RejectReason::SchemaViolation,
            error_message: "name: required field is null".into(),
            attempts: 1,
            rejected_at: Timestamp::new("2026-08-25T10:30:00Z"),
        };
        let json = serde_json::to_string(&rec).unwrap();
        let back: RejectedRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn validated_record_is_plain_data() {
        let mut fields = RawRecord::new();
        fields.insert("id".into(), serde_json::json!(1));
        let rec = ValidatedRecord {
            record_key: "abc123".into(),
            batch_id: "2026-08-25".into(),
            fields,
        };
        let clone = rec.clone();
        assert_eq!(rec, clone);
    }
}
