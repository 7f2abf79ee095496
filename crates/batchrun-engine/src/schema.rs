//! Declarative schema validation.
//!
//! A job declares its record shape as a list of [`FieldConstraint`]s
//! (name, type, nullability, range) plus the key fields that identify
//! a record. [`RecordSchema::validate`] is pure and deterministic: the
//! same record always yields the same result, and malformed-but-
//! parseable input is the expected failure path, not a panic.

use std::fmt;

use batchrun_types::record::{RawRecord, ValidatedRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Expected type of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
}

impl FieldType {
    /// Wire-format name used in failure messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
        }
    }

    fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared field constraint, evaluated uniformly by the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConstraint {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Inclusive lower bound, numeric fields only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound, numeric fields only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Declared shape of one job's records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Natural identifying fields; drive the deterministic record key.
    #[serde(default)]
    pub key_fields: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<FieldConstraint>,
}

/// One failing field with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFailure {
    pub field: String,
    pub reason: String,
}

/// Why a record failed validation. Enumerates every failing field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub failures: Vec<FieldFailure>,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.field, failure.reason))
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

impl RecordSchema {
    /// Classify `raw` against the declared constraints.
    ///
    /// No I/O, no shared state. On success the record is annotated with
    /// its deterministic key and the source batch identifier and
    /// becomes immutable.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationFailure`] listing every failing field.
    pub fn validate(
        &self,
        raw: &RawRecord,
        batch_id: &str,
    ) -> Result<ValidatedRecord, ValidationFailure> {
        let mut failures = Vec::new();

        for constraint in &self.constraints {
            match raw.get(&constraint.name) {
                None | Some(serde_json::Value::Null) => {
                    if constraint.required {
                        failures.push(FieldFailure {
                            field: constraint.name.clone(),
                            reason: "required field is missing or null".into(),
                        });
                    }
                }
                Some(value) => {
                    if constraint.field_type.matches(value) {
                        if let Some(failure) = check_range(constraint, value) {
                            failures.push(failure);
                        }
                    } else {
                        failures.push(FieldFailure {
                            field: constraint.name.clone(),
                            reason: format!(
                                "expected {}, got {}",
                                constraint.field_type,
                                type_name(value)
                            ),
                        });
                    }
                }
            }
        }

        for key_field in &self.key_fields {
            match raw.get(key_field) {
                None | Some(serde_json::Value::Null) => failures.push(FieldFailure {
                    field: key_field.clone(),
                    reason: "key field is missing or null".into(),
                }),
                Some(_) => {}
            }
        }

        if failures.is_empty() {
            Ok(ValidatedRecord {
                record_key: self.record_key(raw),
                batch_id: batch_id.to_string(),
                fields: raw.clone(),
            })
        } else {
            Err(ValidationFailure { failures })
        }
    }

    /// Sanity-check the schema declaration itself.
    ///
    /// Returns one message per defect: empty or duplicate constraint
    /// names, inverted bounds, bounds on non-numeric fields, key fields
    /// without a required constraint backing them.
    #[must_use]
    pub fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for constraint in &self.constraints {
            if constraint.name.is_empty() {
                problems.push("constraint with empty field name".to_string());
            }
            if !seen.insert(constraint.name.as_str()) {
                problems.push(format!("duplicate constraint for field {}", constraint.name));
            }
            if (constraint.min.is_some() || constraint.max.is_some())
                && !matches!(constraint.field_type, FieldType::Integer | FieldType::Float)
            {
                problems.push(format!(
                    "bounds on non-numeric field {}",
                    constraint.name
                ));
            }
            if let (Some(lower), Some(upper)) = (constraint.min, constraint.max) {
                if lower > upper {
                    problems.push(format!("inverted bounds on field {}", constraint.name));
                }
            }
        }

        for key_field in &self.key_fields {
            let backing = self
                .constraints
                .iter()
                .find(|constraint| &constraint.name == key_field);
            match backing {
                Some(constraint) if constraint.required => {}
                Some(_) => problems.push(format!(
                    "key field {key_field} must be declared required"
                )),
                None => problems.push(format!(
                    "key field {key_field} has no constraint declaration"
                )),
            }
        }

        problems
    }

    /// Deterministic record key: hex SHA-256 over the canonically
    /// ordered key-field values (or over the whole record, keys sorted,
    /// when no key fields are declared).
    #[must_use]
    pub fn record_key(&self, raw: &RawRecord) -> String {
        let mut hasher = Sha256::new();
        if self.key_fields.is_empty() {
            let mut names: Vec<&String> = raw.keys().collect();
            names.sort();
            for name in names {
                hash_field(&mut hasher, name, raw.get(name));
            }
        } else {
            for name in &self.key_fields {
                hash_field(&mut hasher, name, raw.get(name));
            }
        }
        hex::encode(hasher.finalize())
    }
}

fn hash_field(hasher: &mut Sha256, name: &str, value: Option<&serde_json::Value>) {
    hasher.update(name.as_bytes());
    hasher.update([0x1f]);
    let rendered = value.map_or_else(String::new, serde_json::Value::to_string);
    hasher.update(rendered.as_bytes());
    hasher.update([0x1e]);
}

fn check_range(constraint: &FieldConstraint, value: &serde_json::Value) -> Option<FieldFailure> {
    if constraint.min.is_none() && constraint.max.is_none() {
        return None;
    }
    let number = value.as_f64()?;
    if constraint.min.is_some_and(|lower| number < lower)
        || constraint.max.is_some_and(|upper| number > upper)
    {
        return Some(FieldFailure {
            field: constraint.name.clone(),
            reason: format!(
                "value {number} outside bounds [{:?}, {:?}]",
                constraint.min, constraint.max
            ),
        });
    }
    None
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> RawRecord {
        value.as_object().expect("test record is an object").clone()
    }

    fn orders_schema() -> RecordSchema {
        RecordSchema {
            key_fields: vec!["id".into()],
            constraints: vec![
                FieldConstraint {
                    name: "id".into(),
                    field_type: FieldType::Integer,
                    required: true,
                    min: None,
                    max: None,
                },
                FieldConstraint {
                    name: "customer".into(),
                    field_type: FieldType::String,
                    required: true,
                    min: None,
                    max: None,
                },
                FieldConstraint {
                    name: "amount".into(),
                    field_type: FieldType::Float,
                    required: false,
                    min: Some(0.0),
                    max: Some(1_000_000.0),
                },
            ],
        }
    }

    #[test]
    fn valid_record_gets_key_and_batch_id() {
        let raw = record(json!({"id": 7, "customer": "acme", "amount": 12.5}));
        let validated = orders_schema().validate(&raw, "2026-08-25").unwrap();
        assert_eq!(validated.batch_id, "2026-08-25");
        assert_eq!(validated.fields, raw);
        assert_eq!(validated.record_key.len(), 64);
    }

    #[test]
    fn validation_is_deterministic() {
        let raw = record(json!({"id": 7, "customer": "acme"}));
        let schema = orders_schema();
        let a = schema.validate(&raw, "b1").unwrap();
        let b = schema.validate(&raw, "b1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_required_field_fails_with_field_name() {
        let raw = record(json!({"id": 7}));
        let err = orders_schema().validate(&raw, "b1").unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].field, "customer");
        assert!(err.to_string().contains("customer"));
    }

    #[test]
    fn null_required_field_fails() {
        let raw = record(json!({"id": 7, "customer": null}));
        let err = orders_schema().validate(&raw, "b1").unwrap_err();
        assert!(err.failures[0].reason.contains("missing or null"));
    }

    #[test]
    fn type_mismatch_names_both_types() {
        let raw = record(json!({"id": "seven", "customer": "acme"}));
        let err = orders_schema().validate(&raw, "b1").unwrap_err();
        assert_eq!(err.failures[0].field, "id");
        assert!(err.failures[0].reason.contains("integer"));
        assert!(err.failures[0].reason.contains("string"));
    }

    #[test]
    fn range_violation_fails() {
        let raw = record(json!({"id": 7, "customer": "acme", "amount": -3.0}));
        let err = orders_schema().validate(&raw, "b1").unwrap_err();
        assert_eq!(err.failures[0].field, "amount");
        assert!(err.failures[0].reason.contains("outside bounds"));
    }

    #[test]
    fn optional_field_may_be_absent() {
        let raw = record(json!({"id": 7, "customer": "acme"}));
        assert!(orders_schema().validate(&raw, "b1").is_ok());
    }

    #[test]
    fn multiple_failures_all_enumerated() {
        let raw = record(json!({"customer": 12, "amount": -1.0}));
        let err = orders_schema().validate(&raw, "b1").unwrap_err();
        let fields: Vec<&str> = err.failures.iter().map(|f| f.field.as_str()).collect();
        // id fails twice: required constraint and key field.
        assert!(fields.contains(&"id"));
        assert!(fields.contains(&"customer"));
        assert!(fields.contains(&"amount"));
    }

    #[test]
    fn integer_field_rejects_float_value() {
        let schema = RecordSchema {
            key_fields: vec![],
            constraints: vec![FieldConstraint {
                name: "count".into(),
                field_type: FieldType::Integer,
                required: true,
                min: None,
                max: None,
            }],
        };
        let err = schema
            .validate(&record(json!({"count": 1.5})), "b1")
            .unwrap_err();
        assert_eq!(err.failures[0].field, "count");
    }

    #[test]
    fn record_key_stable_across_unrelated_field_changes() {
        let schema = orders_schema();
        let a = record(json!({"id": 7, "customer": "acme", "amount": 1.0}));
        let b = record(json!({"id": 7, "customer": "other", "amount": 2.0}));
        assert_eq!(schema.record_key(&a), schema.record_key(&b));
    }

    #[test]
    fn record_key_differs_for_different_ids() {
        let schema = orders_schema();
        let a = record(json!({"id": 7, "customer": "acme"}));
        let b = record(json!({"id": 8, "customer": "acme"}));
        assert_ne!(schema.record_key(&a), schema.record_key(&b));
    }

    #[test]
    fn record_key_without_key_fields_uses_sorted_whole_record() {
        let schema = RecordSchema::default();
        let a = record(json!({"x": 1, "y": 2}));
        let b = record(json!({"y": 2, "x": 1}));
        assert_eq!(schema.record_key(&a), schema.record_key(&b));
    }

    #[test]
    fn check_accepts_well_formed_schema() {
        assert!(orders_schema().check().is_empty());
    }

    #[test]
    fn check_reports_unbacked_key_field_and_inverted_bounds() {
        let schema = RecordSchema {
            key_fields: vec!["missing".into()],
            constraints: vec![FieldConstraint {
                name: "amount".into(),
                field_type: FieldType::Float,
                required: false,
                min: Some(10.0),
                max: Some(1.0),
            }],
        };
        let problems = schema.check();
        assert!(problems.iter().any(|p| p.contains("missing")));
        assert!(problems.iter().any(|p| p.contains("inverted bounds")));
    }

    #[test]
    fn check_reports_duplicate_constraints() {
        let mut schema = orders_schema();
        schema.constraints.push(schema.constraints[0].clone());
        assert!(schema
            .check()
            .iter()
            .any(|p| p.contains("duplicate constraint")));
    }

    #[test]
    fn schema_deserializes_from_yaml_shape() {
        let yaml = r"
key_fields: [id]
constraints:
  - name: id
    type: integer
    required: true
  - name: amount
    type: float
    min: 0.0
";
        let schema: RecordSchema = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(schema.key_fields, vec!["id".to_string()]);
        assert_eq!(schema.constraints.len(), 2);
        assert!(!schema.constraints[1].required);
    }
}
