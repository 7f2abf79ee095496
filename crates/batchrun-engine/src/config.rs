//! Job YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use batchrun_types::run::{JobId, TableName};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dlq::DlqExhaustionPolicy;
use crate::retry::RetryPolicy;
use crate::schema::RecordSchema;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

fn default_concurrency() -> usize {
    8
}

/// Declarative configuration for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job identifier, unique per pipeline.
    pub job: JobId,
    /// Destination table for committed records.
    pub destination_table: TableName,
    /// Dead-letter table for rejected records.
    pub dead_letter_table: TableName,
    /// Record schema: key fields plus field constraints.
    pub schema: RecordSchema,
    /// Retry policy for per-record warehouse inserts.
    #[serde(default)]
    pub load_retry: RetryPolicy,
    /// Retry policy for dead-letter delivery; more tolerant by default.
    #[serde(default = "RetryPolicy::tolerant")]
    pub dead_letter_retry: RetryPolicy,
    /// Retry policy for batch-scoped operations (extraction, ledger).
    #[serde(default)]
    pub batch_retry: RetryPolicy,
    /// Maximum number of records loaded concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Wall-clock budget for the run, if any. When it elapses, no new
    /// record work is admitted; in-flight records finish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_seconds: Option<u64>,
    /// Escalation policy when dead-letter delivery itself fails.
    #[serde(default)]
    pub on_dlq_exhausted: DlqExhaustionPolicy,
}

impl JobConfig {
    /// Check cross-field invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error naming every violated constraint.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.job.as_str().is_empty() {
            errors.push("job: must not be empty".to_string());
        }
        if self.destination_table.as_str().is_empty() {
            errors.push("destination_table: must not be empty".to_string());
        }
        if self.dead_letter_table.as_str().is_empty() {
            errors.push("dead_letter_table: must not be empty".to_string());
        }
        if self.destination_table == self.dead_letter_table {
            errors.push("dead_letter_table: must differ from destination_table".to_string());
        }
        if self.concurrency == 0 {
            errors.push("concurrency: must be at least 1".to_string());
        }
        if self.deadline_seconds == Some(0) {
            errors.push("deadline_seconds: must be positive when set".to_string());
        }
        for failure in self.schema.check() {
            errors.push(format!("schema: {failure}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Invalid job config:\n  {}", errors.join("\n  "));
        }
    }
}

/// Substitute `${VAR_NAME}` references with environment variable
/// values in a single pass. Substituted values are never re-scanned,
/// so a value containing `${...}` passes through literally.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut output = String::with_capacity(input.len());
    let mut missing = Vec::new();
    let mut tail = 0;

    for cap in ENV_VAR_RE.captures_iter(input) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        output.push_str(&input[tail..whole.start()]);
        match std::env::var(name.as_str()) {
            Ok(value) => output.push_str(&value),
            Err(_) => missing.push(name.as_str().to_string()),
        }
        tail = whole.end();
    }
    output.push_str(&input[tail..]);

    if missing.is_empty() {
        Ok(output)
    } else {
        anyhow::bail!(
            "Unset environment variable(s) in job config: {}",
            missing.join(", ")
        );
    }
}

/// Parse a job YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails, the YAML is invalid,
/// or the config violates a cross-field invariant.
pub fn parse_job_str(yaml_str: &str) -> Result<JobConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: JobConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse job YAML")?;
    config.validate()?;
    Ok(config)
}

/// Parse a job YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_job(path: &Path) -> Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file: {}", path.display()))?;
    parse_job_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
job: orders-daily
destination_table: trusted.orders
dead_letter_table: dlq.orders
schema:
  key_fields: [order_id]
  constraints:
    - name: order_id
      type: string
      required: true
    - name: amount
      type: float
      required: true
      min: 0.0
"#;

    #[test]
    fn minimal_yaml_uses_defaults() {
        let config = parse_job_str(MINIMAL_YAML).unwrap();
        assert_eq!(config.job.as_str(), "orders-daily");
        assert_eq!(config.load_retry, RetryPolicy::default());
        assert_eq!(config.dead_letter_retry, RetryPolicy::tolerant());
        assert_eq!(config.concurrency, 8);
        assert!(config.deadline_seconds.is_none());
        assert_eq!(config.on_dlq_exhausted, DlqExhaustionPolicy::FailRun);
    }

    #[test]
    fn explicit_policies_override_defaults() {
        let yaml = format!(
            "{MINIMAL_YAML}
load_retry:
  max_attempts: 2
  base_delay_ms: 50
concurrency: 3
deadline_seconds: 600
on_dlq_exhausted: degrade
"
        );
        let config = parse_job_str(&yaml).unwrap();
        assert_eq!(config.load_retry.max_attempts, 2);
        assert_eq!(config.load_retry.base_delay_ms, 50);
        // Unspecified policy fields fall back to defaults.
        assert_eq!(
            config.load_retry.max_delay_ms,
            RetryPolicy::default().max_delay_ms
        );
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.deadline_seconds, Some(600));
        assert_eq!(config.on_dlq_exhausted, DlqExhaustionPolicy::Degrade);
    }

    #[test]
    fn env_var_substitution_in_config() {
        std::env::set_var("BR_TEST_DEST", "trusted.orders");
        let yaml = MINIMAL_YAML.replace("trusted.orders", "${BR_TEST_DEST}");
        let config = parse_job_str(&yaml).unwrap();
        assert_eq!(config.destination_table.as_str(), "trusted.orders");
        std::env::remove_var("BR_TEST_DEST");
    }

    #[test]
    fn missing_env_vars_all_reported() {
        let input = "${BR_MISSING_X} and ${BR_MISSING_Y}";
        let err = substitute_env_vars(input).unwrap_err().to_string();
        assert!(err.contains("BR_MISSING_X"));
        assert!(err.contains("BR_MISSING_Y"));
    }

    #[test]
    fn no_env_vars_passthrough() {
        let input = "destination_table: trusted.orders";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        std::env::set_var("BR_TEST_NESTED", "${BR_TEST_INNER}");
        let result = substitute_env_vars("value: ${BR_TEST_NESTED}").unwrap();
        assert_eq!(result, "value: ${BR_TEST_INNER}");
        std::env::remove_var("BR_TEST_NESTED");
    }

    #[test]
    fn same_destination_and_dlq_table_rejected() {
        let yaml = MINIMAL_YAML.replace("dlq.orders", "trusted.orders");
        let err = parse_job_str(&yaml).unwrap_err().to_string();
        assert!(err.contains("must differ from destination_table"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let yaml = format!("{MINIMAL_YAML}\nconcurrency: 0\n");
        let err = parse_job_str(&yaml).unwrap_err().to_string();
        assert!(err.contains("concurrency"));
    }

    #[test]
    fn invalid_yaml_errors() {
        let yaml = "this is not: [valid: yaml: {{{}}}";
        assert!(parse_job_str(yaml).is_err());
    }

    #[test]
    fn job_file_not_found() {
        let err = parse_job(Path::new("/nonexistent/job.yaml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Failed to read job file"));
    }
}
