//! Worker configuration loaded from environment variables.
//!
//! Loading is fail-fast: a missing `DATABASE_URL` or a malformed value stops
//! the worker before it touches the database.

use std::env;
use std::str::FromStr;

use helpdesk_core::UserId;
use helpdesk_escalation::jobs::{escalation_job, outbox_job, summary_report_job, warning_job};
use thiserror::Error;

/// Default log filter directive.
const DEFAULT_RUST_LOG: &str = "info,helpdesk_escalation=debug,sqlx=warn";

/// Default connection pool size.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Longest accepted summary report period (31 days).
const MAX_REPORT_PERIOD_SECS: u64 = 31 * 86_400;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Polling intervals of the background jobs, in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIntervals {
    pub cycle_secs: u64,
    pub seed_secs: u64,
    pub warning_secs: u64,
    /// Length of one summary report period.
    pub report_secs: u64,
    pub outbox_secs: u64,
}

impl Default for JobIntervals {
    fn default() -> Self {
        Self {
            cycle_secs: escalation_job::DEFAULT_POLL_INTERVAL_SECS,
            seed_secs: escalation_job::DEFAULT_SEED_INTERVAL_SECS,
            warning_secs: warning_job::DEFAULT_POLL_INTERVAL_SECS,
            report_secs: summary_report_job::DEFAULT_PERIOD_SECS,
            outbox_secs: outbox_job::DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

/// Escalation worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum pooled connections.
    pub max_connections: u32,

    /// Log filter directive, overridden by `RUST_LOG` at subscriber level.
    pub rust_log: String,

    pub intervals: JobIntervals,

    /// Outbox rows claimed per delivery pass.
    pub batch_size: i64,

    /// How far ahead of a deadline warnings go out.
    pub warning_lead_secs: i64,

    /// Webhook receiving notifications; notifications are only logged when unset.
    pub webhook_url: Option<String>,

    /// Recipients of the global summary report.
    pub summary_recipients: Vec<UserId>,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".into()))?;

        let defaults = JobIntervals::default();
        let intervals = JobIntervals {
            cycle_secs: parse_interval(
                &lookup,
                "ESCALATION_CYCLE_INTERVAL_SECS",
                defaults.cycle_secs,
            )?,
            seed_secs: parse_interval(
                &lookup,
                "ESCALATION_SEED_INTERVAL_SECS",
                defaults.seed_secs,
            )?,
            warning_secs: parse_interval(
                &lookup,
                "ESCALATION_WARNING_INTERVAL_SECS",
                defaults.warning_secs,
            )?,
            report_secs: parse_interval(
                &lookup,
                "ESCALATION_REPORT_INTERVAL_SECS",
                defaults.report_secs,
            )?,
            outbox_secs: parse_interval(
                &lookup,
                "NOTIFICATION_POLL_INTERVAL_SECS",
                defaults.outbox_secs,
            )?,
        };

        if intervals.report_secs > MAX_REPORT_PERIOD_SECS {
            return Err(invalid("ESCALATION_REPORT_INTERVAL_SECS", "must be at most 31 days"));
        }

        let batch_size =
            parse_or(&lookup, "ESCALATION_BATCH_SIZE", outbox_job::DEFAULT_BATCH_SIZE)?;
        if batch_size < 1 {
            return Err(invalid("ESCALATION_BATCH_SIZE", "must be at least 1"));
        }

        let warning_lead_secs = parse_or(
            &lookup,
            "ESCALATION_WARNING_LEAD_SECS",
            warning_job::DEFAULT_WARNING_LEAD_SECS,
        )?;
        if warning_lead_secs < 60 {
            return Err(invalid("ESCALATION_WARNING_LEAD_SECS", "must be at least 60"));
        }

        let max_connections =
            parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(invalid("DATABASE_MAX_CONNECTIONS", "must be at least 1"));
        }

        let webhook_url = lookup("NOTIFICATION_WEBHOOK_URL");
        if let Some(url) = &webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(invalid(
                    "NOTIFICATION_WEBHOOK_URL",
                    "must start with http:// or https://",
                ));
            }
        }

        let summary_recipients = match lookup("ESCALATION_SUMMARY_RECIPIENTS") {
            Some(raw) => parse_recipients(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            database_url,
            max_connections,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| DEFAULT_RUST_LOG.to_string()),
            intervals,
            batch_size,
            warning_lead_secs,
            webhook_url,
            summary_recipients,
        })
    }
}

fn invalid(var: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        message: message.into(),
    }
}

fn parse_or<T, F>(lookup: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| invalid(var, e.to_string())),
        None => Ok(default),
    }
}

fn parse_interval<F>(lookup: &F, var: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = parse_or(lookup, var, default)?;
    if secs == 0 {
        return Err(invalid(var, "interval must be greater than zero"));
    }
    Ok(secs)
}

fn parse_recipients(raw: &str) -> Result<Vec<UserId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<UserId>().map_err(|e| {
                invalid("ESCALATION_SUMMARY_RECIPIENTS", format!("'{s}' is not a user id: {e}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_database_url_is_required() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref v) if v == "DATABASE_URL"));

        let err = load(&[("DATABASE_URL", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(_)));
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/helpdesk")]).unwrap();
        assert_eq!(config.intervals, JobIntervals::default());
        assert_eq!(config.intervals.cycle_secs, 900);
        assert_eq!(config.intervals.report_secs, 86_400);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.warning_lead_secs, 3600);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.rust_log, DEFAULT_RUST_LOG);
        assert!(config.webhook_url.is_none());
        assert!(config.summary_recipients.is_empty());
    }

    #[test]
    fn test_overrides() {
        let admin = UserId::new();
        let other = UserId::new();
        let recipients = format!("{admin}, {other},");
        let config = load(&[
            ("DATABASE_URL", "postgres://db/helpdesk"),
            ("ESCALATION_CYCLE_INTERVAL_SECS", "300"),
            ("NOTIFICATION_POLL_INTERVAL_SECS", "10"),
            ("ESCALATION_BATCH_SIZE", "25"),
            ("NOTIFICATION_WEBHOOK_URL", "https://hooks.example.com/helpdesk"),
            ("ESCALATION_SUMMARY_RECIPIENTS", &recipients),
        ])
        .unwrap();

        assert_eq!(config.intervals.cycle_secs, 300);
        assert_eq!(config.intervals.outbox_secs, 10);
        assert_eq!(config.batch_size, 25);
        assert_eq!(
            config.webhook_url.as_deref(),
            Some("https://hooks.example.com/helpdesk")
        );
        assert_eq!(config.summary_recipients, vec![admin, other]);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            ("ESCALATION_CYCLE_INTERVAL_SECS", "0"),
            ("ESCALATION_SEED_INTERVAL_SECS", "soon"),
            ("ESCALATION_REPORT_INTERVAL_SECS", "2678401"),
            ("ESCALATION_BATCH_SIZE", "-1"),
            ("ESCALATION_WARNING_LEAD_SECS", "30"),
            ("DATABASE_MAX_CONNECTIONS", "0"),
            ("NOTIFICATION_WEBHOOK_URL", "ftp://example.com"),
            ("ESCALATION_SUMMARY_RECIPIENTS", "not-a-uuid"),
        ];

        for (var, value) in cases {
            let err =
                load(&[("DATABASE_URL", "postgres://db/helpdesk"), (var, value)]).unwrap_err();
            match err {
                ConfigError::InvalidValue { var: reported, .. } => assert_eq!(reported, var),
                other => panic!("expected InvalidValue for {var}, got {other}"),
            }
        }
    }
}
