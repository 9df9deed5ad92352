//! Background jobs driven by the worker binary.
//!
//! - Escalation cycle and schedule seeding ([`EscalationJob`])
//! - Pre-deadline warnings ([`EscalationWarningJob`])
//! - Daily escalation summary ([`EscalationReportJob`])
//! - Outbox delivery with retry/backoff ([`NotificationOutboxWorker`])

pub mod escalation_job;
pub mod outbox_job;
pub mod summary_report_job;
pub mod warning_job;

pub use escalation_job::EscalationJob;
pub use outbox_job::{calculate_next_attempt_at, NotificationOutboxWorker, OutboxStats};
pub use summary_report_job::{EscalationReportJob, ReportStats};
pub use warning_job::{EscalationWarningJob, WarningStats};

use crate::error::EscalationError;

/// Errors that abort a whole job run. Per-item failures are counted instead.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Error processing the batch.
    #[error("Processing error: {0}")]
    Processing(String),
}

impl From<EscalationError> for JobError {
    fn from(err: EscalationError) -> Self {
        match err {
            EscalationError::Database(e) => Self::Database(e.to_string()),
            EscalationError::Store(msg) => Self::Database(msg),
            other => Self::Processing(other.to_string()),
        }
    }
}
