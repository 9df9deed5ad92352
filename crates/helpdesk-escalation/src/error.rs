//! Error types for the escalation engine.

use helpdesk_core::{CompanyId, TicketId};
use thiserror::Error;

/// Misconfigured business-hours window.
///
/// Raised before any date arithmetic runs, so a bad settings row can never
/// send the calendar into an unbounded search.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    #[error("business_days is empty")]
    NoBusinessDays,

    #[error("business day {0} is outside 1..=7")]
    InvalidWeekday(i32),

    #[error("business hours {start}..{end} do not form a window within 0..=23")]
    InvalidHours { start: i32, end: i32 },

    #[error("no business instant found within a week of {0}")]
    Unreachable(chrono::DateTime<chrono::Utc>),
}

/// Errors surfaced by the escalation engine.
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Calendar configuration error: {0}")]
    Calendar(#[from] CalendarError),

    #[error("Ticket not found: {0}")]
    TicketNotFound(TicketId),

    #[error("Ticket {ticket_id} does not belong to company {company_id}")]
    TenantMismatch {
        ticket_id: TicketId,
        company_id: CompanyId,
    },

    #[error("Ticket {0} kept changing concurrently; giving up")]
    Conflict(TicketId),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EscalationError {
    /// Whether retrying the same operation later can succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Store(_) | Self::Conflict(_) | Self::Notification(_)
        )
    }
}

/// Result alias for escalation operations.
pub type Result<T> = std::result::Result<T, EscalationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calendar_error_converts() {
        let err: EscalationError = CalendarError::NoBusinessDays.into();
        assert!(matches!(err, EscalationError::Calendar(_)));
        assert!(!err.is_transient());
        assert!(err.to_string().contains("business_days is empty"));
    }

    #[test]
    fn test_store_errors_are_transient() {
        assert!(EscalationError::Store("down".into()).is_transient());
        assert!(!EscalationError::TicketNotFound(TicketId::new()).is_transient());
    }
}
