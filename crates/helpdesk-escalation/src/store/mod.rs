//! Storage traits for the escalation engine.
//!
//! The engine only talks to these traits. [`PgEscalationStore`] backs them
//! with PostgreSQL; [`InMemoryEscalationStore`] backs them with maps behind a
//! tokio `RwLock` for tests and embedding.

mod memory;
mod postgres;

pub use memory::InMemoryEscalationStore;
pub use postgres::PgEscalationStore;

use chrono::{DateTime, Utc};
use helpdesk_core::{CompanyId, NotificationId, TicketId};
use helpdesk_db::models::{
    ActionCount, EscalationAction, EscalationLog, EscalationRule, EscalationSettingsRow,
    NewEscalationLog, NewEscalationSettings, NewOutboxNotification, OutboxNotification, Ticket,
    TicketEscalationState, TicketPriority,
};

use crate::error::Result;

/// A version-guarded write of a ticket's escalation columns, optionally
/// paired with the log row describing it.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketTransition {
    pub ticket_id: TicketId,
    pub expected_version: i64,
    pub state: TicketEscalationState,
    pub log: Option<NewEscalationLog>,
}

impl TicketTransition {
    /// Start a transition from the ticket's current state.
    #[must_use]
    pub fn from_ticket(ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.id,
            expected_version: ticket.version,
            state: ticket.escalation_state(),
            log: None,
        }
    }

    #[must_use]
    pub fn with_log(mut self, log: NewEscalationLog) -> Self {
        self.log = Some(log);
        self
    }
}

/// Ticket reads and escalation-state writes.
#[async_trait::async_trait]
pub trait TicketStore: Send + Sync {
    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>>;

    /// Active, unpaused tickets with `next_escalation_at <= now`.
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>>;

    /// Active, unpaused tickets with no `next_escalation_at`.
    async fn find_unscheduled(&self) -> Result<Vec<Ticket>>;

    /// Active, unpaused, not yet warned tickets due within `(now, horizon]`.
    async fn find_approaching_deadline(
        &self,
        now: DateTime<Utc>,
        horizon: DateTime<Utc>,
    ) -> Result<Vec<Ticket>>;

    /// Apply the transition atomically if the ticket still has
    /// `expected_version`. Returns `None` on a version conflict, in which
    /// case nothing (not even the log row) is written.
    async fn apply_transition(&self, transition: TicketTransition) -> Result<Option<Ticket>>;
}

/// Escalation rule reads.
#[async_trait::async_trait]
pub trait RuleStore: Send + Sync {
    /// Company rule for the triple, else the global rule.
    async fn find_active_rule(
        &self,
        company_id: CompanyId,
        priority: TicketPriority,
        level: i32,
    ) -> Result<Option<EscalationRule>>;

    async fn list_active_rules(&self) -> Result<Vec<EscalationRule>>;
}

/// Escalation settings reads and the global-row bootstrap.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn find_settings_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Option<EscalationSettingsRow>>;

    async fn find_global_settings(&self) -> Result<Option<EscalationSettingsRow>>;

    async fn list_settings(&self) -> Result<Vec<EscalationSettingsRow>>;

    /// Returns `true` when a global row was inserted.
    async fn insert_global_settings_if_missing(
        &self,
        defaults: &NewEscalationSettings,
    ) -> Result<bool>;
}

/// Escalation history reads. Writes go through [`TicketStore::apply_transition`].
#[async_trait::async_trait]
pub trait EscalationLogStore: Send + Sync {
    /// Newest first.
    async fn list_for_ticket(&self, ticket_id: TicketId) -> Result<Vec<EscalationLog>>;

    /// Newest first.
    async fn list_since(
        &self,
        action: EscalationAction,
        since: DateTime<Utc>,
    ) -> Result<Vec<EscalationLog>>;

    async fn count_by_action_since(
        &self,
        company_id: Option<CompanyId>,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActionCount>>;
}

/// Outbound notification ledger.
#[async_trait::async_trait]
pub trait NotificationOutboxStore: Send + Sync {
    async fn enqueue(&self, notification: NewOutboxNotification) -> Result<OutboxNotification>;

    /// Claim due pending rows, hiding them from other claimers until `lease_until`.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxNotification>>;

    async fn mark_sent(&self, id: NotificationId, attempts: i32, sent_at: DateTime<Utc>)
        -> Result<()>;

    async fn mark_retry(
        &self,
        id: NotificationId,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()>;

    async fn mark_failed(&self, id: NotificationId, attempts: i32, error: &str) -> Result<()>;
}

/// Progress of periodic reports, shared by every worker instance.
#[async_trait::async_trait]
pub trait ReportCursorStore: Send + Sync {
    /// End of the last period `report` covered.
    async fn last_period_end(&self, report: &str) -> Result<Option<DateTime<Utc>>>;

    /// Compare-and-set the cursor from `previous` to `period_end`.
    ///
    /// Returns `false` when another worker moved it first.
    async fn advance_period(
        &self,
        report: &str,
        previous: Option<DateTime<Utc>>,
        period_end: DateTime<Utc>,
    ) -> Result<bool>;
}
