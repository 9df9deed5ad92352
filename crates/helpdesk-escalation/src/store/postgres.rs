//! PostgreSQL-backed stores.

use chrono::{DateTime, Utc};
use helpdesk_core::{CompanyId, NotificationId, TicketId};
use helpdesk_db::models::{
    ActionCount, EscalationAction, EscalationLog, EscalationRule, EscalationSettingsRow,
    NewEscalationSettings, NewOutboxNotification, OutboxNotification, ReportCursor, Ticket,
    TicketPriority,
};
use sqlx::PgPool;
use tracing::debug;

use super::{
    EscalationLogStore, NotificationOutboxStore, ReportCursorStore, RuleStore, SettingsStore,
    TicketStore, TicketTransition,
};
use crate::error::Result;

/// Implements every store trait on one connection pool.
#[derive(Debug, Clone)]
pub struct PgEscalationStore {
    pool: PgPool,
}

impl PgEscalationStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl TicketStore for PgEscalationStore {
    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        Ok(Ticket::find_by_id(&self.pool, id).await?)
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>> {
        Ok(Ticket::find_due(&self.pool, now).await?)
    }

    async fn find_unscheduled(&self) -> Result<Vec<Ticket>> {
        Ok(Ticket::find_unscheduled(&self.pool).await?)
    }

    async fn find_approaching_deadline(
        &self,
        now: DateTime<Utc>,
        horizon: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        Ok(Ticket::find_approaching_deadline(&self.pool, now, horizon).await?)
    }

    async fn apply_transition(&self, transition: TicketTransition) -> Result<Option<Ticket>> {
        let mut tx = self.pool.begin().await?;

        let updated = Ticket::update_escalation_if_version_matches(
            &mut *tx,
            transition.ticket_id,
            transition.expected_version,
            &transition.state,
        )
        .await?;

        let Some(ticket) = updated else {
            tx.rollback().await?;
            debug!(
                ticket_id = %transition.ticket_id,
                expected_version = transition.expected_version,
                "Ticket version moved; transition discarded"
            );
            return Ok(None);
        };

        if let Some(log) = &transition.log {
            EscalationLog::insert(&mut *tx, log).await?;
        }

        tx.commit().await?;
        Ok(Some(ticket))
    }
}

#[async_trait::async_trait]
impl RuleStore for PgEscalationStore {
    async fn find_active_rule(
        &self,
        company_id: CompanyId,
        priority: TicketPriority,
        level: i32,
    ) -> Result<Option<EscalationRule>> {
        Ok(EscalationRule::find_active(&self.pool, company_id, priority, level).await?)
    }

    async fn list_active_rules(&self) -> Result<Vec<EscalationRule>> {
        Ok(EscalationRule::list_active(&self.pool).await?)
    }
}

#[async_trait::async_trait]
impl SettingsStore for PgEscalationStore {
    async fn find_settings_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Option<EscalationSettingsRow>> {
        Ok(EscalationSettingsRow::find_for_company(&self.pool, company_id).await?)
    }

    async fn find_global_settings(&self) -> Result<Option<EscalationSettingsRow>> {
        Ok(EscalationSettingsRow::find_global(&self.pool).await?)
    }

    async fn list_settings(&self) -> Result<Vec<EscalationSettingsRow>> {
        Ok(EscalationSettingsRow::list_all(&self.pool).await?)
    }

    async fn insert_global_settings_if_missing(
        &self,
        defaults: &NewEscalationSettings,
    ) -> Result<bool> {
        Ok(EscalationSettingsRow::insert_global_if_missing(&self.pool, defaults).await?)
    }
}

#[async_trait::async_trait]
impl EscalationLogStore for PgEscalationStore {
    async fn list_for_ticket(&self, ticket_id: TicketId) -> Result<Vec<EscalationLog>> {
        Ok(EscalationLog::list_for_ticket(&self.pool, ticket_id).await?)
    }

    async fn list_since(
        &self,
        action: EscalationAction,
        since: DateTime<Utc>,
    ) -> Result<Vec<EscalationLog>> {
        Ok(EscalationLog::list_since(&self.pool, action, since).await?)
    }

    async fn count_by_action_since(
        &self,
        company_id: Option<CompanyId>,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActionCount>> {
        Ok(EscalationLog::count_by_action_since(&self.pool, company_id, since).await?)
    }
}

#[async_trait::async_trait]
impl NotificationOutboxStore for PgEscalationStore {
    async fn enqueue(&self, notification: NewOutboxNotification) -> Result<OutboxNotification> {
        Ok(OutboxNotification::enqueue(&self.pool, &notification).await?)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxNotification>> {
        Ok(OutboxNotification::claim_due(&self.pool, now, lease_until, limit).await?)
    }

    async fn mark_sent(
        &self,
        id: NotificationId,
        attempts: i32,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        Ok(OutboxNotification::mark_sent(&self.pool, id, attempts, sent_at).await?)
    }

    async fn mark_retry(
        &self,
        id: NotificationId,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        Ok(OutboxNotification::mark_retry(&self.pool, id, attempts, next_attempt_at, error).await?)
    }

    async fn mark_failed(&self, id: NotificationId, attempts: i32, error: &str) -> Result<()> {
        Ok(OutboxNotification::mark_failed(&self.pool, id, attempts, error).await?)
    }
}

#[async_trait::async_trait]
impl ReportCursorStore for PgEscalationStore {
    async fn last_period_end(&self, report: &str) -> Result<Option<DateTime<Utc>>> {
        let cursor = ReportCursor::find(&self.pool, report).await?;
        Ok(cursor.map(|c| c.period_end))
    }

    async fn advance_period(
        &self,
        report: &str,
        previous: Option<DateTime<Utc>>,
        period_end: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(ReportCursor::advance(&self.pool, report, previous, period_end).await?)
    }
}
