//! Manual escalation actions for administrators.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use helpdesk_core::{CompanyId, TicketId, UserId};
use helpdesk_db::models::{EscalationLog, Ticket};
use tracing::info;

use crate::error::{EscalationError, Result};
use crate::report::EscalationStats;
use crate::store::EscalationLogStore;
use crate::tracker::{Activity, ResponseActivityTracker};

/// Whose tickets an administrator may act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminScope {
    /// Platform administrator: every company.
    Global,
    /// Company administrator: that company only.
    Company(CompanyId),
}

impl AdminScope {
    fn company_id(self) -> Option<CompanyId> {
        match self {
            Self::Global => None,
            Self::Company(id) => Some(id),
        }
    }

    fn check(self, ticket: &Ticket) -> Result<()> {
        match self {
            Self::Company(company_id) if company_id != ticket.company_id => {
                Err(EscalationError::TenantMismatch {
                    ticket_id: ticket.id,
                    company_id,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Pause, resume and reset a ticket's escalation by hand, and read its history.
///
/// Every request is logged with the acting user as `created_by`.
#[derive(Clone)]
pub struct EscalationAdminService {
    tracker: ResponseActivityTracker,
    logs: Arc<dyn EscalationLogStore>,
}

impl EscalationAdminService {
    pub fn new(tracker: ResponseActivityTracker, logs: Arc<dyn EscalationLogStore>) -> Self {
        Self { tracker, logs }
    }

    /// Stop the clock.
    ///
    /// Already paused or closed tickets are left alone and `None` is returned,
    /// but the request is still logged with `actor` as `created_by`.
    pub async fn pause_escalation(
        &self,
        scope: AdminScope,
        ticket_id: TicketId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        self.authorize(scope, ticket_id).await?;
        let updated = self
            .tracker
            .apply(ticket_id, Activity::Pause { actor: Some(actor) }, now)
            .await?;
        if updated.is_some() {
            info!(ticket_id = %ticket_id, actor = %actor, "Escalation paused manually");
        }
        Ok(updated)
    }

    /// Restart the clock from the rule for the next level.
    ///
    /// A request on a running or closed ticket changes nothing (`None`) and is
    /// logged like [`Self::pause_escalation`].
    pub async fn resume_escalation(
        &self,
        scope: AdminScope,
        ticket_id: TicketId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        self.authorize(scope, ticket_id).await?;
        let updated = self.tracker.resume(ticket_id, Some(actor), now).await?;
        if updated.is_some() {
            info!(ticket_id = %ticket_id, actor = %actor, "Escalation resumed manually");
        }
        Ok(updated)
    }

    /// Back to level 0, unpaused and unscheduled; the seed sweep re-arms it.
    pub async fn reset_escalation(
        &self,
        scope: AdminScope,
        ticket_id: TicketId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<Ticket> {
        self.authorize(scope, ticket_id).await?;
        let updated = match self
            .tracker
            .apply(ticket_id, Activity::Reset { actor: Some(actor) }, now)
            .await?
        {
            Some(ticket) => ticket,
            None => self.tracker.load(ticket_id).await?,
        };
        info!(ticket_id = %ticket_id, actor = %actor, "Escalation reset");
        Ok(updated)
    }

    /// Escalation history of one ticket, newest first.
    pub async fn ticket_history(
        &self,
        scope: AdminScope,
        ticket_id: TicketId,
    ) -> Result<Vec<EscalationLog>> {
        self.authorize(scope, ticket_id).await?;
        self.logs.list_for_ticket(ticket_id).await
    }

    /// Dashboard counts for the scope.
    pub async fn escalation_stats(
        &self,
        scope: AdminScope,
        now: DateTime<Utc>,
    ) -> Result<EscalationStats> {
        EscalationStats::collect(self.logs.as_ref(), scope.company_id(), now).await
    }

    async fn authorize(&self, scope: AdminScope, ticket_id: TicketId) -> Result<()> {
        let ticket = self.tracker.load(ticket_id).await?;
        scope.check(&ticket)
    }
}
