//! Pre-deadline escalation warnings.
//!
//! Tickets that will become due within the lead time, and that would really
//! escalate (a next-level rule exists and the level cap allows it), get one
//! `escalation_warning` per deadline. The flag is set before dispatch, so a
//! warning goes out at most once even when two workers overlap.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use helpdesk_db::models::Ticket;
use tracing::{debug, info, instrument, warn};

use super::JobError;
use crate::catalog::EscalationRuleCatalog;
use crate::notification::{
    EscalationWarningContext, Notification, NotificationDispatch, NotificationPayload,
};
use crate::settings::EscalationSettingsResolver;
use crate::snapshot::EscalationConfig;
use crate::store::{TicketStore, TicketTransition};

/// Default polling interval in seconds (30 minutes).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1800;

/// Default warning lead time before the deadline (1 hour).
pub const DEFAULT_WARNING_LEAD_SECS: i64 = 3600;

/// Statistics from one warning run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarningStats {
    /// Tickets approaching their deadline.
    pub processed: usize,
    pub warnings_sent: usize,
    /// Would not escalate: disabled, no next rule, or level cap reached.
    pub skipped: usize,
    pub conflicts: usize,
    pub failed: usize,
}

impl WarningStats {
    /// Merge stats from another instance.
    pub fn merge(&mut self, other: &WarningStats) {
        self.processed += other.processed;
        self.warnings_sent += other.warnings_sent;
        self.skipped += other.skipped;
        self.conflicts += other.conflicts;
        self.failed += other.failed;
    }
}

enum WarningResult {
    Sent,
    Skipped,
    Conflict,
}

/// Sends `escalation_warning` notifications ahead of deadlines.
pub struct EscalationWarningJob {
    tickets: Arc<dyn TicketStore>,
    catalog: EscalationRuleCatalog,
    resolver: EscalationSettingsResolver,
    dispatcher: Arc<dyn NotificationDispatch>,
    lead_secs: i64,
}

impl EscalationWarningJob {
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        catalog: EscalationRuleCatalog,
        resolver: EscalationSettingsResolver,
        dispatcher: Arc<dyn NotificationDispatch>,
    ) -> Self {
        Self {
            tickets,
            catalog,
            resolver,
            dispatcher,
            lead_secs: DEFAULT_WARNING_LEAD_SECS,
        }
    }

    /// Use a custom lead time (at least one minute).
    #[must_use]
    pub fn with_lead_secs(mut self, lead_secs: i64) -> Self {
        self.lead_secs = lead_secs.max(60);
        self
    }

    /// Run a single warning pass at the current time.
    pub async fn poll(&self) -> Result<WarningStats, JobError> {
        self.run(Utc::now()).await
    }

    /// Run a single warning pass at `now`.
    #[instrument(skip(self))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<WarningStats, JobError> {
        let mut stats = WarningStats::default();
        let horizon = now + Duration::seconds(self.lead_secs);

        let candidates = self
            .tickets
            .find_approaching_deadline(now, horizon)
            .await?;
        if candidates.is_empty() {
            debug!("No tickets approaching escalation");
            return Ok(stats);
        }

        let config = EscalationConfig::load(&self.catalog, &self.resolver).await?;

        for ticket in &candidates {
            stats.processed += 1;
            match self.warn_ticket(ticket, now, &config).await {
                Ok(WarningResult::Sent) => stats.warnings_sent += 1,
                Ok(WarningResult::Skipped) => stats.skipped += 1,
                Ok(WarningResult::Conflict) => stats.conflicts += 1,
                Err(e) => {
                    warn!(
                        ticket_id = %ticket.id,
                        error = %e,
                        "Failed to send escalation warning"
                    );
                    stats.failed += 1;
                }
            }
        }

        info!(
            processed = stats.processed,
            warnings_sent = stats.warnings_sent,
            skipped = stats.skipped,
            conflicts = stats.conflicts,
            failed = stats.failed,
            "Completed escalation warning pass"
        );
        Ok(stats)
    }

    async fn warn_ticket(
        &self,
        ticket: &Ticket,
        now: DateTime<Utc>,
        config: &EscalationConfig,
    ) -> crate::error::Result<WarningResult> {
        let Some(due_at) = ticket.next_escalation_at else {
            return Ok(WarningResult::Skipped);
        };
        let settings = config.settings.resolve(ticket.company_id);
        let next_level = ticket.escalation_level + 1;
        if !settings.enabled || next_level > settings.max_escalation_level {
            return Ok(WarningResult::Skipped);
        }
        let Some(rule) = config.rules.find_for_ticket(ticket, next_level) else {
            return Ok(WarningResult::Skipped);
        };

        let mut transition = TicketTransition::from_ticket(ticket);
        transition.state.escalation_warning_sent = true;
        if self.tickets.apply_transition(transition).await?.is_none() {
            return Ok(WarningResult::Conflict);
        }

        let recipient = ticket.assigned_to.unwrap_or(ticket.created_by);
        self.dispatcher
            .send(Notification {
                company_id: Some(ticket.company_id),
                recipient,
                payload: NotificationPayload::EscalationWarning(EscalationWarningContext {
                    ticket_id: ticket.id,
                    reference: ticket.reference.clone(),
                    rule_id: rule.id,
                    next_level,
                    escalates_to: rule.escalate_to,
                    due_at,
                    minutes_remaining: (due_at - now).num_minutes(),
                }),
            })
            .await?;

        debug!(ticket_id = %ticket.id, recipient = %recipient, "Sent escalation warning");
        Ok(WarningResult::Sent)
    }
}
