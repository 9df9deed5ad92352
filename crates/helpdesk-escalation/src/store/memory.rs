//! In-memory stores for tests and embedding.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use helpdesk_core::{CompanyId, EscalationLogId, NotificationId, TicketId, UserId};
use helpdesk_db::models::{
    ActionCount, EscalationAction, EscalationLog, EscalationRule, EscalationSettingsRow,
    NewEscalationSettings, NewOutboxNotification, NotificationStatus, OutboxNotification, Ticket,
    TicketPriority, TicketStatus,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    EscalationLogStore, NotificationOutboxStore, ReportCursorStore, RuleStore, SettingsStore,
    TicketStore, TicketTransition,
};
use crate::error::{EscalationError, Result};

#[derive(Debug, Default)]
struct State {
    tickets: HashMap<TicketId, Ticket>,
    rules: Vec<EscalationRule>,
    settings: Vec<EscalationSettingsRow>,
    logs: Vec<EscalationLog>,
    outbox: Vec<OutboxNotification>,
    report_cursors: HashMap<String, DateTime<Utc>>,
}

/// Implements every store trait over one lock, so a ticket write and its
/// log row land together.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEscalationStore {
    state: Arc<RwLock<State>>,
    fail_ticket_writes: Arc<AtomicBool>,
}

impl InMemoryEscalationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a ticket as the ticket subsystem would.
    pub async fn upsert_ticket(&self, ticket: Ticket) {
        self.state.write().await.tickets.insert(ticket.id, ticket);
    }

    /// Change a ticket's status the way the ticket subsystem would.
    pub async fn set_ticket_status(&self, id: TicketId, status: TicketStatus) -> Option<Ticket> {
        let mut state = self.state.write().await;
        let ticket = state.tickets.get_mut(&id)?;
        ticket.status = status;
        ticket.version += 1;
        ticket.updated_at = Utc::now();
        Some(ticket.clone())
    }

    /// Change a ticket's assignee the way the ticket subsystem would.
    pub async fn set_ticket_assignee(
        &self,
        id: TicketId,
        assignee: Option<UserId>,
    ) -> Option<Ticket> {
        let mut state = self.state.write().await;
        let ticket = state.tickets.get_mut(&id)?;
        ticket.assigned_to = assignee;
        ticket.version += 1;
        ticket.updated_at = Utc::now();
        Some(ticket.clone())
    }

    pub async fn insert_rule(&self, rule: EscalationRule) {
        self.state.write().await.rules.push(rule);
    }

    /// Insert or replace the settings row for `row.company_id`.
    pub async fn upsert_settings(&self, row: EscalationSettingsRow) {
        let mut state = self.state.write().await;
        state.settings.retain(|s| s.company_id != row.company_id);
        state.settings.push(row);
    }

    pub async fn ticket(&self, id: TicketId) -> Option<Ticket> {
        self.state.read().await.tickets.get(&id).cloned()
    }

    /// All log rows in insertion order.
    pub async fn logs(&self) -> Vec<EscalationLog> {
        self.state.read().await.logs.clone()
    }

    /// All outbox rows in insertion order.
    pub async fn outbox(&self) -> Vec<OutboxNotification> {
        self.state.read().await.outbox.clone()
    }

    /// Make every ticket write fail, simulating an unavailable database.
    pub fn fail_ticket_writes(&self, fail: bool) {
        self.fail_ticket_writes.store(fail, Ordering::SeqCst);
    }
}

fn is_schedulable(ticket: &Ticket) -> bool {
    ticket.status.is_active() && !ticket.escalation_paused
}

#[async_trait::async_trait]
impl TicketStore for InMemoryEscalationStore {
    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        Ok(self.state.read().await.tickets.get(&id).cloned())
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>> {
        let state = self.state.read().await;
        let mut due: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| is_schedulable(t))
            .filter(|t| t.next_escalation_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.next_escalation_at, t.id));
        Ok(due)
    }

    async fn find_unscheduled(&self) -> Result<Vec<Ticket>> {
        let state = self.state.read().await;
        let mut unscheduled: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| is_schedulable(t) && t.next_escalation_at.is_none())
            .cloned()
            .collect();
        unscheduled.sort_by_key(|t| (t.created_at, t.id));
        Ok(unscheduled)
    }

    async fn find_approaching_deadline(
        &self,
        now: DateTime<Utc>,
        horizon: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        let state = self.state.read().await;
        let mut approaching: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| is_schedulable(t) && !t.escalation_warning_sent)
            .filter(|t| t.next_escalation_at.is_some_and(|at| at > now && at <= horizon))
            .cloned()
            .collect();
        approaching.sort_by_key(|t| t.next_escalation_at);
        Ok(approaching)
    }

    async fn apply_transition(&self, transition: TicketTransition) -> Result<Option<Ticket>> {
        if self.fail_ticket_writes.load(Ordering::SeqCst) {
            return Err(EscalationError::Store("ticket store unavailable".to_string()));
        }

        let mut state = self.state.write().await;
        let Some(ticket) = state.tickets.get_mut(&transition.ticket_id) else {
            return Ok(None);
        };
        if ticket.version != transition.expected_version {
            return Ok(None);
        }

        let s = transition.state;
        ticket.assigned_to = s.assigned_to;
        ticket.escalation_level = s.escalation_level;
        ticket.escalation_paused = s.escalation_paused;
        ticket.next_escalation_at = s.next_escalation_at;
        ticket.last_response_at = s.last_response_at;
        ticket.escalation_warning_sent = s.escalation_warning_sent;
        ticket.version += 1;
        ticket.updated_at = Utc::now();
        let updated = ticket.clone();

        if let Some(log) = transition.log {
            state.logs.push(EscalationLog {
                id: EscalationLogId::new(),
                ticket_id: log.ticket_id,
                company_id: log.company_id,
                escalation_rule_id: log.escalation_rule_id,
                action: log.action,
                from_user: log.from_user,
                to_user: log.to_user,
                level: log.level,
                notes: log.notes,
                created_at: log.created_at,
                created_by: log.created_by,
            });
        }

        Ok(Some(updated))
    }
}

#[async_trait::async_trait]
impl RuleStore for InMemoryEscalationStore {
    async fn find_active_rule(
        &self,
        company_id: CompanyId,
        priority: TicketPriority,
        level: i32,
    ) -> Result<Option<EscalationRule>> {
        let state = self.state.read().await;
        let matching = |company: Option<CompanyId>| {
            state
                .rules
                .iter()
                .find(|r| {
                    r.is_active
                        && r.company_id == company
                        && r.priority == priority
                        && r.level == level
                })
                .cloned()
        };
        Ok(matching(Some(company_id)).or_else(|| matching(None)))
    }

    async fn list_active_rules(&self) -> Result<Vec<EscalationRule>> {
        let state = self.state.read().await;
        Ok(state.rules.iter().filter(|r| r.is_active).cloned().collect())
    }
}

#[async_trait::async_trait]
impl SettingsStore for InMemoryEscalationStore {
    async fn find_settings_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Option<EscalationSettingsRow>> {
        let state = self.state.read().await;
        Ok(state
            .settings
            .iter()
            .find(|s| s.company_id == Some(company_id))
            .cloned())
    }

    async fn find_global_settings(&self) -> Result<Option<EscalationSettingsRow>> {
        let state = self.state.read().await;
        Ok(state.settings.iter().find(|s| s.company_id.is_none()).cloned())
    }

    async fn list_settings(&self) -> Result<Vec<EscalationSettingsRow>> {
        Ok(self.state.read().await.settings.clone())
    }

    async fn insert_global_settings_if_missing(
        &self,
        defaults: &NewEscalationSettings,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.settings.iter().any(|s| s.company_id.is_none()) {
            return Ok(false);
        }
        let now = Utc::now();
        state.settings.push(EscalationSettingsRow {
            id: Uuid::new_v4(),
            company_id: None,
            enabled: defaults.enabled,
            business_hours_only: defaults.business_hours_only,
            business_start_hour: defaults.business_start_hour,
            business_end_hour: defaults.business_end_hour,
            business_days: defaults.business_days.clone(),
            max_escalation_level: defaults.max_escalation_level,
            auto_assign_on_escalation: defaults.auto_assign_on_escalation,
            pause_on_response: defaults.pause_on_response,
            email_notifications: defaults.email_notifications,
            created_at: now,
            updated_at: now,
        });
        Ok(true)
    }
}

#[async_trait::async_trait]
impl EscalationLogStore for InMemoryEscalationStore {
    async fn list_for_ticket(&self, ticket_id: TicketId) -> Result<Vec<EscalationLog>> {
        let state = self.state.read().await;
        // Reverse insertion order keeps same-timestamp rows newest first.
        let mut logs: Vec<EscalationLog> = state
            .logs
            .iter()
            .rev()
            .filter(|l| l.ticket_id == ticket_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs)
    }

    async fn list_since(
        &self,
        action: EscalationAction,
        since: DateTime<Utc>,
    ) -> Result<Vec<EscalationLog>> {
        let state = self.state.read().await;
        let mut logs: Vec<EscalationLog> = state
            .logs
            .iter()
            .rev()
            .filter(|l| l.action == action && l.created_at >= since)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs)
    }

    async fn count_by_action_since(
        &self,
        company_id: Option<CompanyId>,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActionCount>> {
        let state = self.state.read().await;
        let mut counts: HashMap<EscalationAction, i64> = HashMap::new();
        for log in state
            .logs
            .iter()
            .filter(|l| l.created_at >= since)
            .filter(|l| company_id.is_none_or(|c| l.company_id == c))
        {
            *counts.entry(log.action).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(action, count)| ActionCount { action, count })
            .collect())
    }
}

#[async_trait::async_trait]
impl NotificationOutboxStore for InMemoryEscalationStore {
    async fn enqueue(&self, notification: NewOutboxNotification) -> Result<OutboxNotification> {
        let now = Utc::now();
        let row = OutboxNotification {
            id: NotificationId::new(),
            company_id: notification.company_id,
            recipient: notification.recipient,
            kind: notification.kind,
            payload: notification.payload,
            status: NotificationStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            sent_at: None,
        };
        self.state.write().await.outbox.push(row.clone());
        Ok(row)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxNotification>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let mut state = self.state.write().await;
        let mut claimed = Vec::new();
        for row in state
            .outbox
            .iter_mut()
            .filter(|n| n.status == NotificationStatus::Pending && n.next_attempt_at <= now)
            .take(limit)
        {
            row.next_attempt_at = lease_until;
            claimed.push(row.clone());
        }
        Ok(claimed)
    }

    async fn mark_sent(
        &self,
        id: NotificationId,
        attempts: i32,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(row) = state.outbox.iter_mut().find(|n| n.id == id) {
            row.status = NotificationStatus::Sent;
            row.attempts = attempts;
            row.sent_at = Some(sent_at);
            row.last_error = None;
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: NotificationId,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(row) = state.outbox.iter_mut().find(|n| n.id == id) {
            row.attempts = attempts;
            row.next_attempt_at = next_attempt_at;
            row.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn mark_failed(&self, id: NotificationId, attempts: i32, error: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(row) = state.outbox.iter_mut().find(|n| n.id == id) {
            row.status = NotificationStatus::Failed;
            row.attempts = attempts;
            row.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReportCursorStore for InMemoryEscalationStore {
    async fn last_period_end(&self, report: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.read().await.report_cursors.get(report).copied())
    }

    async fn advance_period(
        &self,
        report: &str,
        previous: Option<DateTime<Utc>>,
        period_end: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.report_cursors.get(report).copied() != previous {
            return Ok(false);
        }
        state.report_cursors.insert(report.to_string(), period_end);
        Ok(true)
    }
}
