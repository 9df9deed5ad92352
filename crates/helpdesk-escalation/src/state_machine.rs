//! Per-ticket escalation decision.
//!
//! A ticket is conceptually `Idle` (paused or terminal), `Scheduled`
//! (`next_escalation_at` set), or `Due` (scheduled and elapsed). The scheduler
//! only hands `Due` tickets to [`TicketEscalationStateMachine::escalate`].
//!
//! Every write is a version-guarded [`TicketTransition`]; losing the race to
//! another writer yields [`EscalationOutcome::Conflict`] and leaves the
//! winner's state untouched.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use helpdesk_core::UserId;
use helpdesk_db::models::{EscalationAction, EscalationRule, NewEscalationLog, Ticket};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::calendar::BusinessCalendar;
use crate::error::{CalendarError, Result};
use crate::notification::{
    EscalationRecipientRole, Notification, NotificationDispatch, NotificationPayload,
    TicketEscalatedContext,
};
use crate::settings::EscalationSettings;
use crate::snapshot::EscalationConfig;
use crate::store::{TicketStore, TicketTransition};

/// Result of evaluating one due ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EscalationOutcome {
    /// Escalation is disabled for the company; nothing was written.
    Disabled,
    /// Outside business hours; the deadline moved to the next opening.
    Deferred { next_escalation_at: DateTime<Utc> },
    /// No active rule for the next level.
    Stalled { next_level: i32 },
    /// The next level exceeds the configured maximum.
    LevelCapped { next_level: i32 },
    /// The ticket moved up one level.
    Escalated {
        level: i32,
        assigned_to: Option<UserId>,
    },
    /// Another writer changed the ticket first.
    Conflict,
}

/// Deadline for the rule: `(last_response_at or created_at) + hours`, pushed
/// into business hours when the settings ask for it.
///
/// The shift moves the deadline itself, so non-business time between the
/// anchor and the deadline is still counted.
pub fn compute_next_deadline(
    ticket: &Ticket,
    rule: &EscalationRule,
    settings: &EscalationSettings,
) -> std::result::Result<DateTime<Utc>, CalendarError> {
    let base = ticket.last_response_at.unwrap_or(ticket.created_at);
    let deadline = base
        .checked_add_signed(hours(rule.hours_to_escalate))
        .ok_or(CalendarError::Unreachable(base))?;

    if settings.business_hours_only {
        BusinessCalendar::from_settings(settings)?.next_business_instant(deadline)
    } else {
        Ok(deadline)
    }
}

/// Longest threshold honoured: ten years.
const MAX_THRESHOLD_MILLIS: f64 = 10.0 * 365.0 * 24.0 * 3_600_000.0;

fn hours(value: f64) -> Duration {
    let millis = (value * 3_600_000.0).round().clamp(0.0, MAX_THRESHOLD_MILLIS);
    Duration::milliseconds(millis as i64)
}

/// Note stored with an automatic escalation.
#[must_use]
pub fn escalation_note(rule: &EscalationRule) -> String {
    format!(
        "Escalated automatically after {} hours without response",
        rule.hours_to_escalate
    )
}

/// Applies the escalation algorithm to due tickets.
#[derive(Clone)]
pub struct TicketEscalationStateMachine {
    tickets: Arc<dyn TicketStore>,
    dispatcher: Arc<dyn NotificationDispatch>,
}

impl TicketEscalationStateMachine {
    pub fn new(tickets: Arc<dyn TicketStore>, dispatcher: Arc<dyn NotificationDispatch>) -> Self {
        Self {
            tickets,
            dispatcher,
        }
    }

    /// Evaluate one due ticket against a configuration snapshot.
    ///
    /// Errors are limited to calendar misconfiguration and store failures;
    /// notification failures are logged and never undo the escalation.
    pub async fn escalate(
        &self,
        ticket: &Ticket,
        now: DateTime<Utc>,
        config: &EscalationConfig,
    ) -> Result<EscalationOutcome> {
        let settings = config.settings.resolve(ticket.company_id);
        if !settings.enabled {
            debug!(ticket_id = %ticket.id, "Escalation disabled for company");
            return Ok(EscalationOutcome::Disabled);
        }

        let calendar = BusinessCalendar::from_settings(settings)?;
        if !calendar.is_business_time(now) {
            let next_at = calendar.next_business_instant(now)?;
            let mut transition = TicketTransition::from_ticket(ticket);
            transition.state.next_escalation_at = Some(next_at);
            transition.state.escalation_warning_sent = false;

            if self.tickets.apply_transition(transition).await?.is_none() {
                return Ok(EscalationOutcome::Conflict);
            }
            info!(
                ticket_id = %ticket.id,
                reference = %ticket.reference,
                next_escalation_at = %next_at,
                "Escalation deferred to business hours"
            );
            return Ok(EscalationOutcome::Deferred {
                next_escalation_at: next_at,
            });
        }

        let next_level = ticket.escalation_level + 1;
        let Some(rule) = config.rules.find_for_ticket(ticket, next_level) else {
            warn!(
                ticket_id = %ticket.id,
                reference = %ticket.reference,
                next_level,
                "No escalation rule for next level"
            );
            return Ok(EscalationOutcome::Stalled { next_level });
        };

        if next_level > settings.max_escalation_level {
            info!(
                ticket_id = %ticket.id,
                reference = %ticket.reference,
                next_level,
                max_level = settings.max_escalation_level,
                "Ticket reached maximum escalation level"
            );
            return Ok(EscalationOutcome::LevelCapped { next_level });
        }

        let previous_assignee = ticket.assigned_to;
        let mut transition = TicketTransition::from_ticket(ticket);
        transition.state.escalation_level = next_level;
        if settings.auto_assign_on_escalation {
            transition.state.assigned_to = Some(rule.escalate_to);
        }
        transition.state.next_escalation_at = config
            .rules
            .find_for_ticket(ticket, next_level + 1)
            .map(|following| compute_next_deadline(ticket, following, settings))
            .transpose()?;
        transition.state.escalation_warning_sent = false;

        let transition = transition.with_log(NewEscalationLog {
            ticket_id: ticket.id,
            company_id: ticket.company_id,
            escalation_rule_id: Some(rule.id),
            action: EscalationAction::Escalated,
            from_user: previous_assignee,
            to_user: Some(rule.escalate_to),
            level: next_level,
            notes: escalation_note(rule),
            created_at: now,
            created_by: None,
        });

        let Some(updated) = self.tickets.apply_transition(transition).await? else {
            debug!(ticket_id = %ticket.id, "Lost escalation race; skipping");
            return Ok(EscalationOutcome::Conflict);
        };

        info!(
            ticket_id = %updated.id,
            reference = %updated.reference,
            level = next_level,
            escalate_to = %rule.escalate_to,
            next_escalation_at = ?updated.next_escalation_at,
            "Ticket escalated"
        );

        self.notify_escalation(&updated, rule, previous_assignee, settings)
            .await;

        Ok(EscalationOutcome::Escalated {
            level: next_level,
            assigned_to: updated.assigned_to,
        })
    }

    /// Best-effort notifications after an escalation has been committed.
    async fn notify_escalation(
        &self,
        ticket: &Ticket,
        rule: &EscalationRule,
        previous_assignee: Option<UserId>,
        settings: &EscalationSettings,
    ) {
        for notification in escalation_notifications(ticket, rule, previous_assignee, settings) {
            let recipient = notification.recipient;
            if let Err(e) = self.dispatcher.send(notification).await {
                warn!(
                    ticket_id = %ticket.id,
                    recipient = %recipient,
                    error = %e,
                    "Failed to dispatch escalation notification"
                );
            }
        }
    }
}

/// Notifications owed after `ticket` (already updated) escalated under `rule`.
#[must_use]
pub fn escalation_notifications(
    ticket: &Ticket,
    rule: &EscalationRule,
    previous_assignee: Option<UserId>,
    settings: &EscalationSettings,
) -> Vec<Notification> {
    let level = ticket.escalation_level;
    let make = |recipient: UserId, role: EscalationRecipientRole, message: String| Notification {
        company_id: Some(ticket.company_id),
        recipient,
        payload: NotificationPayload::TicketEscalated(TicketEscalatedContext {
            ticket_id: ticket.id,
            reference: ticket.reference.clone(),
            rule_id: rule.id,
            level,
            role,
            message,
        }),
    };

    let mut notifications = Vec::new();
    let new_assignee = settings
        .auto_assign_on_escalation
        .then_some(rule.escalate_to);

    if let Some(assignee) = new_assignee {
        let message = rule.notification_template.clone().unwrap_or_else(|| {
            format!("Ticket {} escalated to level {level}", ticket.reference)
        });
        notifications.push(make(assignee, EscalationRecipientRole::NewAssignee, message));
    }

    if new_assignee != Some(ticket.created_by) {
        notifications.push(make(
            ticket.created_by,
            EscalationRecipientRole::Creator,
            format!(
                "Your ticket {} has been escalated to level {level}",
                ticket.reference
            ),
        ));
    }

    if settings.email_notifications {
        if let Some(previous) = previous_assignee.filter(|p| Some(*p) != new_assignee) {
            notifications.push(make(
                previous,
                EscalationRecipientRole::PreviousAssignee,
                format!(
                    "Ticket {} was escalated to level {level} and reassigned",
                    ticket.reference
                ),
            ));
        }
    }

    notifications
}
