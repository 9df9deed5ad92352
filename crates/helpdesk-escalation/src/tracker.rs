//! Reactions to ticket activity.
//!
//! The ticket layer calls [`ResponseActivityTracker`] right after committing
//! its own change. Each operation re-reads the ticket, plans a transition and
//! applies it behind the version guard, re-planning from a fresh read when
//! another writer got in first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use helpdesk_core::{EscalationRuleId, TicketId, UserId};
use helpdesk_db::models::{EscalationAction, NewEscalationLog, Ticket, TicketStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::EscalationRuleCatalog;
use crate::error::{EscalationError, Result};
use crate::settings::EscalationSettingsResolver;
use crate::state_machine::compute_next_deadline;
use crate::store::{TicketStore, TicketTransition};

/// Re-plans attempted after a version conflict before giving up.
pub const MAX_CONFLICT_RETRIES: usize = 3;

/// The parts of a ticket message that matter to escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketMessage {
    /// Internal notes never touch escalation state.
    pub is_private: bool,
    pub author: Option<UserId>,
}

/// An event the tracker reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    Created,
    StatusChanged { previous: TicketStatus },
    Reassigned { previous: Option<UserId> },
    PublicMessage { author: Option<UserId> },
    Pause { actor: Option<UserId> },
    Resume { actor: Option<UserId> },
    Reset { actor: Option<UserId> },
}

/// Keeps escalation state in step with ticket activity.
#[derive(Clone)]
pub struct ResponseActivityTracker {
    tickets: Arc<dyn TicketStore>,
    catalog: EscalationRuleCatalog,
    resolver: EscalationSettingsResolver,
}

impl ResponseActivityTracker {
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        catalog: EscalationRuleCatalog,
        resolver: EscalationSettingsResolver,
    ) -> Self {
        Self {
            tickets,
            catalog,
            resolver,
        }
    }

    /// Initialize escalation state for a new ticket and schedule its first
    /// deadline when a level-1 rule applies.
    ///
    /// Returns the updated ticket, or `None` when nothing had to change.
    pub async fn on_ticket_created(
        &self,
        id: TicketId,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        self.apply(id, Activity::Created, now).await
    }

    /// Pause on resolve/close, re-arm on reopen. The level is kept on reopen.
    pub async fn on_status_changed(
        &self,
        id: TicketId,
        previous: TicketStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        self.apply(id, Activity::StatusChanged { previous }, now).await
    }

    /// A reassignment counts as a response: the clock restarts at the current level.
    pub async fn on_reassigned(
        &self,
        id: TicketId,
        previous: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        self.apply(id, Activity::Reassigned { previous }, now).await
    }

    /// Pause escalation when a public reply arrives and the company asks for it.
    pub async fn on_public_message_added(
        &self,
        id: TicketId,
        message: &TicketMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        if message.is_private {
            return Ok(None);
        }
        self.apply(
            id,
            Activity::PublicMessage {
                author: message.author,
            },
            now,
        )
        .await
    }

    /// Clear the pause and schedule the next deadline from the level+1 rule.
    pub async fn resume(
        &self,
        id: TicketId,
        actor: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        self.apply(id, Activity::Resume { actor }, now).await
    }

    pub(crate) async fn load(&self, id: TicketId) -> Result<Ticket> {
        self.tickets
            .get_ticket(id)
            .await?
            .ok_or(EscalationError::TicketNotFound(id))
    }

    pub(crate) async fn apply(
        &self,
        id: TicketId,
        activity: Activity,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        for attempt in 0..=MAX_CONFLICT_RETRIES {
            let ticket = self.load(id).await?;
            let Some(transition) = self.plan(&ticket, activity, now).await? else {
                debug!(ticket_id = %id, ?activity, "No escalation change needed");
                return Ok(None);
            };
            let changed = transition.state != ticket.escalation_state();

            if let Some(updated) = self.tickets.apply_transition(transition).await? {
                if !changed {
                    debug!(ticket_id = %id, ?activity, "Request logged without state change");
                    return Ok(None);
                }
                info!(
                    ticket_id = %id,
                    ?activity,
                    paused = updated.escalation_paused,
                    level = updated.escalation_level,
                    next_escalation_at = ?updated.next_escalation_at,
                    "Escalation state updated"
                );
                return Ok(Some(updated));
            }
            debug!(ticket_id = %id, attempt, "Ticket changed concurrently; re-planning");
        }

        warn!(ticket_id = %id, ?activity, "Giving up after repeated version conflicts");
        Err(EscalationError::Conflict(id))
    }

    /// Decide the transition for `activity` against the freshly read `ticket`.
    async fn plan(
        &self,
        ticket: &Ticket,
        activity: Activity,
        now: DateTime<Utc>,
    ) -> Result<Option<TicketTransition>> {
        let next_level = ticket.escalation_level + 1;
        let mut next = TicketTransition::from_ticket(ticket);
        let state = &mut next.state;
        let log = |action: EscalationAction, notes: String| NewEscalationLog {
            ticket_id: ticket.id,
            company_id: ticket.company_id,
            escalation_rule_id: None,
            action,
            from_user: None,
            to_user: None,
            level: ticket.escalation_level,
            notes,
            created_at: now,
            created_by: None,
        };

        match activity {
            Activity::Created => {
                if !ticket.status.is_active() {
                    return Ok(None);
                }
                state.escalation_level = 0;
                state.escalation_paused = false;
                let anchor = ticket.last_response_at.unwrap_or(ticket.created_at);
                state.last_response_at = Some(anchor);
                if state.next_escalation_at.is_none() {
                    state.next_escalation_at = self.schedule(ticket, 1, Some(anchor)).await?.0;
                    state.escalation_warning_sent = false;
                }
                if next.state == ticket.escalation_state() {
                    return Ok(None);
                }
                Ok(Some(next))
            }

            Activity::StatusChanged { previous } => {
                if ticket.status.is_terminal() && !previous.is_terminal() {
                    state.escalation_paused = true;
                    state.next_escalation_at = None;
                    state.escalation_warning_sent = false;
                    let notes = format!(
                        "Escalation paused: ticket {}",
                        ticket.status.as_str().to_lowercase()
                    );
                    Ok(Some(next.with_log(log(EscalationAction::Paused, notes))))
                } else if ticket.status.is_active() && previous.is_terminal() {
                    state.escalation_paused = false;
                    state.last_response_at = Some(now);
                    let (deadline, _) = self.schedule(ticket, next_level, Some(now)).await?;
                    state.next_escalation_at = deadline;
                    state.escalation_warning_sent = false;
                    Ok(Some(next))
                } else {
                    Ok(None)
                }
            }

            Activity::Reassigned { previous } => {
                let Some(assignee) = ticket.assigned_to else {
                    return Ok(None);
                };
                if Some(assignee) == previous || !ticket.status.is_active() {
                    return Ok(None);
                }
                state.escalation_paused = false;
                state.last_response_at = Some(now);
                state.next_escalation_at = self.schedule(ticket, next_level, Some(now)).await?.0;
                state.escalation_warning_sent = false;
                let entry = NewEscalationLog {
                    from_user: previous,
                    to_user: Some(assignee),
                    ..log(EscalationAction::Assigned, "Ticket reassigned".to_string())
                };
                Ok(Some(next.with_log(entry)))
            }

            Activity::PublicMessage { author } => {
                if ticket.escalation_paused || !ticket.status.is_active() {
                    return Ok(None);
                }
                let settings = self.resolver.resolve(ticket.company_id).await?;
                if !settings.pause_on_response {
                    return Ok(None);
                }
                state.escalation_paused = true;
                state.next_escalation_at = None;
                state.last_response_at = Some(now);
                state.escalation_warning_sent = false;
                let entry = NewEscalationLog {
                    from_user: author,
                    ..log(EscalationAction::Paused, "Response received".to_string())
                };
                Ok(Some(next.with_log(entry)))
            }

            Activity::Pause { actor } => {
                if ticket.escalation_paused || !ticket.status.is_active() {
                    let Some(actor) = actor else {
                        return Ok(None);
                    };
                    let entry = NewEscalationLog {
                        created_by: Some(actor),
                        ..log(EscalationAction::Paused, unchanged_note("Pause", ticket, "paused"))
                    };
                    return Ok(Some(next.with_log(entry)));
                }
                state.escalation_paused = true;
                state.next_escalation_at = None;
                state.escalation_warning_sent = false;
                let entry = NewEscalationLog {
                    created_by: actor,
                    ..log(EscalationAction::Paused, "Escalation paused manually".to_string())
                };
                Ok(Some(next.with_log(entry)))
            }

            Activity::Resume { actor } => {
                if !ticket.escalation_paused || !ticket.status.is_active() {
                    let Some(actor) = actor else {
                        return Ok(None);
                    };
                    let notes = unchanged_note("Resume", ticket, "running");
                    let entry = NewEscalationLog {
                        created_by: Some(actor),
                        ..log(EscalationAction::Resumed, notes)
                    };
                    return Ok(Some(next.with_log(entry)));
                }
                let (deadline, rule_id) = self
                    .schedule(ticket, next_level, ticket.last_response_at)
                    .await?;
                state.escalation_paused = false;
                state.next_escalation_at = deadline;
                state.escalation_warning_sent = false;
                let entry = NewEscalationLog {
                    escalation_rule_id: rule_id,
                    created_by: actor,
                    ..log(EscalationAction::Resumed, "Escalation resumed".to_string())
                };
                Ok(Some(next.with_log(entry)))
            }

            Activity::Reset { actor } => {
                state.escalation_level = 0;
                state.escalation_paused = false;
                state.next_escalation_at = None;
                state.escalation_warning_sent = false;
                let entry = NewEscalationLog {
                    from_user: ticket.assigned_to,
                    level: 0,
                    created_by: actor,
                    ..log(
                        EscalationAction::Reset,
                        format!("Escalation reset from level {}", ticket.escalation_level),
                    )
                };
                Ok(Some(next.with_log(entry)))
            }
        }
    }

    /// Deadline from the rule for `next_level` anchored at `anchor`, with the rule used.
    ///
    /// `(None, None)` when escalation is disabled, no rule applies, or the
    /// calendar is misconfigured; the seed sweep retries those later.
    async fn schedule(
        &self,
        ticket: &Ticket,
        next_level: i32,
        anchor: Option<DateTime<Utc>>,
    ) -> Result<(Option<DateTime<Utc>>, Option<EscalationRuleId>)> {
        let settings = self.resolver.resolve(ticket.company_id).await?;
        if !settings.enabled {
            return Ok((None, None));
        }
        let Some(rule) = self
            .catalog
            .find_rule(ticket, next_level)
            .await?
        else {
            return Ok((None, None));
        };

        let mut anchored = ticket.clone();
        anchored.last_response_at = anchor;
        match compute_next_deadline(&anchored, &rule, &settings) {
            Ok(deadline) => Ok((Some(deadline), Some(rule.id))),
            Err(e) => {
                warn!(ticket_id = %ticket.id, error = %e, "Cannot compute escalation deadline");
                Ok((None, None))
            }
        }
    }
}

/// Log note for a manual request that leaves the ticket as it is.
fn unchanged_note(request: &str, ticket: &Ticket, already: &str) -> String {
    if ticket.status.is_active() {
        format!("{request} requested; escalation already {already}")
    } else {
        format!(
            "{request} requested on {} ticket; nothing changed",
            ticket.status.as_str().to_lowercase()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEscalationStore;
    use chrono::TimeZone;
    use helpdesk_core::CompanyId;
    use helpdesk_db::models::TicketPriority;

    fn monday(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, hour, 0, 0).unwrap()
    }

    fn tracker(store: &InMemoryEscalationStore) -> ResponseActivityTracker {
        let shared = Arc::new(store.clone());
        ResponseActivityTracker::new(
            shared.clone(),
            EscalationRuleCatalog::new(shared.clone()),
            EscalationSettingsResolver::new(shared),
        )
    }

    async fn seeded_ticket(store: &InMemoryEscalationStore, status: TicketStatus) -> Ticket {
        let ticket = Ticket {
            id: TicketId::new(),
            reference: "TCK-1".to_string(),
            company_id: CompanyId::new(),
            priority: TicketPriority::Medium,
            status,
            created_by: UserId::new(),
            assigned_to: None,
            escalation_level: 1,
            escalation_paused: false,
            next_escalation_at: Some(monday(12)),
            last_response_at: Some(monday(8)),
            escalation_warning_sent: true,
            version: 0,
            created_at: monday(8),
            updated_at: monday(8),
        };
        store.upsert_ticket(ticket.clone()).await;
        ticket
    }

    #[tokio::test]
    async fn test_private_message_is_ignored() {
        let store = InMemoryEscalationStore::new();
        let ticket = seeded_ticket(&store, TicketStatus::Open).await;
        let message = TicketMessage {
            is_private: true,
            author: Some(UserId::new()),
        };

        let result = tracker(&store)
            .on_public_message_added(ticket.id, &message, monday(10))
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(store.ticket(ticket.id).await.unwrap(), ticket);
        assert!(store.logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_public_message_pauses_and_logs() {
        let store = InMemoryEscalationStore::new();
        let ticket = seeded_ticket(&store, TicketStatus::InProgress).await;
        let message = TicketMessage {
            is_private: false,
            author: Some(ticket.created_by),
        };

        let updated = tracker(&store)
            .on_public_message_added(ticket.id, &message, monday(10))
            .await
            .unwrap()
            .unwrap();

        assert!(updated.escalation_paused);
        assert_eq!(updated.next_escalation_at, None);
        assert_eq!(updated.last_response_at, Some(monday(10)));
        let logs = store.logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, EscalationAction::Paused);
        assert_eq!(logs[0].notes, "Response received");
        assert_eq!(logs[0].created_by, None);
    }

    #[tokio::test]
    async fn test_resume_on_unpaused_ticket_is_noop() {
        let store = InMemoryEscalationStore::new();
        let ticket = seeded_ticket(&store, TicketStatus::Open).await;

        let result = tracker(&store).resume(ticket.id, None, monday(10)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_missing_ticket_is_an_error() {
        let store = InMemoryEscalationStore::new();
        let id = TicketId::new();
        let err = tracker(&store).resume(id, None, monday(10)).await.unwrap_err();
        assert!(matches!(err, EscalationError::TicketNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn test_status_change_between_active_states_is_noop() {
        let store = InMemoryEscalationStore::new();
        let ticket = seeded_ticket(&store, TicketStatus::InProgress).await;

        let result = tracker(&store)
            .on_status_changed(ticket.id, TicketStatus::Open, monday(10))
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
