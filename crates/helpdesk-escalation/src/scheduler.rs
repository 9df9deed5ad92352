//! Periodic escalation entry points.
//!
//! [`EscalationScheduler::run_cycle`] evaluates every due ticket once;
//! [`EscalationScheduler::seed_missing_schedules`] gives unscheduled tickets
//! their first deadline. Both read the configuration once per invocation and
//! isolate failures per ticket. Running two schedulers at once is safe: the
//! version guard on every ticket write lets exactly one of them win.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::catalog::EscalationRuleCatalog;
use crate::error::Result;
use crate::settings::EscalationSettingsResolver;
use crate::snapshot::EscalationConfig;
use crate::state_machine::{compute_next_deadline, EscalationOutcome, TicketEscalationStateMachine};
use crate::store::{TicketStore, TicketTransition};

/// Outcome counts of one [`EscalationScheduler::run_cycle`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Due tickets selected for this cycle.
    pub processed: usize,
    pub escalated: usize,
    pub deferred: usize,
    /// No rule for the next level.
    pub stalled: usize,
    /// Next level above the configured maximum.
    pub level_capped: usize,
    /// Escalation disabled for the ticket's company.
    pub disabled: usize,
    /// Another writer changed the ticket first.
    pub conflicts: usize,
    pub failed: usize,
    /// Left unprocessed because the cycle ran out of time.
    pub aborted: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: &EscalationOutcome) {
        match outcome {
            EscalationOutcome::Disabled => self.disabled += 1,
            EscalationOutcome::Deferred { .. } => self.deferred += 1,
            EscalationOutcome::Stalled { .. } => self.stalled += 1,
            EscalationOutcome::LevelCapped { .. } => self.level_capped += 1,
            EscalationOutcome::Escalated { .. } => self.escalated += 1,
            EscalationOutcome::Conflict => self.conflicts += 1,
        }
    }

    /// Merge counts from another report.
    pub fn merge(&mut self, other: &CycleReport) {
        self.processed += other.processed;
        self.escalated += other.escalated;
        self.deferred += other.deferred;
        self.stalled += other.stalled;
        self.level_capped += other.level_capped;
        self.disabled += other.disabled;
        self.conflicts += other.conflicts;
        self.failed += other.failed;
        self.aborted += other.aborted;
    }
}

/// Drives due tickets through the state machine.
#[derive(Clone)]
pub struct EscalationScheduler {
    tickets: Arc<dyn TicketStore>,
    catalog: EscalationRuleCatalog,
    resolver: EscalationSettingsResolver,
    state_machine: TicketEscalationStateMachine,
    cycle_budget: Option<Duration>,
}

impl EscalationScheduler {
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        catalog: EscalationRuleCatalog,
        resolver: EscalationSettingsResolver,
        state_machine: TicketEscalationStateMachine,
    ) -> Self {
        Self {
            tickets,
            catalog,
            resolver,
            state_machine,
            cycle_budget: None,
        }
    }

    /// Stop starting new tickets once a cycle has run this long.
    #[must_use]
    pub fn with_cycle_budget(mut self, budget: Duration) -> Self {
        self.cycle_budget = Some(budget);
        self
    }

    /// Load rules and settings for one pass.
    pub async fn load_config(&self) -> Result<EscalationConfig> {
        EscalationConfig::load(&self.catalog, &self.resolver).await
    }

    /// Evaluate every due ticket once.
    ///
    /// Fails only when the configuration or the due list cannot be read;
    /// per-ticket errors are counted in [`CycleReport::failed`].
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let started = Instant::now();
        let config = self.load_config().await?;
        let due = self.tickets.find_due(now).await?;

        let mut report = CycleReport {
            processed: due.len(),
            ..CycleReport::default()
        };
        if due.is_empty() {
            debug!("No due tickets");
            return Ok(report);
        }

        for (index, ticket) in due.iter().enumerate() {
            if let Some(budget) = self.cycle_budget {
                if started.elapsed() >= budget {
                    report.aborted = due.len() - index;
                    warn!(
                        remaining = report.aborted,
                        budget_secs = budget.as_secs(),
                        "Escalation cycle exceeded its budget; deferring remaining tickets"
                    );
                    break;
                }
            }

            match self.state_machine.escalate(ticket, now, &config).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    warn!(
                        ticket_id = %ticket.id,
                        reference = %ticket.reference,
                        error = %e,
                        "Failed to escalate ticket"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            processed = report.processed,
            escalated = report.escalated,
            deferred = report.deferred,
            stalled = report.stalled,
            level_capped = report.level_capped,
            conflicts = report.conflicts,
            failed = report.failed,
            aborted = report.aborted,
            "Completed escalation cycle"
        );
        Ok(report)
    }

    /// Give unscheduled active tickets a deadline from their next-level rule.
    ///
    /// Returns the number of tickets scheduled.
    #[instrument(skip(self))]
    pub async fn seed_missing_schedules(&self, now: DateTime<Utc>) -> Result<usize> {
        let config = self.load_config().await?;
        let tickets = self.tickets.find_unscheduled().await?;
        let mut seeded = 0;

        for ticket in &tickets {
            let settings = config.settings.resolve(ticket.company_id);
            if !settings.enabled {
                continue;
            }
            let Some(rule) = config
                .rules
                .find_for_ticket(ticket, ticket.escalation_level + 1)
            else {
                continue;
            };

            let deadline = match compute_next_deadline(ticket, rule, settings) {
                Ok(deadline) => deadline,
                Err(e) => {
                    warn!(ticket_id = %ticket.id, error = %e, "Cannot compute escalation deadline");
                    continue;
                }
            };

            let mut transition = TicketTransition::from_ticket(ticket);
            transition.state.next_escalation_at = Some(deadline);
            transition.state.escalation_warning_sent = false;

            match self.tickets.apply_transition(transition).await {
                Ok(Some(_)) => {
                    seeded += 1;
                    debug!(
                        ticket_id = %ticket.id,
                        next_escalation_at = %deadline,
                        "Scheduled ticket"
                    );
                }
                Ok(None) => debug!(ticket_id = %ticket.id, "Ticket changed while seeding; skipped"),
                Err(e) => warn!(ticket_id = %ticket.id, error = %e, "Failed to schedule ticket"),
            }
        }

        info!(
            candidates = tickets.len(),
            seeded,
            at = %now,
            "Seeded missing escalation schedules"
        );
        Ok(seeded)
    }
}
