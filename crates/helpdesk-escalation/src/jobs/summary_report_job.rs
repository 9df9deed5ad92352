//! Daily escalation summary.
//!
//! Aggregates the `escalated` log rows of one period and sends the full
//! report to the global recipients and each company's section to that
//! company's recipients. Nothing is sent for a period without escalations.
//!
//! Periods are contiguous: each starts where the last one ended, as recorded
//! in the shared report cursor. A worker only reports after claiming the
//! period through the cursor, so restarts and extra instances never send a
//! period twice.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use helpdesk_core::{CompanyId, TicketId, UserId};
use helpdesk_db::models::{EscalationAction, Ticket};
use tracing::{debug, info, instrument, warn};

use super::JobError;
use crate::notification::{
    EscalationSummaryContext, Notification, NotificationDispatch, NotificationPayload,
    RecipientDirectory,
};
use crate::report::{EscalationSummary, EscalationSummaryBuilder};
use crate::store::{EscalationLogStore, ReportCursorStore, TicketStore};

/// Default interval between checks for a due report (1 hour).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3_600;

/// Default report period (24 hours).
pub const DEFAULT_PERIOD_SECS: u64 = 86_400;

/// Cursor name of the summary report.
pub const REPORT_NAME: &str = "escalation_summary";

/// Statistics from one report run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportStats {
    /// Whether this run claimed and reported a period.
    pub reported: bool,
    /// Escalations included in the report.
    pub escalations: usize,
    pub companies: usize,
    pub notifications_sent: usize,
    pub failed: usize,
}

/// Builds and dispatches the periodic escalation summary.
pub struct EscalationReportJob {
    tickets: Arc<dyn TicketStore>,
    logs: Arc<dyn EscalationLogStore>,
    cursor: Arc<dyn ReportCursorStore>,
    directory: Arc<dyn RecipientDirectory>,
    dispatcher: Arc<dyn NotificationDispatch>,
    period: Duration,
}

impl EscalationReportJob {
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        logs: Arc<dyn EscalationLogStore>,
        cursor: Arc<dyn ReportCursorStore>,
        directory: Arc<dyn RecipientDirectory>,
        dispatcher: Arc<dyn NotificationDispatch>,
    ) -> Self {
        Self {
            tickets,
            logs,
            cursor,
            directory,
            dispatcher,
            period: Duration::hours(24),
        }
    }

    /// Summarize a custom period instead of 24 hours.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Report the period ending now, if one is due.
    pub async fn poll(&self) -> Result<ReportStats, JobError> {
        self.run(Utc::now()).await
    }

    /// Report the period ending at `now` once a full period has passed since
    /// the last report. The first report covers the period before `now`.
    #[instrument(skip(self))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ReportStats, JobError> {
        let previous = self.cursor.last_period_end(REPORT_NAME).await?;
        let since = match previous {
            Some(end) if now - end < self.period => {
                debug!(last_period_end = %end, "Escalation summary not due yet");
                return Ok(ReportStats::default());
            }
            Some(end) => end,
            None => now - self.period,
        };

        if !self.cursor.advance_period(REPORT_NAME, previous, now).await? {
            info!(since = %since, "Report period already claimed by another worker");
            return Ok(ReportStats::default());
        }

        let summary = self.build_summary(since, now).await?;
        let mut stats = ReportStats {
            reported: true,
            escalations: summary.total,
            companies: summary.companies.len(),
            ..ReportStats::default()
        };

        if summary.is_empty() {
            debug!("No escalations in report period; nothing to send");
            return Ok(stats);
        }

        let global = self.directory.summary_recipients(None).await?;
        self.send_all(&global, None, &summary, &mut stats).await;

        for section in &summary.companies {
            let recipients = match self
                .directory
                .summary_recipients(Some(section.company_id))
                .await
            {
                Ok(recipients) => recipients,
                Err(e) => {
                    warn!(
                        company_id = %section.company_id,
                        error = %e,
                        "Cannot resolve report recipients"
                    );
                    stats.failed += 1;
                    continue;
                }
            };
            if let Some(company_summary) = summary.for_company(section.company_id) {
                self.send_all(
                    &recipients,
                    Some(section.company_id),
                    &company_summary,
                    &mut stats,
                )
                .await;
            }
        }

        info!(
            escalations = stats.escalations,
            companies = stats.companies,
            notifications_sent = stats.notifications_sent,
            failed = stats.failed,
            "Sent escalation summary"
        );
        Ok(stats)
    }

    /// Aggregate the `escalated` rows created in `[since, until)`.
    pub async fn build_summary(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<EscalationSummary, JobError> {
        let rows = self.logs.list_since(EscalationAction::Escalated, since).await?;

        let mut tickets: HashMap<TicketId, Option<Ticket>> = HashMap::new();
        let mut builder = EscalationSummaryBuilder::new(since, until);
        for row in rows.iter().filter(|r| r.created_at < until) {
            if !tickets.contains_key(&row.ticket_id) {
                let ticket = self.tickets.get_ticket(row.ticket_id).await?;
                tickets.insert(row.ticket_id, ticket);
            }
            match tickets.get(&row.ticket_id) {
                Some(Some(ticket)) => builder.add(row, ticket),
                _ => warn!(
                    ticket_id = %row.ticket_id,
                    "Escalated ticket no longer exists; left out of summary"
                ),
            }
        }
        Ok(builder.build())
    }

    async fn send_all(
        &self,
        recipients: &[UserId],
        company_id: Option<CompanyId>,
        summary: &EscalationSummary,
        stats: &mut ReportStats,
    ) {
        for recipient in recipients {
            let notification = Notification {
                company_id,
                recipient: *recipient,
                payload: NotificationPayload::EscalationSummary(EscalationSummaryContext {
                    summary: summary.clone(),
                }),
            };
            match self.dispatcher.send(notification).await {
                Ok(()) => stats.notifications_sent += 1,
                Err(e) => {
                    warn!(
                        recipient = %recipient,
                        error = %e,
                        "Failed to dispatch escalation summary"
                    );
                    stats.failed += 1;
                }
            }
        }
    }
}
