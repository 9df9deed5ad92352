//! Escalation reporting: the periodic summary and dashboard statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use helpdesk_core::{CompanyId, TicketId, UserId};
use helpdesk_db::models::{ActionCount, EscalationAction, EscalationLog, Ticket, TicketPriority};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::EscalationLogStore;

/// One escalated ticket in a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalatedTicketLine {
    pub ticket_id: TicketId,
    pub reference: String,
    pub priority: TicketPriority,
    pub level: i32,
    pub escalated_to: Option<UserId>,
    pub escalated_at: DateTime<Utc>,
}

/// Escalations of one company within the report period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanySummary {
    pub company_id: CompanyId,
    pub total: usize,
    pub by_level: BTreeMap<i32, usize>,
    pub by_priority: BTreeMap<TicketPriority, usize>,
    /// Oldest first.
    pub tickets: Vec<EscalatedTicketLine>,
}

impl CompanySummary {
    fn new(company_id: CompanyId) -> Self {
        Self {
            company_id,
            total: 0,
            by_level: BTreeMap::new(),
            by_priority: BTreeMap::new(),
            tickets: Vec::new(),
        }
    }
}

/// Escalations over a period, overall and per company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSummary {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total: usize,
    pub by_level: BTreeMap<i32, usize>,
    pub by_priority: BTreeMap<TicketPriority, usize>,
    /// Ordered by company id.
    pub companies: Vec<CompanySummary>,
}

impl EscalationSummary {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    #[must_use]
    pub fn company(&self, company_id: CompanyId) -> Option<&CompanySummary> {
        self.companies.iter().find(|c| c.company_id == company_id)
    }

    /// The same period restricted to one company.
    #[must_use]
    pub fn for_company(&self, company_id: CompanyId) -> Option<Self> {
        let section = self.company(company_id)?.clone();
        Some(Self {
            period_start: self.period_start,
            period_end: self.period_end,
            total: section.total,
            by_level: section.by_level.clone(),
            by_priority: section.by_priority.clone(),
            companies: vec![section],
        })
    }
}

/// Accumulates `escalated` log rows into an [`EscalationSummary`].
#[derive(Debug)]
pub struct EscalationSummaryBuilder {
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    companies: BTreeMap<CompanyId, CompanySummary>,
}

impl EscalationSummaryBuilder {
    #[must_use]
    pub fn new(period_start: DateTime<Utc>, period_end: DateTime<Utc>) -> Self {
        Self {
            period_start,
            period_end,
            companies: BTreeMap::new(),
        }
    }

    /// Count one log row. Rows outside the period or with another action are ignored.
    pub fn add(&mut self, log: &EscalationLog, ticket: &Ticket) {
        if log.action != EscalationAction::Escalated
            || log.created_at < self.period_start
            || log.created_at > self.period_end
        {
            return;
        }

        let section = self
            .companies
            .entry(log.company_id)
            .or_insert_with(|| CompanySummary::new(log.company_id));
        section.total += 1;
        *section.by_level.entry(log.level).or_default() += 1;
        *section.by_priority.entry(ticket.priority).or_default() += 1;
        section.tickets.push(EscalatedTicketLine {
            ticket_id: ticket.id,
            reference: ticket.reference.clone(),
            priority: ticket.priority,
            level: log.level,
            escalated_to: log.to_user,
            escalated_at: log.created_at,
        });
    }

    #[must_use]
    pub fn build(self) -> EscalationSummary {
        let mut total = 0;
        let mut by_level = BTreeMap::new();
        let mut by_priority = BTreeMap::new();
        let mut companies = Vec::with_capacity(self.companies.len());

        for (_, mut section) in self.companies {
            total += section.total;
            for (level, count) in &section.by_level {
                *by_level.entry(*level).or_default() += count;
            }
            for (priority, count) in &section.by_priority {
                *by_priority.entry(*priority).or_default() += count;
            }
            section.tickets.sort_by_key(|line| line.escalated_at);
            companies.push(section);
        }

        EscalationSummary {
            period_start: self.period_start,
            period_end: self.period_end,
            total,
            by_level,
            by_priority,
            companies,
        }
    }
}

/// Escalation counts for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationStats {
    pub escalated_last_24h: i64,
    pub escalated_last_7d: i64,
    pub escalated_last_30d: i64,
    /// Every action over the last 30 days.
    pub by_action: BTreeMap<String, i64>,
}

impl EscalationStats {
    /// Collect counts for one company, or across all companies when `None`.
    pub async fn collect(
        logs: &dyn EscalationLogStore,
        company_id: Option<CompanyId>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let escalated = |counts: &[ActionCount]| {
            counts
                .iter()
                .filter(|c| c.action == EscalationAction::Escalated)
                .map(|c| c.count)
                .sum::<i64>()
        };

        let day = logs
            .count_by_action_since(company_id, now - Duration::hours(24))
            .await?;
        let week = logs
            .count_by_action_since(company_id, now - Duration::days(7))
            .await?;
        let month = logs
            .count_by_action_since(company_id, now - Duration::days(30))
            .await?;

        let by_action = month
            .iter()
            .map(|c| (c.action.as_str().to_string(), c.count))
            .collect();

        Ok(Self {
            escalated_last_24h: escalated(&day),
            escalated_last_7d: escalated(&week),
            escalated_last_30d: escalated(&month),
            by_action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use helpdesk_core::EscalationLogId;
    use helpdesk_db::models::TicketStatus;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, hour, 0, 0).unwrap()
    }

    fn ticket(company_id: CompanyId, priority: TicketPriority, reference: &str) -> Ticket {
        Ticket {
            id: TicketId::new(),
            reference: reference.to_string(),
            company_id,
            priority,
            status: TicketStatus::Open,
            created_by: UserId::new(),
            assigned_to: None,
            escalation_level: 1,
            escalation_paused: false,
            next_escalation_at: None,
            last_response_at: None,
            escalation_warning_sent: false,
            version: 1,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    fn log(
        ticket: &Ticket,
        action: EscalationAction,
        level: i32,
        created_at: DateTime<Utc>,
    ) -> EscalationLog {
        EscalationLog {
            id: EscalationLogId::new(),
            ticket_id: ticket.id,
            company_id: ticket.company_id,
            escalation_rule_id: None,
            action,
            from_user: None,
            to_user: Some(UserId::new()),
            level,
            notes: String::new(),
            created_at,
            created_by: None,
        }
    }

    #[test]
    fn test_summary_groups_by_company_level_and_priority() {
        let acme = CompanyId::new();
        let globex = CompanyId::new();
        let a1 = ticket(acme, TicketPriority::High, "TCK-1");
        let a2 = ticket(acme, TicketPriority::Low, "TCK-2");
        let g1 = ticket(globex, TicketPriority::High, "TCK-3");

        let mut builder = EscalationSummaryBuilder::new(at(0), at(23));
        builder.add(&log(&a2, EscalationAction::Escalated, 2, at(12)), &a2);
        builder.add(&log(&a1, EscalationAction::Escalated, 1, at(10)), &a1);
        builder.add(&log(&g1, EscalationAction::Escalated, 1, at(11)), &g1);
        let summary = builder.build();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_level.get(&1), Some(&2));
        assert_eq!(summary.by_level.get(&2), Some(&1));
        assert_eq!(summary.by_priority.get(&TicketPriority::High), Some(&2));

        let acme_section = summary.company(acme).unwrap();
        assert_eq!(acme_section.total, 2);
        let references: Vec<_> = acme_section
            .tickets
            .iter()
            .map(|l| l.reference.as_str())
            .collect();
        assert_eq!(references, vec!["TCK-1", "TCK-2"]);
    }

    #[test]
    fn test_summary_ignores_other_actions_and_out_of_period_rows() {
        let company = CompanyId::new();
        let t = ticket(company, TicketPriority::Medium, "TCK-9");

        let mut builder = EscalationSummaryBuilder::new(at(6), at(18));
        builder.add(&log(&t, EscalationAction::Paused, 1, at(10)), &t);
        builder.add(&log(&t, EscalationAction::Escalated, 1, at(5)), &t);
        let summary = builder.build();

        assert!(summary.is_empty());
        assert!(summary.companies.is_empty());
    }

    #[test]
    fn test_for_company_restricts_totals() {
        let acme = CompanyId::new();
        let globex = CompanyId::new();
        let a = ticket(acme, TicketPriority::High, "TCK-1");
        let g = ticket(globex, TicketPriority::Low, "TCK-2");

        let mut builder = EscalationSummaryBuilder::new(at(0), at(23));
        builder.add(&log(&a, EscalationAction::Escalated, 1, at(9)), &a);
        builder.add(&log(&g, EscalationAction::Escalated, 3, at(9)), &g);
        let summary = builder.build();

        let only_globex = summary.for_company(globex).unwrap();
        assert_eq!(only_globex.total, 1);
        assert_eq!(only_globex.companies.len(), 1);
        assert_eq!(only_globex.by_level.get(&3), Some(&1));
        assert!(summary.for_company(CompanyId::new()).is_none());
    }
}
