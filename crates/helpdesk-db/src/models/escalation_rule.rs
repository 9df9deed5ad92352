//! Escalation rule model.
//!
//! A rule maps `(company, priority, level)` to an hours threshold and a target
//! assignee. Rows with a NULL `company_id` are global fallbacks.

use chrono::{DateTime, Utc};
use helpdesk_core::{CompanyId, EscalationRuleId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use super::TicketPriority;

/// An escalation rule row.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct EscalationRule {
    pub id: EscalationRuleId,

    /// Owning company, or `None` for a global rule.
    pub company_id: Option<CompanyId>,

    pub priority: TicketPriority,

    /// Level this rule escalates a ticket *to* (1-based).
    pub level: i32,

    /// Hours without response before the ticket escalates.
    pub hours_to_escalate: f64,

    /// User who takes over the ticket at this level.
    pub escalate_to: UserId,

    /// Optional message sent to the new assignee.
    pub notification_template: Option<String>,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscalationRule {
    /// Find the active rule for a triple, preferring the company rule over the global one.
    pub async fn find_active(
        pool: &PgPool,
        company_id: CompanyId,
        priority: TicketPriority,
        level: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM escalation_rules
            WHERE priority = $2
              AND level = $3
              AND is_active = TRUE
              AND (company_id = $1 OR company_id IS NULL)
            ORDER BY company_id NULLS LAST
            LIMIT 1
            ",
        )
        .bind(company_id)
        .bind(priority)
        .bind(level)
        .fetch_optional(pool)
        .await
    }

    /// List every active rule, company and global alike.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM escalation_rules
            WHERE is_active = TRUE
            ORDER BY company_id NULLS FIRST, priority, level
            ",
        )
        .fetch_all(pool)
        .await
    }
}
