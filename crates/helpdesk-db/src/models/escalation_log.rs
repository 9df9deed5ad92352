//! Escalation log model.
//!
//! Append-only: rows are inserted inside the same transaction as the ticket
//! update they describe and are never updated afterwards.

use chrono::{DateTime, Utc};
use helpdesk_core::{CompanyId, EscalationLogId, EscalationRuleId, TicketId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use super::EscalationAction;

/// An escalation log row.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct EscalationLog {
    pub id: EscalationLogId,
    pub ticket_id: TicketId,
    pub company_id: CompanyId,
    pub escalation_rule_id: Option<EscalationRuleId>,
    pub action: EscalationAction,
    pub from_user: Option<UserId>,
    pub to_user: Option<UserId>,
    pub level: i32,
    pub notes: String,
    pub created_at: DateTime<Utc>,

    /// `None` means the system initiated the transition.
    pub created_by: Option<UserId>,
}

/// Input for appending a log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEscalationLog {
    pub ticket_id: TicketId,
    pub company_id: CompanyId,
    pub escalation_rule_id: Option<EscalationRuleId>,
    pub action: EscalationAction,
    pub from_user: Option<UserId>,
    pub to_user: Option<UserId>,
    pub level: i32,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<UserId>,
}

/// Number of log rows per action.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ActionCount {
    pub action: EscalationAction,
    pub count: i64,
}

impl EscalationLog {
    /// Append a row.
    pub async fn insert(
        conn: &mut PgConnection,
        input: &NewEscalationLog,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO escalation_logs (
                ticket_id, company_id, escalation_rule_id, action, from_user,
                to_user, level, notes, created_at, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            ",
        )
        .bind(input.ticket_id)
        .bind(input.company_id)
        .bind(input.escalation_rule_id)
        .bind(input.action)
        .bind(input.from_user)
        .bind(input.to_user)
        .bind(input.level)
        .bind(&input.notes)
        .bind(input.created_at)
        .bind(input.created_by)
        .fetch_one(&mut *conn)
        .await
    }

    /// History of one ticket, newest first.
    pub async fn list_for_ticket(
        pool: &PgPool,
        ticket_id: TicketId,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM escalation_logs
            WHERE ticket_id = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(ticket_id)
        .fetch_all(pool)
        .await
    }

    /// Rows of one action created at or after `since`, newest first.
    pub async fn list_since(
        pool: &PgPool,
        action: EscalationAction,
        since: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM escalation_logs
            WHERE action = $1
              AND created_at >= $2
            ORDER BY created_at DESC
            ",
        )
        .bind(action)
        .bind(since)
        .fetch_all(pool)
        .await
    }

    /// Count rows per action created at or after `since`.
    pub async fn count_by_action_since(
        pool: &PgPool,
        company_id: Option<CompanyId>,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActionCount>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT action, COUNT(*) AS count FROM escalation_logs
            WHERE created_at >= $2
              AND ($1::uuid IS NULL OR company_id = $1)
            GROUP BY action
            ",
        )
        .bind(company_id)
        .bind(since)
        .fetch_all(pool)
        .await
    }
}
