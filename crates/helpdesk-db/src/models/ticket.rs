//! Ticket model (escalation columns).
//!
//! Tickets are created and edited by the ticket subsystem. This module reads
//! whole rows but only ever writes the escalation-owned columns, always behind
//! the `version` guard so concurrent writers cannot overwrite each other.

use chrono::{DateTime, Utc};
use helpdesk_core::{CompanyId, TicketId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use super::{TicketPriority, TicketStatus};

/// A helpdesk ticket as seen by the escalation engine.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,

    /// Unique human-readable reference such as `TCK-2024-0042`.
    pub reference: String,

    pub company_id: CompanyId,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub created_by: UserId,
    pub assigned_to: Option<UserId>,

    /// Number of times the ticket has been escalated (0 = never).
    pub escalation_level: i32,

    pub escalation_paused: bool,

    /// When the ticket becomes due; always NULL while paused, cleared once terminal.
    pub next_escalation_at: Option<DateTime<Utc>>,

    /// Anchor for the next deadline.
    pub last_response_at: Option<DateTime<Utc>>,

    /// Set once a pre-deadline warning went out for the current deadline.
    pub escalation_warning_sent: bool,

    /// Optimistic concurrency token, bumped by a trigger on every update.
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The escalation-owned columns of a ticket, written as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketEscalationState {
    pub assigned_to: Option<UserId>,
    pub escalation_level: i32,
    pub escalation_paused: bool,
    pub next_escalation_at: Option<DateTime<Utc>>,
    pub last_response_at: Option<DateTime<Utc>>,
    pub escalation_warning_sent: bool,
}

impl Ticket {
    /// Snapshot of the escalation-owned columns.
    #[must_use]
    pub fn escalation_state(&self) -> TicketEscalationState {
        TicketEscalationState {
            assigned_to: self.assigned_to,
            escalation_level: self.escalation_level,
            escalation_paused: self.escalation_paused,
            next_escalation_at: self.next_escalation_at,
            last_response_at: self.last_response_at,
            escalation_warning_sent: self.escalation_warning_sent,
        }
    }

    /// Find a ticket by ID.
    pub async fn find_by_id(pool: &PgPool, id: TicketId) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM tickets
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Find tickets whose escalation deadline has elapsed.
    pub async fn find_due(
        pool: &PgPool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM tickets
            WHERE status IN ('OPEN', 'IN_PROGRESS')
              AND escalation_paused = FALSE
              AND next_escalation_at IS NOT NULL
              AND next_escalation_at <= $1
            ORDER BY next_escalation_at ASC, id ASC
            ",
        )
        .bind(now)
        .fetch_all(pool)
        .await
    }

    /// Find active, unpaused tickets without a scheduled deadline.
    pub async fn find_unscheduled(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM tickets
            WHERE status IN ('OPEN', 'IN_PROGRESS')
              AND escalation_paused = FALSE
              AND next_escalation_at IS NULL
            ORDER BY created_at ASC, id ASC
            ",
        )
        .fetch_all(pool)
        .await
    }

    /// Find tickets that become due within `(now, horizon]` and were not warned yet.
    pub async fn find_approaching_deadline(
        pool: &PgPool,
        now: DateTime<Utc>,
        horizon: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM tickets
            WHERE status IN ('OPEN', 'IN_PROGRESS')
              AND escalation_paused = FALSE
              AND escalation_warning_sent = FALSE
              AND next_escalation_at > $1
              AND next_escalation_at <= $2
            ORDER BY next_escalation_at ASC
            ",
        )
        .bind(now)
        .bind(horizon)
        .fetch_all(pool)
        .await
    }

    /// Write the escalation columns if the row still carries `expected_version`.
    ///
    /// Returns `None` when another writer got there first.
    pub async fn update_escalation_if_version_matches(
        conn: &mut PgConnection,
        id: TicketId,
        expected_version: i64,
        state: &TicketEscalationState,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE tickets
            SET assigned_to = $3,
                escalation_level = $4,
                escalation_paused = $5,
                next_escalation_at = $6,
                last_response_at = $7,
                escalation_warning_sent = $8,
                updated_at = NOW()
            WHERE id = $1
              AND version = $2
            RETURNING *
            ",
        )
        .bind(id)
        .bind(expected_version)
        .bind(state.assigned_to)
        .bind(state.escalation_level)
        .bind(state.escalation_paused)
        .bind(state.next_escalation_at)
        .bind(state.last_response_at)
        .bind(state.escalation_warning_sent)
        .fetch_optional(&mut *conn)
        .await
    }
}
