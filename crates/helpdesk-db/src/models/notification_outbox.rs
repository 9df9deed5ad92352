//! Notification outbox model.
//!
//! Escalation decisions enqueue rows here; the delivery worker claims due rows,
//! hands them to a transport and records the outcome.

use chrono::{DateTime, Utc};
use helpdesk_core::{CompanyId, NotificationId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use super::{NotificationKind, NotificationStatus};

/// A queued notification.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct OutboxNotification {
    pub id: NotificationId,
    pub company_id: Option<CompanyId>,
    pub recipient: UserId,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub status: NotificationStatus,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Input for enqueuing a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxNotification {
    pub company_id: Option<CompanyId>,
    pub recipient: UserId,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
}

impl OutboxNotification {
    /// Enqueue a pending notification, due immediately.
    pub async fn enqueue(
        pool: &PgPool,
        input: &NewOutboxNotification,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO notification_outbox (company_id, recipient, kind, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(input.company_id)
        .bind(input.recipient)
        .bind(input.kind)
        .bind(&input.payload)
        .fetch_one(pool)
        .await
    }

    /// Claim due pending rows by pushing their `next_attempt_at` out by `lease`.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent workers claim disjoint rows.
    pub async fn claim_due(
        pool: &PgPool,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE notification_outbox
            SET next_attempt_at = $2
            WHERE id IN (
                SELECT id FROM notification_outbox
                WHERE status = 'pending'
                  AND next_attempt_at <= $1
                ORDER BY next_attempt_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            ",
        )
        .bind(now)
        .bind(lease_until)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Record a successful delivery.
    pub async fn mark_sent(
        pool: &PgPool,
        id: NotificationId,
        attempts: i32,
        sent_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE notification_outbox
            SET status = 'sent', attempts = $2, sent_at = $3, last_error = NULL
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(attempts)
        .bind(sent_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt that will be retried at `next_attempt_at`.
    pub async fn mark_retry(
        pool: &PgPool,
        id: NotificationId,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE notification_outbox
            SET attempts = $2, next_attempt_at = $3, last_error = $4
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Give up on a notification.
    pub async fn mark_failed(
        pool: &PgPool,
        id: NotificationId,
        attempts: i32,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE notification_outbox
            SET status = 'failed', attempts = $2, last_error = $3
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }
}
