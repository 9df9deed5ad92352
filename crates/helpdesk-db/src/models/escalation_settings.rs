//! Escalation settings model.
//!
//! One optional row per company plus a single global row (`company_id IS NULL`).

use chrono::{DateTime, Utc};
use helpdesk_core::CompanyId;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// An escalation settings row.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct EscalationSettingsRow {
    pub id: Uuid,
    pub company_id: Option<CompanyId>,
    pub enabled: bool,
    pub business_hours_only: bool,
    pub business_start_hour: i32,
    pub business_end_hour: i32,

    /// ISO weekday numbers, 1 = Monday through 7 = Sunday.
    pub business_days: Vec<i32>,

    pub max_escalation_level: i32,
    pub auto_assign_on_escalation: bool,
    pub pause_on_response: bool,
    pub email_notifications: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for a new settings row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEscalationSettings {
    pub enabled: bool,
    pub business_hours_only: bool,
    pub business_start_hour: i32,
    pub business_end_hour: i32,
    pub business_days: Vec<i32>,
    pub max_escalation_level: i32,
    pub auto_assign_on_escalation: bool,
    pub pause_on_response: bool,
    pub email_notifications: bool,
}

impl EscalationSettingsRow {
    /// Find the row owned by a company.
    pub async fn find_for_company(
        pool: &PgPool,
        company_id: CompanyId,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM escalation_settings
            WHERE company_id = $1
            ",
        )
        .bind(company_id)
        .fetch_optional(pool)
        .await
    }

    /// Find the global row.
    pub async fn find_global(pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM escalation_settings
            WHERE company_id IS NULL
            ",
        )
        .fetch_optional(pool)
        .await
    }

    /// List all settings rows.
    pub async fn list_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM escalation_settings
            ORDER BY company_id NULLS FIRST
            ",
        )
        .fetch_all(pool)
        .await
    }

    /// Insert the global row unless one already exists.
    ///
    /// Returns `true` when a row was inserted.
    pub async fn insert_global_if_missing(
        pool: &PgPool,
        input: &NewEscalationSettings,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            INSERT INTO escalation_settings (
                company_id, enabled, business_hours_only, business_start_hour,
                business_end_hour, business_days, max_escalation_level,
                auto_assign_on_escalation, pause_on_response, email_notifications
            )
            VALUES (NULL, $1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT ((company_id IS NULL)) WHERE company_id IS NULL DO NOTHING
            ",
        )
        .bind(input.enabled)
        .bind(input.business_hours_only)
        .bind(input.business_start_hour)
        .bind(input.business_end_hour)
        .bind(&input.business_days)
        .bind(input.max_escalation_level)
        .bind(input.auto_assign_on_escalation)
        .bind(input.pause_on_response)
        .bind(input.email_notifications)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
