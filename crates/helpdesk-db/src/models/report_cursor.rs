//! Report cursor model.
//!
//! Remembers where the last run of a periodic report stopped. Advancing is a
//! compare-and-set on the previous `period_end`, so when several workers race
//! for the same period exactly one of them gets `true`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

/// Progress of one named report.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ReportCursor {
    pub report: String,
    pub period_end: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportCursor {
    /// Find the cursor of `report`, if it ever ran.
    pub async fn find(pool: &PgPool, report: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM report_cursor
            WHERE report = $1
            ",
        )
        .bind(report)
        .fetch_optional(pool)
        .await
    }

    /// Move `report` from `previous` to `period_end`.
    ///
    /// `previous = None` claims the first period. Returns `false` when the
    /// cursor is no longer at `previous`.
    pub async fn advance(
        pool: &PgPool,
        report: &str,
        previous: Option<DateTime<Utc>>,
        period_end: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = match previous {
            None => {
                sqlx::query(
                    r"
                    INSERT INTO report_cursor (report, period_end)
                    VALUES ($1, $2)
                    ON CONFLICT (report) DO NOTHING
                    ",
                )
                .bind(report)
                .bind(period_end)
                .execute(pool)
                .await?
            }
            Some(previous) => {
                sqlx::query(
                    r"
                    UPDATE report_cursor
                    SET period_end = $3, updated_at = NOW()
                    WHERE report = $1
                      AND period_end = $2
                    ",
                )
                .bind(report)
                .bind(previous)
                .bind(period_end)
                .execute(pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }
}
