//! Deployment bootstrap.
//!
//! Persists the global escalation settings row once, at deployment time, so
//! that reads never have to create it. Safe to run from several instances at
//! the same time: the work happens under a PostgreSQL advisory lock and the
//! insert itself is `ON CONFLICT DO NOTHING`.

use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, instrument};

use crate::models::{EscalationSettingsRow, NewEscalationSettings};

/// Advisory lock key for bootstrap operations ("HELPDESK" in ASCII).
const BOOTSTRAP_LOCK_KEY: i64 = 0x4845_4C50_4445_534B;

/// Errors that can occur during the bootstrap process.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Failed to acquire bootstrap lock: {0}")]
    LockAcquisition(#[source] sqlx::Error),

    #[error("Failed to release bootstrap lock: {0}")]
    LockRelease(#[source] sqlx::Error),

    #[error("Failed to insert global escalation settings: {0}")]
    SettingsCreation(#[source] sqlx::Error),
}

/// Insert the global escalation settings row if it does not exist yet.
///
/// Returns `true` when the row was created by this call.
#[instrument(skip(pool, defaults))]
pub async fn ensure_default_settings(
    pool: &PgPool,
    defaults: &NewEscalationSettings,
) -> Result<bool, BootstrapError> {
    let mut conn = pool.acquire().await.map_err(BootstrapError::LockAcquisition)?;

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(BOOTSTRAP_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .map_err(BootstrapError::LockAcquisition)?;

    let outcome = EscalationSettingsRow::insert_global_if_missing(pool, defaults)
        .await
        .map_err(BootstrapError::SettingsCreation);

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(BOOTSTRAP_LOCK_KEY)
        .execute(&mut *conn)
        .await
        .map_err(BootstrapError::LockRelease)?;

    let created = outcome?;
    if created {
        info!("bootstrap.settings.created: Global escalation settings inserted");
    } else {
        info!("bootstrap.settings.exists: Global escalation settings already present");
    }

    Ok(created)
}
