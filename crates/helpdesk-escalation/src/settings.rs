//! Effective escalation settings.
//!
//! Resolution order is company row, then global row, then a synthesized
//! default. Resolution never writes: persisting the global row is the job of
//! the deployment bootstrap ([`helpdesk_db::ensure_default_settings`]).

use std::collections::HashMap;
use std::sync::Arc;

use helpdesk_core::CompanyId;
use helpdesk_db::models::{EscalationSettingsRow, NewEscalationSettings};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::store::SettingsStore;

/// Where a resolved settings value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsSource {
    Company,
    Global,
    Default,
}

/// Escalation settings as used by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationSettings {
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
    pub source: SettingsSource,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            business_hours_only: true,
            business_start_hour: 9,
            business_end_hour: 17,
            business_days: vec![1, 2, 3, 4, 5],
            max_escalation_level: 3,
            auto_assign_on_escalation: true,
            pause_on_response: true,
            email_notifications: true,
            source: SettingsSource::Default,
        }
    }
}

impl EscalationSettings {
    fn from_row(row: &EscalationSettingsRow) -> Self {
        Self {
            enabled: row.enabled,
            business_hours_only: row.business_hours_only,
            business_start_hour: row.business_start_hour,
            business_end_hour: row.business_end_hour,
            business_days: row.business_days.clone(),
            max_escalation_level: row.max_escalation_level,
            auto_assign_on_escalation: row.auto_assign_on_escalation,
            pause_on_response: row.pause_on_response,
            email_notifications: row.email_notifications,
            source: if row.company_id.is_some() {
                SettingsSource::Company
            } else {
                SettingsSource::Global
            },
        }
    }

    /// Values the bootstrap writes as the global row.
    #[must_use]
    pub fn to_new_row(&self) -> NewEscalationSettings {
        NewEscalationSettings {
            enabled: self.enabled,
            business_hours_only: self.business_hours_only,
            business_start_hour: self.business_start_hour,
            business_end_hour: self.business_end_hour,
            business_days: self.business_days.clone(),
            max_escalation_level: self.max_escalation_level,
            auto_assign_on_escalation: self.auto_assign_on_escalation,
            pause_on_response: self.pause_on_response,
            email_notifications: self.email_notifications,
        }
    }
}

/// All settings rows, loaded once and resolved in memory.
#[derive(Debug, Clone, Default)]
pub struct SettingsSnapshot {
    by_company: HashMap<CompanyId, EscalationSettings>,
    fallback: EscalationSettings,
}

impl SettingsSnapshot {
    /// Build a snapshot from raw rows. Later duplicates win.
    #[must_use]
    pub fn from_rows(rows: &[EscalationSettingsRow]) -> Self {
        let mut snapshot = Self::default();
        for row in rows {
            let settings = EscalationSettings::from_row(row);
            match row.company_id {
                Some(company_id) => {
                    snapshot.by_company.insert(company_id, settings);
                }
                None => snapshot.fallback = settings,
            }
        }
        snapshot
    }

    /// Effective settings for a company. Total: always returns a value.
    #[must_use]
    pub fn resolve(&self, company_id: CompanyId) -> &EscalationSettings {
        self.by_company.get(&company_id).unwrap_or(&self.fallback)
    }
}

/// Resolves settings for one company straight from the store.
#[derive(Clone)]
pub struct EscalationSettingsResolver {
    store: Arc<dyn SettingsStore>,
}

impl EscalationSettingsResolver {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Company row, else global row, else the synthesized default.
    ///
    /// Only store failures produce an error; a company with no rows at all
    /// still resolves.
    pub async fn resolve(&self, company_id: CompanyId) -> Result<EscalationSettings> {
        if let Some(row) = self.store.find_settings_for_company(company_id).await? {
            return Ok(EscalationSettings::from_row(&row));
        }
        if let Some(row) = self.store.find_global_settings().await? {
            return Ok(EscalationSettings::from_row(&row));
        }
        debug!(company_id = %company_id, "No settings rows; using synthesized default");
        Ok(EscalationSettings::default())
    }

    /// Load every settings row into a snapshot.
    pub async fn snapshot(&self) -> Result<SettingsSnapshot> {
        let rows = self.store.list_settings().await?;
        Ok(SettingsSnapshot::from_rows(&rows))
    }
}
