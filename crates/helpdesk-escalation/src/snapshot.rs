//! Per-cycle configuration snapshot.

use crate::catalog::{EscalationRuleCatalog, RuleSnapshot};
use crate::error::Result;
use crate::settings::{EscalationSettingsResolver, SettingsSnapshot};

/// Rules and settings read once and shared by every ticket of a cycle.
#[derive(Debug, Clone, Default)]
pub struct EscalationConfig {
    pub settings: SettingsSnapshot,
    pub rules: RuleSnapshot,
}

impl EscalationConfig {
    /// Read all active rules and all settings rows.
    pub async fn load(
        catalog: &EscalationRuleCatalog,
        resolver: &EscalationSettingsResolver,
    ) -> Result<Self> {
        let rules = catalog.snapshot().await?;
        let settings = resolver.snapshot().await?;
        tracing::debug!(rules = rules.len(), "Loaded escalation configuration");
        Ok(Self { settings, rules })
    }
}
