//! Escalation rule lookup.

use std::collections::HashMap;
use std::sync::Arc;

use helpdesk_core::CompanyId;
use helpdesk_db::models::{EscalationRule, Ticket, TicketPriority};

use crate::error::Result;
use crate::store::RuleStore;

type RuleKey = (Option<CompanyId>, TicketPriority, i32);

/// Active rules loaded once per scheduler cycle.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    rules: HashMap<RuleKey, EscalationRule>,
}

impl RuleSnapshot {
    /// Index active rules by `(company, priority, level)`.
    #[must_use]
    pub fn from_rules(rules: Vec<EscalationRule>) -> Self {
        let rules = rules
            .into_iter()
            .filter(|rule| rule.is_active)
            .map(|rule| ((rule.company_id, rule.priority, rule.level), rule))
            .collect();
        Self { rules }
    }

    /// Company rule for the triple, else the global one.
    #[must_use]
    pub fn find(
        &self,
        company_id: CompanyId,
        priority: TicketPriority,
        level: i32,
    ) -> Option<&EscalationRule> {
        self.rules
            .get(&(Some(company_id), priority, level))
            .or_else(|| self.rules.get(&(None, priority, level)))
    }

    /// Rule that would take `ticket` to `level`.
    #[must_use]
    pub fn find_for_ticket(&self, ticket: &Ticket, level: i32) -> Option<&EscalationRule> {
        self.find(ticket.company_id, ticket.priority, level)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Read-only rule lookup against the store.
#[derive(Clone)]
pub struct EscalationRuleCatalog {
    store: Arc<dyn RuleStore>,
}

impl EscalationRuleCatalog {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    /// Rule that would take `ticket` to `level`, if any.
    ///
    /// A missing rule is not an error; it means "do not escalate further".
    pub async fn find_rule(&self, ticket: &Ticket, level: i32) -> Result<Option<EscalationRule>> {
        self.store
            .find_active_rule(ticket.company_id, ticket.priority, level)
            .await
    }

    /// Load all active rules.
    pub async fn snapshot(&self) -> Result<RuleSnapshot> {
        let rules = self.store.list_active_rules().await?;
        Ok(RuleSnapshot::from_rules(rules))
    }
}
