//! Common test utilities for helpdesk-escalation integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use helpdesk_core::{CompanyId, EscalationRuleId, TicketId, UserId};
use helpdesk_db::models::{
    EscalationRule, EscalationSettingsRow, OutboxNotification, Ticket, TicketPriority,
    TicketStatus,
};
use helpdesk_escalation::notification::{DeliveryReceipt, TransportError};
use helpdesk_escalation::{
    EscalationAdminService, EscalationError, EscalationRuleCatalog, EscalationScheduler,
    EscalationSettings, EscalationSettingsResolver, InMemoryEscalationStore, Notification,
    NotificationDispatch, NotificationTransport, ResponseActivityTracker,
    TicketEscalationStateMachine,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Saturday 2024-01-06 at `hour`:00 UTC.
pub fn saturday(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 6, hour, 0, 0).unwrap()
}

/// Monday 2024-01-08 at `hour`:00 UTC.
pub fn monday(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 8, hour, 0, 0).unwrap()
}

/// Tuesday 2024-01-09 at `hour`:00 UTC.
pub fn tuesday(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 9, hour, 0, 0).unwrap()
}

/// Records every notification it is handed.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl NotificationDispatch for RecordingDispatcher {
    async fn send(&self, notification: Notification) -> helpdesk_escalation::Result<()> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

/// Rejects every notification.
pub struct FailingDispatcher;

#[async_trait::async_trait]
impl NotificationDispatch for FailingDispatcher {
    async fn send(&self, _notification: Notification) -> helpdesk_escalation::Result<()> {
        Err(EscalationError::Notification("mail relay down".to_string()))
    }
}

/// Transport that always fails to connect.
pub struct UnreachableTransport;

#[async_trait::async_trait]
impl NotificationTransport for UnreachableTransport {
    async fn deliver(
        &self,
        _notification: &OutboxNotification,
    ) -> Result<DeliveryReceipt, TransportError> {
        Err(TransportError::ConnectionFailed("connection refused".to_string()))
    }
}

/// In-memory engine wired the way the worker wires the Postgres one.
pub struct TestContext {
    pub store: InMemoryEscalationStore,
    pub recorder: Arc<RecordingDispatcher>,
    pub dispatcher: Arc<dyn NotificationDispatch>,
    pub company_id: CompanyId,
}

impl TestContext {
    pub fn new() -> Self {
        let recorder = Arc::new(RecordingDispatcher::default());
        Self {
            store: InMemoryEscalationStore::new(),
            dispatcher: recorder.clone(),
            recorder,
            company_id: CompanyId::new(),
        }
    }

    /// Context whose dispatcher fails every send.
    pub fn with_failing_dispatch() -> Self {
        Self {
            dispatcher: Arc::new(FailingDispatcher),
            ..Self::new()
        }
    }

    pub fn shared_store(&self) -> Arc<InMemoryEscalationStore> {
        Arc::new(self.store.clone())
    }

    pub fn catalog(&self) -> EscalationRuleCatalog {
        EscalationRuleCatalog::new(self.shared_store())
    }

    pub fn resolver(&self) -> EscalationSettingsResolver {
        EscalationSettingsResolver::new(self.shared_store())
    }

    pub fn state_machine(&self) -> TicketEscalationStateMachine {
        TicketEscalationStateMachine::new(self.shared_store(), self.dispatcher.clone())
    }

    pub fn scheduler(&self) -> EscalationScheduler {
        EscalationScheduler::new(
            self.shared_store(),
            self.catalog(),
            self.resolver(),
            self.state_machine(),
        )
    }

    pub fn tracker(&self) -> ResponseActivityTracker {
        ResponseActivityTracker::new(self.shared_store(), self.catalog(), self.resolver())
    }

    pub fn admin(&self) -> EscalationAdminService {
        EscalationAdminService::new(self.tracker(), self.shared_store())
    }

    /// Add an active rule for this context's company (or global when `global`).
    pub async fn add_rule(
        &self,
        global: bool,
        priority: TicketPriority,
        level: i32,
        hours: f64,
    ) -> EscalationRule {
        let rule = EscalationRule {
            id: EscalationRuleId::new(),
            company_id: (!global).then_some(self.company_id),
            priority,
            level,
            hours_to_escalate: hours,
            escalate_to: UserId::new(),
            notification_template: None,
            is_active: true,
            created_at: monday(0),
            updated_at: monday(0),
        };
        self.store.insert_rule(rule.clone()).await;
        rule
    }

    /// Store a settings row for this company derived from `settings`.
    pub async fn set_company_settings(&self, settings: EscalationSettings) {
        self.store
            .upsert_settings(settings_row(Some(self.company_id), &settings))
            .await;
    }

    /// Settings with business hours switched off.
    pub async fn around_the_clock(&self, max_level: i32) {
        self.set_company_settings(EscalationSettings {
            business_hours_only: false,
            max_escalation_level: max_level,
            ..EscalationSettings::default()
        })
        .await;
    }

    /// Insert a brand-new ticket as the ticket layer would, then notify the tracker.
    pub async fn create_ticket(
        &self,
        priority: TicketPriority,
        created_at: DateTime<Utc>,
    ) -> Ticket {
        let ticket = new_ticket(self.company_id, priority, created_at);
        self.store.upsert_ticket(ticket.clone()).await;
        self.tracker()
            .on_ticket_created(ticket.id, created_at)
            .await
            .unwrap()
            .unwrap_or(ticket)
    }

    pub async fn ticket(&self, id: TicketId) -> Ticket {
        self.store.ticket(id).await.unwrap()
    }
}

/// A ticket as persisted by the ticket layer, before the tracker saw it.
pub fn new_ticket(
    company_id: CompanyId,
    priority: TicketPriority,
    created_at: DateTime<Utc>,
) -> Ticket {
    Ticket {
        id: TicketId::new(),
        reference: format!("TCK-{}", &Uuid::new_v4().simple().to_string()[..6]),
        company_id,
        priority,
        status: TicketStatus::Open,
        created_by: UserId::new(),
        assigned_to: None,
        escalation_level: 0,
        escalation_paused: false,
        next_escalation_at: None,
        last_response_at: None,
        escalation_warning_sent: false,
        version: 0,
        created_at,
        updated_at: created_at,
    }
}

pub fn settings_row(
    company_id: Option<CompanyId>,
    settings: &EscalationSettings,
) -> EscalationSettingsRow {
    EscalationSettingsRow {
        id: Uuid::new_v4(),
        company_id,
        enabled: settings.enabled,
        business_hours_only: settings.business_hours_only,
        business_start_hour: settings.business_start_hour,
        business_end_hour: settings.business_end_hour,
        business_days: settings.business_days.clone(),
        max_escalation_level: settings.max_escalation_level,
        auto_assign_on_escalation: settings.auto_assign_on_escalation,
        pause_on_response: settings.pause_on_response,
        email_notifications: settings.email_notifications,
        created_at: monday(0),
        updated_at: monday(0),
    }
}
