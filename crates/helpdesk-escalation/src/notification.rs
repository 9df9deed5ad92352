//! Notification dispatch.
//!
//! The engine decides *that* someone must be told something and hands a typed
//! [`Notification`] to a [`NotificationDispatch`]. The default dispatcher only
//! writes to the outbox; delivery, retries and transports belong to
//! [`crate::jobs::NotificationOutboxWorker`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use helpdesk_core::{CompanyId, EscalationRuleId, TicketId, UserId};
use helpdesk_db::models::{NewOutboxNotification, NotificationKind, OutboxNotification};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::error::{EscalationError, Result};
use crate::report::EscalationSummary;
use crate::store::NotificationOutboxStore;

/// Why a recipient is told about an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationRecipientRole {
    /// The user the ticket was reassigned to.
    NewAssignee,
    /// The ticket creator, informational only.
    Creator,
    /// The user who owned the ticket before the escalation.
    PreviousAssignee,
}

/// Context of a pre-deadline warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationWarningContext {
    pub ticket_id: TicketId,
    pub reference: String,
    pub rule_id: EscalationRuleId,
    pub next_level: i32,
    pub escalates_to: UserId,
    pub due_at: DateTime<Utc>,
    pub minutes_remaining: i64,
}

/// Context of a completed escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketEscalatedContext {
    pub ticket_id: TicketId,
    pub reference: String,
    pub rule_id: EscalationRuleId,
    pub level: i32,
    pub role: EscalationRecipientRole,
    pub message: String,
}

/// Context of a periodic summary report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationSummaryContext {
    pub summary: EscalationSummary,
}

/// Typed notification payload; the tag doubles as the outbox `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationPayload {
    EscalationWarning(EscalationWarningContext),
    TicketEscalated(TicketEscalatedContext),
    EscalationSummary(EscalationSummaryContext),
}

impl NotificationPayload {
    #[must_use]
    pub const fn kind(&self) -> NotificationKind {
        match self {
            Self::EscalationWarning(_) => NotificationKind::EscalationWarning,
            Self::TicketEscalated(_) => NotificationKind::TicketEscalated,
            Self::EscalationSummary(_) => NotificationKind::EscalationSummary,
        }
    }
}

/// A notification addressed to one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub company_id: Option<CompanyId>,
    pub recipient: UserId,
    pub payload: NotificationPayload,
}

impl Notification {
    #[must_use]
    pub const fn kind(&self) -> NotificationKind {
        self.payload.kind()
    }
}

/// Fire-and-forget notification sink.
#[async_trait::async_trait]
pub trait NotificationDispatch: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<()>;
}

/// Dispatcher that records notifications in the outbox.
#[derive(Clone)]
pub struct OutboxDispatcher {
    outbox: Arc<dyn NotificationOutboxStore>,
}

impl OutboxDispatcher {
    pub fn new(outbox: Arc<dyn NotificationOutboxStore>) -> Self {
        Self { outbox }
    }
}

#[async_trait::async_trait]
impl NotificationDispatch for OutboxDispatcher {
    async fn send(&self, notification: Notification) -> Result<()> {
        let kind = notification.kind();
        let payload = serde_json::to_value(&notification.payload)?;
        let row = self
            .outbox
            .enqueue(NewOutboxNotification {
                company_id: notification.company_id,
                recipient: notification.recipient,
                kind,
                payload,
            })
            .await?;

        info!(
            notification_id = %row.id,
            recipient = %row.recipient,
            kind = %kind,
            "Notification queued"
        );
        Ok(())
    }
}

/// Where summary reports go.
#[async_trait::async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Recipients of the summary for `company`, or of the global report when `None`.
    async fn summary_recipients(&self, company_id: Option<CompanyId>) -> Result<Vec<UserId>>;
}

/// Fixed recipient lists, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticRecipientDirectory {
    global: Vec<UserId>,
    per_company: HashMap<CompanyId, Vec<UserId>>,
}

impl StaticRecipientDirectory {
    #[must_use]
    pub fn new(global: Vec<UserId>) -> Self {
        Self {
            global,
            per_company: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_company(mut self, company_id: CompanyId, recipients: Vec<UserId>) -> Self {
        self.per_company.insert(company_id, recipients);
        self
    }
}

#[async_trait::async_trait]
impl RecipientDirectory for StaticRecipientDirectory {
    async fn summary_recipients(&self, company_id: Option<CompanyId>) -> Result<Vec<UserId>> {
        Ok(match company_id {
            None => self.global.clone(),
            Some(id) => self.per_company.get(&id).cloned().unwrap_or_default(),
        })
    }
}

/// Delivery failure reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Delivery timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub latency_ms: u64,
}

/// Delivers an outbox row to the outside world.
#[async_trait::async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn deliver(
        &self,
        notification: &OutboxNotification,
    ) -> std::result::Result<DeliveryReceipt, TransportError>;
}

/// Default webhook timeout.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON body posted by [`WebhookTransport`].
#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    id: &'a helpdesk_core::NotificationId,
    company_id: Option<CompanyId>,
    recipient: UserId,
    kind: NotificationKind,
    payload: &'a serde_json::Value,
    created_at: DateTime<Utc>,
}

/// POSTs each notification as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    url: String,
    client: reqwest::Client,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .user_agent(concat!("helpdesk-escalation/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EscalationError::Notification(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl NotificationTransport for WebhookTransport {
    async fn deliver(
        &self,
        notification: &OutboxNotification,
    ) -> std::result::Result<DeliveryReceipt, TransportError> {
        let start = Instant::now();
        let body = WebhookBody {
            id: &notification.id,
            company_id: notification.company_id,
            recipient: notification.recipient,
            kind: notification.kind,
            payload: &notification.payload,
            created_at: notification.created_at,
        };

        let response = self
            .client
            .post(&self.url)
            .header("X-Notification-Id", notification.id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(format!("Webhook timeout after {WEBHOOK_TIMEOUT:?}"))
                } else if e.is_connect() {
                    TransportError::ConnectionFailed(format!(
                        "Webhook connect to {} failed: {e}",
                        self.url
                    ))
                } else {
                    TransportError::SendFailed(e.to_string())
                }
            })?;

        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let status = response.status();
        if status.is_success() {
            Ok(DeliveryReceipt { latency_ms })
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Writes each notification to the log instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTransport;

#[async_trait::async_trait]
impl NotificationTransport for LoggingTransport {
    async fn deliver(
        &self,
        notification: &OutboxNotification,
    ) -> std::result::Result<DeliveryReceipt, TransportError> {
        info!(
            target: "notifications",
            notification_id = %notification.id,
            recipient = %notification.recipient,
            kind = %notification.kind,
            payload = %notification.payload,
            "Notification delivered to log"
        );
        Ok(DeliveryReceipt { latency_ms: 0 })
    }
}
