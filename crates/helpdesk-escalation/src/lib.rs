//! Ticket escalation engine for the helpdesk.
//!
//! Unanswered tickets move up a ladder of responders according to per-company
//! (or global) rules, honouring each company's business hours:
//!
//! - [`BusinessCalendar`] decides when deadlines may fire
//! - [`EscalationRuleCatalog`] and [`EscalationSettingsResolver`] read configuration
//! - [`TicketEscalationStateMachine`] escalates one due ticket
//! - [`EscalationScheduler`] runs periodic cycles over all due tickets
//! - [`ResponseActivityTracker`] pauses, resumes and re-arms on ticket activity
//! - [`EscalationAdminService`] exposes manual pause/resume/reset
//! - [`jobs`] hosts the warning, summary and outbox-delivery jobs
//!
//! Every ticket write is version-guarded, so concurrent schedulers and
//! activity events never double-escalate or overwrite each other.

pub mod admin;
pub mod calendar;
pub mod catalog;
pub mod error;
pub mod jobs;
pub mod notification;
pub mod report;
pub mod scheduler;
pub mod settings;
pub mod snapshot;
pub mod state_machine;
pub mod store;
pub mod tracker;

pub use admin::{AdminScope, EscalationAdminService};
pub use calendar::BusinessCalendar;
pub use catalog::{EscalationRuleCatalog, RuleSnapshot};
pub use error::{CalendarError, EscalationError, Result};
pub use notification::{
    LoggingTransport, Notification, NotificationDispatch, NotificationPayload,
    NotificationTransport, OutboxDispatcher, RecipientDirectory, StaticRecipientDirectory,
    WebhookTransport,
};
pub use report::{EscalationStats, EscalationSummary};
pub use scheduler::{CycleReport, EscalationScheduler};
pub use settings::{EscalationSettings, EscalationSettingsResolver, SettingsSource};
pub use snapshot::EscalationConfig;
pub use state_machine::{compute_next_deadline, EscalationOutcome, TicketEscalationStateMachine};
pub use store::{InMemoryEscalationStore, PgEscalationStore, TicketTransition};
pub use tracker::{ResponseActivityTracker, TicketMessage};
