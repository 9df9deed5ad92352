//! Database models for the escalation engine.

pub mod escalation_log;
pub mod escalation_rule;
pub mod escalation_settings;
pub mod escalation_types;
pub mod notification_outbox;
pub mod report_cursor;
pub mod ticket;

pub use escalation_log::{ActionCount, EscalationLog, NewEscalationLog};
pub use escalation_rule::EscalationRule;
pub use escalation_settings::{EscalationSettingsRow, NewEscalationSettings};
pub use escalation_types::{
    EscalationAction, NotificationKind, NotificationStatus, TicketPriority, TicketStatus,
};
pub use notification_outbox::{NewOutboxNotification, OutboxNotification};
pub use report_cursor::ReportCursor;
pub use ticket::{Ticket, TicketEscalationState};
