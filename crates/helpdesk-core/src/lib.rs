//! # helpdesk-core
//!
//! Strongly typed identifiers shared by every helpdesk crate.
//!
//! Each identifier is a newtype over [`uuid::Uuid`], so a `TicketId` can never be
//! handed to a function that expects a `UserId`. The types are transparent to
//! serde and to sqlx, which lets them appear directly in row structs and in
//! JSON notification payloads.

pub mod ids;

pub use ids::{
    CompanyId, EscalationLogId, EscalationRuleId, NotificationId, ParseIdError, TicketId, UserId,
};
