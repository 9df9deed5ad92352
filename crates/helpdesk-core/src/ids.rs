//! Strongly Typed Identifiers
//!
//! Using the newtype pattern, these types prevent a ticket id from being
//! passed where a company or user id is expected.
//!
//! # Example
//!
//! ```
//! use helpdesk_core::{CompanyId, TicketId};
//!
//! let company = CompanyId::new();
//! let ticket = TicketId::new();
//!
//! fn requires_company(id: CompanyId) -> String {
//!     id.to_string()
//! }
//!
//! let result = requires_company(company);
//! // requires_company(ticket); // This would not compile!
//! # let _ = (result, ticket);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying UUID parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Defines a UUID-backed identifier that is transparent to serde and sqlx.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
            sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Consumes the ID and returns the underlying UUID.
            #[must_use]
            pub const fn into_uuid(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }
    };
}

define_id!(
    /// Identifier of a company, the tenant boundary of the helpdesk.
    ///
    /// ```
    /// use helpdesk_core::CompanyId;
    /// use uuid::Uuid;
    ///
    /// let uuid = Uuid::new_v4();
    /// let company = CompanyId::from_uuid(uuid);
    /// assert_eq!(company.as_uuid(), &uuid);
    /// ```
    CompanyId
);

define_id!(
    /// Identifier of a user (agent, admin or ticket creator).
    UserId
);

define_id!(
    /// Identifier of a ticket.
    TicketId
);

define_id!(
    /// Identifier of an escalation rule.
    EscalationRuleId
);

define_id!(
    /// Identifier of an escalation log entry.
    EscalationLogId
);

define_id!(
    /// Identifier of a queued notification in the outbox.
    NotificationId
);
