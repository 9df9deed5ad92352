//! Error types for the helpdesk-db crate.

use thiserror::Error;

/// Database operation errors.
///
/// ```rust
/// use helpdesk_db::DbError;
///
/// fn describe(err: &DbError) -> &'static str {
///     match err {
///         DbError::ConnectionFailed(_) => "connection",
///         DbError::MigrationFailed(_) => "migration",
///         DbError::QueryFailed(_) => "query",
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to establish or acquire a database connection.
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[source] sqlx::Error),

    /// A database migration failed to apply.
    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    /// A database query failed to execute.
    #[error("Query failed: {0}")]
    QueryFailed(#[source] sqlx::Error),
}

impl DbError {
    /// Check if this error indicates a connection problem.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DbError::ConnectionFailed(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DbError::ConnectionFailed(err)
            }
            other => DbError::QueryFailed(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_maps_to_connection_error() {
        let err = DbError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_row_not_found_maps_to_query_error() {
        let err = DbError::from(sqlx::Error::RowNotFound);
        assert!(!err.is_connection_error());
        assert!(err.to_string().starts_with("Query failed"));
    }
}
