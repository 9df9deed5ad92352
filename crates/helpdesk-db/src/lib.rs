//! # helpdesk-db
//!
//! PostgreSQL persistence for the escalation engine.
//!
//! Models expose `impl` blocks of async queries taking a `&PgPool` (or a
//! `&mut PgConnection` when the caller owns a transaction) and return
//! `sqlx::Error` directly. Pool setup, migrations and the deployment bootstrap
//! report [`DbError`].

pub mod bootstrap;
pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;

pub use bootstrap::{ensure_default_settings, BootstrapError};
pub use error::DbError;
pub use migrations::run_migrations;
pub use pool::DbPool;
