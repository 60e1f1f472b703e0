//! helpdesk-pg
//!
//! PostgreSQL implementation of the outbox storage ports (`JobStore`,
//! `Transactor`) on a `sqlx` pool, plus the schema migrations.

pub mod store;

pub use self::store::PgStore;
