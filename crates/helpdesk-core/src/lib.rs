//! helpdesk-core
//!
//! Task-distribution core of a support-chat backend: an at-least-once
//! outbox job engine and the scheduler that binds idle managers to open
//! problems.
//!
//! # Modules
//! - **domain**: IDs, job rows, chats/problems/messages, events, errors
//! - **ports**: storage, transaction, pool, event stream and clock traits
//! - **app**: Outbox, ManagerScheduler, jobs, manager load
//! - **impls**: in-memory adapters (database, manager pool, event stream)
//! - **config**: TOML configuration
//! - **observability**: status snapshots

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use self::config::{ConfigError, HelpdeskConfig};
