//! JobStore port - durable table of pending jobs plus the dead-letter table.
//!
//! Implementations: `impls::MemoryDatabase` (tests, demo) and
//! `helpdesk_pg::PgStore` (PostgreSQL).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{JobId, JobRecord, StoreError};

/// Storage contract used by the outbox engine.
///
/// Calls made inside `Transactor::run_in_tx` join that transaction.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new row with `attempts = 0`.
    async fn create_job(
        &self,
        name: &str,
        payload: &str,
        available_at: DateTime<Utc>,
    ) -> Result<JobId, StoreError>;

    /// Atomically lease one eligible row.
    ///
    /// Eligible means `available_at <= now` and `reserved_until <= now`.
    /// Rows locked by a concurrent reservation are skipped, never waited on.
    /// The returned row already has `attempts` incremented and
    /// `reserved_until = until`. Returns `StoreError::NoJobs` when nothing is
    /// eligible.
    async fn find_and_reserve_job(&self, until: DateTime<Utc>) -> Result<JobRecord, StoreError>;

    async fn create_failed_job(
        &self,
        name: &str,
        payload: &str,
        reason: &str,
    ) -> Result<(), StoreError>;

    /// Fails with `StoreError::NotFound` if the row no longer exists.
    async fn delete_job(&self, id: JobId) -> Result<(), StoreError>;
}
