//! JobEnqueuer port - what producers of outbox work depend on.
//!
//! `app::Outbox` implements it; producers (the scheduler, use cases) only
//! see this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{JobId, StoreError};

#[async_trait]
pub trait JobEnqueuer: Send + Sync {
    /// Enqueue a job row. Call it inside the transaction of the state change
    /// it reports on.
    ///
    /// No deduplication: putting the same `(name, payload)` twice creates two
    /// rows.
    async fn put(
        &self,
        name: &str,
        payload: &str,
        available_at: DateTime<Utc>,
    ) -> Result<JobId, StoreError>;
}
