//! ManagerPool port - FIFO set of managers ready to take a new problem.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{PoolError, UserId};

/// Concurrency-safe FIFO queue with set semantics.
///
/// Every call taking a token returns `PoolError::Cancelled` without touching
/// the pool when the token is already cancelled. None of them wait for a
/// manager to show up.
#[async_trait]
pub trait ManagerPool: Send + Sync {
    /// Pop the longest-waiting manager.
    async fn get(&self, cancel: &CancellationToken) -> Result<UserId, PoolError>;

    /// Append `manager_id` unless it is already present.
    async fn put(&self, cancel: &CancellationToken, manager_id: UserId) -> Result<(), PoolError>;

    async fn contains(&self, cancel: &CancellationToken, manager_id: UserId)
    -> Result<bool, PoolError>;

    fn size(&self) -> usize;

    /// Release resources. The in-memory pool has none.
    fn close(&self) -> Result<(), PoolError> {
        Ok(())
    }
}
