//! InMemoryManagerPool - process-local manager pool.
//!
//! # Implementation
//! - `VecDeque<UserId>` keeps arrival order
//! - `HashSet<UserId>` mirrors it for O(1) membership checks
//! - one std Mutex covers both; it is never held across an await

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{PoolError, UserId};
use crate::ports::ManagerPool;

#[derive(Debug, Default)]
struct Queue {
    order: VecDeque<UserId>,
    members: HashSet<UserId>,
}

#[derive(Debug, Default)]
pub struct InMemoryManagerPool {
    queue: Mutex<Queue>,
}

impl InMemoryManagerPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_queue<R>(&self, f: impl FnOnce(&mut Queue) -> R) -> R {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut queue)
    }
}

fn check(cancel: &CancellationToken) -> Result<(), PoolError> {
    if cancel.is_cancelled() {
        Err(PoolError::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait]
impl ManagerPool for InMemoryManagerPool {
    async fn get(&self, cancel: &CancellationToken) -> Result<UserId, PoolError> {
        check(cancel)?;
        let manager_id = self.with_queue(|q| {
            let id = q.order.pop_front().ok_or(PoolError::NoAvailableManagers)?;
            q.members.remove(&id);
            Ok(id)
        })?;
        tracing::debug!(%manager_id, "manager removed from pool");
        Ok(manager_id)
    }

    async fn put(&self, cancel: &CancellationToken, manager_id: UserId) -> Result<(), PoolError> {
        check(cancel)?;
        let added = self.with_queue(|q| {
            if !q.members.insert(manager_id) {
                return false;
            }
            q.order.push_back(manager_id);
            true
        });
        if added {
            tracing::debug!(%manager_id, "manager added to pool");
        }
        Ok(())
    }

    async fn contains(
        &self,
        cancel: &CancellationToken,
        manager_id: UserId,
    ) -> Result<bool, PoolError> {
        check(cancel)?;
        Ok(self.with_queue(|q| q.members.contains(&manager_id)))
    }

    fn size(&self) -> usize {
        self.with_queue(|q| q.order.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn get_returns_managers_in_arrival_order() {
        let pool = InMemoryManagerPool::new();
        let cancel = CancellationToken::new();
        let (m1, m2, m3) = (UserId::generate(), UserId::generate(), UserId::generate());

        for m in [m1, m2, m3] {
            pool.put(&cancel, m).await.unwrap();
        }
        assert_eq!(pool.size(), 3);

        assert_eq!(pool.get(&cancel).await.unwrap(), m1);
        assert_eq!(pool.get(&cancel).await.unwrap(), m2);
        assert_eq!(pool.get(&cancel).await.unwrap(), m3);
        assert_eq!(
            pool.get(&cancel).await.unwrap_err(),
            PoolError::NoAvailableManagers
        );
    }

    #[tokio::test]
    async fn repeated_put_keeps_original_position() {
        let pool = InMemoryManagerPool::new();
        let cancel = CancellationToken::new();
        let (m1, m2) = (UserId::generate(), UserId::generate());

        pool.put(&cancel, m1).await.unwrap();
        pool.put(&cancel, m2).await.unwrap();
        pool.put(&cancel, m1).await.unwrap();

        assert_eq!(pool.size(), 2);
        assert_eq!(pool.get(&cancel).await.unwrap(), m1);
        assert!(!pool.contains(&cancel, m1).await.unwrap());
        assert!(pool.contains(&cancel, m2).await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_token_leaves_pool_untouched() {
        let pool = InMemoryManagerPool::new();
        let live = CancellationToken::new();
        let m = UserId::generate();
        pool.put(&live, m).await.unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();

        assert_eq!(pool.get(&cancelled).await.unwrap_err(), PoolError::Cancelled);
        assert_eq!(
            pool.put(&cancelled, UserId::generate()).await.unwrap_err(),
            PoolError::Cancelled
        );
        assert_eq!(
            pool.contains(&cancelled, m).await.unwrap_err(),
            PoolError::Cancelled
        );
        assert_eq!(pool.size(), 1);
        assert!(pool.close().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_and_gets_lose_nobody() {
        let pool = Arc::new(InMemoryManagerPool::new());
        let managers: Vec<UserId> = (0..64).map(|_| UserId::generate()).collect();

        let mut tasks = Vec::new();
        for m in managers.iter().copied() {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                pool.put(&cancel, m).await.unwrap();
                pool.put(&cancel, m).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(pool.size(), managers.len());

        let cancel = CancellationToken::new();
        let mut drained = HashSet::new();
        while let Ok(m) = pool.get(&cancel).await {
            assert!(drained.insert(m));
        }
        assert_eq!(drained, managers.into_iter().collect());
    }
}
