use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::{FreeHandsError, UserId};
use crate::ports::ManagerPool;

use super::manager_load::ManagerLoad;

/// A manager signalling "ready for a new problem".
pub struct FreeHands {
    load: Arc<ManagerLoad>,
    pool: Arc<dyn ManagerPool>,
}

impl FreeHands {
    pub fn new(load: Arc<ManagerLoad>, pool: Arc<dyn ManagerPool>) -> Self {
        Self { load, pool }
    }

    /// Put the manager into the pool if their load allows it.
    pub async fn handle(
        &self,
        cancel: &CancellationToken,
        manager_id: UserId,
    ) -> Result<(), FreeHandsError> {
        if !self.load.can_manager_take_problem(manager_id).await? {
            return Err(FreeHandsError::ManagerOverloaded);
        }
        self.pool.put(cancel, manager_id).await?;
        Ok(())
    }
}
