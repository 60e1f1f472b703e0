//! EventStream port - push events to a connected user.

use async_trait::async_trait;

use crate::domain::{Event, EventStreamError, UserId};

#[async_trait]
pub trait EventStream: Send + Sync {
    /// Deliver `event` to every live subscription of `user_id`.
    ///
    /// A user with no subscription is not an error.
    async fn publish(&self, user_id: UserId, event: Event) -> Result<(), EventStreamError>;
}
