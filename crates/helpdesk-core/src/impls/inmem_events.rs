//! InMemoryEventStream - per-user fan-out over unbounded channels.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{Event, EventStreamError, UserId};
use crate::ports::EventStream;

#[derive(Debug, Default)]
pub struct InMemoryEventStream {
    subscribers: Mutex<HashMap<UserId, Vec<mpsc::UnboundedSender<Event>>>>,
}

impl InMemoryEventStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new subscription for `user_id`. Dropping the receiver ends it.
    pub fn subscribe(&self, user_id: UserId) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(user_id)
            .or_default()
            .push(tx);
        rx
    }

    pub fn subscriber_count(&self, user_id: UserId) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventStream for InMemoryEventStream {
    async fn publish(&self, user_id: UserId, event: Event) -> Result<(), EventStreamError> {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let Some(senders) = subscribers.get_mut(&user_id) else {
            return Ok(());
        };

        senders.retain(|tx| tx.send(event.clone()).is_ok());
        if senders.is_empty() {
            subscribers.remove(&user_id);
        }
        Ok(())
    }
}
