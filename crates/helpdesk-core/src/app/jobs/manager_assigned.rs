//! `manager-assigned-to-problem`: tell the client and the manager about a
//! fresh assignment.
//!
//! Payload: the service message ID created by the scheduler, in
//! `simple_id` form.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use crate::app::job::Job;
use crate::app::manager_load::ManagerLoad;
use crate::domain::{Event, EventId, JobError, MessageId};
use crate::ports::{ChatRepository, EventStream, MessageRepository};

use super::payload::simple_id;

pub const NAME: &str = "manager-assigned-to-problem";

pub struct ManagerAssignedToProblemJob {
    chats: Arc<dyn ChatRepository>,
    messages: Arc<dyn MessageRepository>,
    load: Arc<ManagerLoad>,
    events: Arc<dyn EventStream>,
}

impl ManagerAssignedToProblemJob {
    pub fn new(
        chats: Arc<dyn ChatRepository>,
        messages: Arc<dyn MessageRepository>,
        load: Arc<ManagerLoad>,
        events: Arc<dyn EventStream>,
    ) -> Self {
        Self {
            chats,
            messages,
            load,
            events,
        }
    }
}

#[async_trait]
impl Job for ManagerAssignedToProblemJob {
    fn name(&self) -> &str {
        NAME
    }

    async fn handle(&self, payload: &str) -> Result<(), JobError> {
        let message_id: MessageId = simple_id::unmarshal(payload)?;
        let span = tracing::info_span!("job", job_name = NAME, %message_id);

        async move {
            let message = self.messages.get_message_by_id(message_id).await?;
            let client_id = self.chats.get_chat_client(message.chat_id).await?;
            let manager_id = self.chats.get_chat_manager(message.chat_id).await?;
            let can_take_more_problems = self
                .load
                .can_manager_take_problem(manager_id)
                .await
                .map_err(|e| JobError::Failed(format!("manager load service call: {e}")))?;

            let to_client = Event::NewMessage {
                event_id: EventId::generate(),
                request_id: message.initial_request_id,
                chat_id: message.chat_id,
                message_id: message.id,
                author_id: None,
                created_at: message.created_at,
                body: message.body.clone(),
                is_service: true,
            };
            let to_manager = Event::NewChat {
                event_id: EventId::generate(),
                request_id: message.initial_request_id,
                chat_id: message.chat_id,
                client_id,
                can_take_more_problems,
            };

            tokio::try_join!(
                self.events.publish(client_id, to_client),
                self.events.publish(manager_id, to_manager),
            )?;

            tracing::debug!(%client_id, %manager_id, "assignment published");
            Ok::<_, JobError>(())
        }
        .instrument(span)
        .await
    }
}
