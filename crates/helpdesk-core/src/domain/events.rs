//! Events pushed to clients and managers through the event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ChatId, EventId, MessageId, RequestId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all_fields = "camelCase")]
pub enum Event {
    NewMessage {
        event_id: EventId,
        request_id: RequestId,
        chat_id: ChatId,
        message_id: MessageId,
        author_id: Option<UserId>,
        created_at: DateTime<Utc>,
        body: String,
        is_service: bool,
    },

    /// Sent to a manager when a chat has been assigned to them.
    NewChat {
        event_id: EventId,
        request_id: RequestId,
        chat_id: ChatId,
        client_id: UserId,
        can_take_more_problems: bool,
    },
}

impl Event {
    pub fn event_id(&self) -> EventId {
        match self {
            Event::NewMessage { event_id, .. } | Event::NewChat { event_id, .. } => *event_id,
        }
    }
}
