//! Chats, problems and messages as seen by the scheduling core.
//!
//! These are thin views of entities owned by the surrounding service; the
//! core only reads them and fills `Problem::manager_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ChatId, MessageId, ProblemId, RequestId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub client_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// A client's open question within a chat.
///
/// `manager_id` is filled exactly once by the scheduler and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: ProblemId,
    pub chat_id: ChatId,
    pub manager_id: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Problem {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    pub fn awaits_manager(&self) -> bool {
        self.is_open() && self.manager_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub problem_id: ProblemId,

    /// `None` for service messages.
    pub author_id: Option<UserId>,
    pub initial_request_id: RequestId,
    pub body: String,

    pub is_visible_for_client: bool,
    pub is_visible_for_manager: bool,
    pub is_service: bool,

    pub created_at: DateTime<Utc>,
}
