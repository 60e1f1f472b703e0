//! Job payload codecs.

use serde::{Deserialize, Serialize};

use crate::domain::{JobError, MessageId};

/// A payload that is one typed ID in its text form (`msg-01HV...`).
pub mod simple_id {
    use crate::domain::{Id, IdMarker, JobError};

    pub fn marshal<T: IdMarker>(id: Id<T>) -> Result<String, JobError> {
        if id.is_nil() {
            return Err(JobError::Payload("nil identifier".into()));
        }
        Ok(id.to_string())
    }

    pub fn unmarshal<T: IdMarker>(payload: &str) -> Result<Id<T>, JobError> {
        payload
            .parse()
            .map_err(|e| JobError::Payload(format!("{e}")))
    }
}

/// JSON payload for jobs that reference one message.
///
/// No registered job carries it yet; the manager-assigned job uses
/// [`simple_id`].
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessagePayload {
    pub message_id: MessageId,
}

#[allow(dead_code)]
impl MessagePayload {
    pub fn marshal(message_id: MessageId) -> Result<String, JobError> {
        if message_id.is_nil() {
            return Err(JobError::Payload("messageId is required".into()));
        }
        serde_json::to_string(&Self { message_id }).map_err(|e| JobError::Payload(e.to_string()))
    }

    pub fn unmarshal(payload: &str) -> Result<Self, JobError> {
        serde_json::from_str(payload).map_err(|e| JobError::Payload(e.to_string()))
    }
}
