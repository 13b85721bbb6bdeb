//! QueueMessage - the envelope placed on the broker.
//!
//! The envelope only references a persisted message; the message body stays
//! in storage. One JSON object per broker record.

use serde::{Deserialize, Serialize};

use super::MessageId;
use crate::error::Error;

/// What an envelope asks the worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMessageType {
    /// Deliver the referenced message.
    Email,
    /// Liveness check from the HTTP health check. Never touches storage.
    Ping,
}

/// Wire form: `{"id": "<26 chars>", "type": "email"}` or `{"type": "ping"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Raw id as found on the wire; validated by [`QueueMessage::message_id`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(rename = "type")]
    pub kind: QueueMessageType,
}

impl QueueMessage {
    pub fn email(id: &MessageId) -> Self {
        Self {
            id: id.to_string(),
            kind: QueueMessageType::Email,
        }
    }

    pub fn ping() -> Self {
        Self {
            id: String::new(),
            kind: QueueMessageType::Ping,
        }
    }

    pub fn is_ping(&self) -> bool {
        self.kind == QueueMessageType::Ping
    }

    /// The referenced message id, if the envelope carries a valid one.
    pub fn message_id(&self) -> Result<MessageId, Error> {
        MessageId::parse(&self.id)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self)
            .map_err(|e| Error::internal("failed to encode queue message").with_source(e))
    }

    /// Decode one broker record. Any failure is a validation error: the
    /// payload is poison and must be discarded, not retried.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(payload)
            .map_err(|e| Error::validation("malformed queue payload").with_source(e))
    }
}
