//! Wire shape of a pushed notification.
//!
//! Every outbound frame carries the same four fields regardless of entity:
//! `{"id": <uuid>, "event": "create"|"update"|"delete", "object_name": <kind>, "obj": {...}}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub id: Uuid,
    pub event: EventKind,
    pub object_name: String,
    pub obj: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

impl Envelope {
    /// Build an envelope with a freshly generated id.
    pub fn new(event: EventKind, object_name: impl Into<String>, obj: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            object_name: object_name.into(),
            obj,
        }
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(CodecError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, CodecError> {
        serde_json::from_str(text).map_err(CodecError::Decode)
    }
}
