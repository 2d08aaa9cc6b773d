//! Push-channel envelope: `{ "type": <tag>, "data": <payload> }`.

use serde::{Deserialize, Serialize};

use crate::{Item, ItemId, QueueStats, Status};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad `{tag}` payload: {source}")]
    Payload { tag: &'static str, source: serde_json::Error },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusChange {
    pub id: ItemId,
    pub status: Status,
}

/// Inbound push messages, one variant per known tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    NewItem(Item),
    StatsUpdate(QueueStats),
    StatusUpdate(StatusChange),
    Pong,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn payload<T: serde::de::DeserializeOwned>(tag: &'static str, data: serde_json::Value) -> Result<T, EnvelopeError> {
    serde_json::from_value(data).map_err(|source| EnvelopeError::Payload { tag, source })
}

impl PushMessage {
    /// Decode one text frame. Unknown tags yield `Ok(None)`.
    pub fn decode(text: &str) -> Result<Option<PushMessage>, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let msg = match raw.tag.as_str() {
            "new_item" => PushMessage::NewItem(payload("new_item", raw.data)?),
            "stats_update" => PushMessage::StatsUpdate(payload("stats_update", raw.data)?),
            "status_update" => PushMessage::StatusUpdate(payload("status_update", raw.data)?),
            "pong" => PushMessage::Pong,
            other => {
                tracing::debug!(tag = %other, "push: ignoring unknown message type");
                return Ok(None);
            }
        };
        Ok(Some(msg))
    }

    pub fn tag(&self) -> &'static str {
        match self {
            PushMessage::NewItem(_) => "new_item",
            PushMessage::StatsUpdate(_) => "stats_update",
            PushMessage::StatusUpdate(_) => "status_update",
            PushMessage::Pong => "pong",
        }
    }
}

/// Messages the client sends on the push channel.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Ping,
}
