//! Push delivery envelope
//!
//! Wire format of one push delivery:
//!
//! ```json
//! {
//!   "message": {
//!     "data": "<base64 payload>",
//!     "attributes": {"event_type": "score"},
//!     "messageId": "42",
//!     "publishTime": "2024-01-15T20:00:00.000Z"
//!   },
//!   "subscription": "fantasy-calculator-push",
//!   "deliveryAttempt": 1
//! }
//! ```
//!
//! Only `message` and `message.data` are required when decoding. `messageId`
//! is accepted as a string or as a number.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::broker::{Attributes, Message, ReceivedMessage};
use crate::utils::PushError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEnvelope {
    pub message: Option<PushMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_attempt: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub data: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, deserialize_with = "message_id_from_wire")]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
}

/// A decoded push delivery.
#[derive(Debug, Clone)]
pub struct PushedMessage {
    pub message: Message,
    pub subscription: Option<String>,
    pub delivery_attempt: u32,
}

impl PushEnvelope {
    /// Builds the envelope the dispatcher POSTs for a claimed lease.
    pub fn for_delivery(received: &ReceivedMessage) -> Self {
        let message = &received.message;
        Self {
            message: Some(PushMessage {
                data: Some(STANDARD.encode(&message.payload)),
                attributes: message.attributes.clone(),
                message_id: message.id.to_string(),
                publish_time: DateTime::from_timestamp_millis(message.publish_time)
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            }),
            subscription: Some(received.lease_id.subscription.clone()),
            delivery_attempt: Some(received.delivery_attempt),
        }
    }

    /// Parses and validates a request body.
    pub fn decode(body: &[u8]) -> Result<PushedMessage, PushError> {
        let envelope: PushEnvelope = serde_json::from_slice(body)
            .map_err(|e| PushError::MalformedEnvelope(format!("invalid JSON: {e}")))?;
        envelope.into_pushed()
    }

    fn into_pushed(self) -> Result<PushedMessage, PushError> {
        let message = self
            .message
            .ok_or_else(|| PushError::MalformedEnvelope("no message found".to_string()))?;
        let data = message
            .data
            .ok_or_else(|| PushError::MalformedEnvelope("no message data found".to_string()))?;
        let payload = STANDARD
            .decode(data.as_bytes())
            .map_err(|e| PushError::MalformedEnvelope(format!("data is not base64: {e}")))?;

        let id = if message.message_id.is_empty() {
            0
        } else {
            message.message_id.parse().map_err(|_| {
                PushError::MalformedEnvelope(format!("bad messageId {:?}", message.message_id))
            })?
        };
        let publish_time = message
            .publish_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.timestamp_millis())
            .unwrap_or_default();

        Ok(PushedMessage {
            message: Message {
                id,
                // the receiving side never learns the topic name
                topic: String::new(),
                payload,
                attributes: message.attributes,
                publish_time,
            },
            subscription: self.subscription,
            delivery_attempt: self.delivery_attempt.unwrap_or(1),
        })
    }
}

fn message_id_from_wire<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "messageId must be a string or a number, got {other}"
        ))),
    }
}
