//! Message definitions for the broker
//!
//! `Message` is immutable once stored. The topic's store owns it behind an
//! `Arc` and every lease on it shares that allocation instead of copying.
//!
//! Notes on fields:
//! - `id`: strictly increasing per topic, assigned by the broker on publish
//! - `payload`: opaque bytes; the broker never looks inside
//! - `attributes`: string map used by subscription filters
//! - `publish_time`: milliseconds since UNIX epoch, set on publish

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifier of a message within its topic.
pub type MessageId = u64;

/// Attribute set attached to a message.
pub type Attributes = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub attributes: Attributes,
    pub publish_time: i64,
}

impl Message {
    /// Returns the attribute value for `key`, if present.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}
