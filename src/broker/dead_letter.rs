//! Dead-letter routing
//!
//! When a lease runs out of delivery attempts the message is re-published into
//! the subscription's dead-letter topic, which is an ordinary topic readable by
//! ordinary pull subscriptions. Without a dead-letter topic the message is
//! dropped and the drop is logged at error level.

use std::time::Instant;

use tracing::{error, warn};

use crate::broker::engine::BrokerState;
use crate::broker::message::{Message, MessageId};

/// Attribute naming the subscription that gave up on the message.
pub const ORIGINAL_SUBSCRIPTION: &str = "original_subscription";
/// Attribute carrying the number of delivery attempts made before escalation.
pub const DELIVERY_ATTEMPTS: &str = "delivery_attempts";
/// Attribute carrying the id the message had in its original topic.
pub const ORIGINAL_MESSAGE_ID: &str = "original_message_id";

impl BrokerState {
    /// Forward an exhausted message. Returns its id in the dead-letter topic,
    /// or `None` when it was dropped.
    pub(crate) fn escalate(
        &mut self,
        subscription: &str,
        dead_letter_topic: Option<&str>,
        message: &Message,
        attempts: u32,
        now: Instant,
    ) -> Option<MessageId> {
        let Some(topic) = dead_letter_topic else {
            error!(
                subscription,
                message_id = message.id,
                attempts,
                "delivery attempts exhausted without a dead-letter topic, message dropped"
            );
            return None;
        };

        let mut attributes = message.attributes.clone();
        attributes.insert(ORIGINAL_SUBSCRIPTION.to_string(), subscription.to_string());
        attributes.insert(DELIVERY_ATTEMPTS.to_string(), attempts.to_string());
        attributes.insert(ORIGINAL_MESSAGE_ID.to_string(), message.id.to_string());

        match self.publish_locked(topic, message.payload.clone(), attributes, now) {
            Ok(id) => {
                warn!(
                    subscription,
                    message_id = message.id,
                    attempts,
                    dead_letter_topic = topic,
                    dead_letter_id = id,
                    "message dead-lettered"
                );
                Some(id)
            }
            Err(e) => {
                error!(
                    subscription,
                    message_id = message.id,
                    attempts,
                    "dead-letter publish failed, message dropped: {e}"
                );
                None
            }
        }
    }
}
