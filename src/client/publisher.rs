use std::sync::Arc;

use tracing::debug;

use crate::broker::{Attributes, Broker, MessageId};
use crate::utils::BrokerError;

/// Publishing handle bound to one topic.
#[derive(Debug, Clone)]
pub struct Publisher {
    broker: Arc<Broker>,
    topic: String,
}

impl Publisher {
    pub fn new(broker: Arc<Broker>, topic: &str) -> Self {
        Self {
            broker,
            topic: topic.to_string(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes `payload` with `attributes`; fails with `UnknownTopic` if the
    /// topic does not exist.
    pub fn publish(
        &self,
        payload: impl Into<Vec<u8>>,
        attributes: Attributes,
    ) -> Result<MessageId, BrokerError> {
        let id = self.broker.publish(&self.topic, payload, attributes)?;
        debug!(topic = %self.topic, message_id = id, "published");
        Ok(id)
    }
}
