//! Topic storage
//!
//! A `Topic` is an append-only log of messages plus the names of the
//! subscriptions bound to it. A stored message is kept together with the
//! number of live leases referencing it; when that count reaches zero the
//! message is dropped from the store.
//!
//! Concurrency note: callers must synchronize access to `Topic` (the broker
//! keeps every topic behind its state lock).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::broker::message::{Attributes, Message, MessageId};

#[derive(Debug)]
pub(crate) struct StoredMessage {
    pub message: Arc<Message>,
    pub live_leases: usize,
}

#[derive(Debug)]
pub struct Topic {
    pub name: String,
    pub subscriptions: BTreeSet<String>,
    pub(crate) messages: BTreeMap<MessageId, StoredMessage>,
    next_id: MessageId,
}

impl Topic {
    /// Create a new, empty topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscriptions: BTreeSet::new(),
            messages: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Bind a subscription to the topic. Duplicate binds are ignored.
    pub fn bind(&mut self, subscription: &str) {
        self.subscriptions.insert(subscription.to_string());
    }

    /// Remove a subscription from the topic.
    pub fn unbind(&mut self, subscription: &str) {
        self.subscriptions.remove(subscription);
    }

    /// Append a message and return it. The message is only retained if
    /// `live_leases > 0`; otherwise nothing references it and it is not stored.
    pub(crate) fn append(
        &mut self,
        payload: Vec<u8>,
        attributes: Attributes,
        publish_time: i64,
        live_leases: usize,
    ) -> Arc<Message> {
        let id = self.next_id;
        self.next_id += 1;

        let message = Arc::new(Message {
            id,
            topic: self.name.clone(),
            payload,
            attributes,
            publish_time,
        });

        if live_leases > 0 {
            self.messages.insert(
                id,
                StoredMessage {
                    message: message.clone(),
                    live_leases,
                },
            );
        }
        message
    }

    /// Drop one lease reference on `id`, collecting the message when it was the last.
    pub(crate) fn release(&mut self, id: MessageId) {
        if let Some(stored) = self.messages.get_mut(&id) {
            stored.live_leases = stored.live_leases.saturating_sub(1);
            if stored.live_leases == 0 {
                self.messages.remove(&id);
            }
        }
    }

    /// Number of messages currently retained.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Id the next published message will receive.
    pub fn next_id(&self) -> MessageId {
        self.next_id
    }
}
