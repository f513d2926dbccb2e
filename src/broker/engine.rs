//! Broker engine
//!
//! This module contains the in-memory broker responsible for:
//! - managing topics and their subscriptions
//! - storing published messages and fanning them out to matching subscriptions
//! - tracking one lease per (subscription, message) and driving it through
//!   claim, ack, nack and expiry
//! - escalating exhausted messages to the dead-letter topic
//!
//! Concurrency and usage notes:
//! - `Broker` is meant to be shared as `Arc<Broker>`. All state sits behind one
//!   internal lock that is only held for the duration of a state transition,
//!   never across handler execution or network I/O.
//! - Expired leases are swept lazily on every call touching a subscription and
//!   periodically by `start_expiry_loop`.
//! - Push subscriptions are served by the push dispatcher, which waits on
//!   `push_ready` for newly deliverable work.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::broker::lease::{
    Failure, Lease, LeaseId, ReceivedMessage, RequeueReason, Transition,
};
use crate::broker::message::{Attributes, MessageId};
use crate::broker::subscription::{SubscriptionConfig, SubscriptionUpdate};
use crate::broker::topic::Topic;
use crate::utils::BrokerError;

#[derive(Debug)]
pub(crate) struct SubscriptionState {
    pub config: SubscriptionConfig,
    pub leases: BTreeMap<MessageId, Lease>,
}

#[derive(Debug, Default)]
pub(crate) struct BrokerState {
    pub topics: HashMap<String, Topic>,
    pub subscriptions: HashMap<String, SubscriptionState>,
    /// Set when a push lease became deliverable; drained by `Broker::signal`.
    push_work: bool,
}

#[derive(Debug, Default)]
pub struct Broker {
    state: Mutex<BrokerState>,
    push_ready: Notify,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn signal(&self, state: &mut BrokerState) {
        if std::mem::take(&mut state.push_work) {
            self.push_ready.notify_one();
        }
    }

    /// Woken whenever a push lease becomes deliverable.
    pub fn push_ready(&self) -> &Notify {
        &self.push_ready
    }

    /// Registers a topic. Returns `false` if it already existed.
    pub fn create_topic(&self, name: &str) -> bool {
        let mut state = self.lock();
        if state.topics.contains_key(name) {
            return false;
        }
        state.topics.insert(name.to_string(), Topic::new(name));
        info!(topic = name, "topic created");
        true
    }

    /// Registers a subscription. Idempotent by name: an existing subscription
    /// is left unchanged.
    pub fn create_subscription(&self, config: SubscriptionConfig) -> Result<(), BrokerError> {
        config.validate()?;
        let mut state = self.lock();

        if state.subscriptions.contains_key(&config.name) {
            debug!(subscription = %config.name, "subscription already exists");
            return Ok(());
        }
        state.check_dead_letter_topic(&config)?;

        let topic = state
            .topics
            .get_mut(&config.topic)
            .ok_or_else(|| BrokerError::UnknownTopic(config.topic.clone()))?;
        topic.bind(&config.name);

        info!(
            subscription = %config.name,
            topic = %config.topic,
            mode = config.mode.name(),
            "subscription created"
        );
        state.subscriptions.insert(
            config.name.clone(),
            SubscriptionState {
                config,
                leases: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Changes the mutable part of a subscription and returns the new config.
    pub fn update_subscription(
        &self,
        name: &str,
        update: SubscriptionUpdate,
    ) -> Result<SubscriptionConfig, BrokerError> {
        let mut state = self.lock();
        let current = state.subscription(name)?;
        let updated = update.apply_to(&current.config);
        updated.validate()?;
        state.check_dead_letter_topic(&updated)?;

        if let Some(sub) = state.subscriptions.get_mut(name) {
            sub.config = updated.clone();
        }
        // a lowered attempt limit can leave pending leases over it
        let exhausted = state.escalate_exhausted(name, Instant::now());
        info!(subscription = name, exhausted, "subscription updated");
        Ok(updated)
    }

    /// Removes a subscription and releases every lease it holds.
    pub fn delete_subscription(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let sub = state
            .subscriptions
            .remove(name)
            .ok_or_else(|| BrokerError::UnknownSubscription(name.to_string()))?;

        if let Some(topic) = state.topics.get_mut(&sub.config.topic) {
            topic.unbind(name);
            for id in sub.leases.keys() {
                topic.release(*id);
            }
        }
        info!(subscription = name, released = sub.leases.len(), "subscription deleted");
        Ok(())
    }

    pub fn subscription(&self, name: &str) -> Result<SubscriptionConfig, BrokerError> {
        Ok(self.lock().subscription(name)?.config.clone())
    }

    /// Configurations of every push subscription.
    pub fn push_subscriptions(&self) -> Vec<SubscriptionConfig> {
        self.lock()
            .subscriptions
            .values()
            .filter(|sub| sub.config.mode.is_push())
            .map(|sub| sub.config.clone())
            .collect()
    }

    /// Number of messages a topic still retains.
    pub fn topic_len(&self, name: &str) -> Result<usize, BrokerError> {
        self.lock()
            .topics
            .get(name)
            .map(Topic::len)
            .ok_or_else(|| BrokerError::UnknownTopic(name.to_string()))
    }

    /// Number of leases (pending or delivered) a subscription holds.
    pub fn outstanding(&self, name: &str) -> Result<usize, BrokerError> {
        Ok(self.lock().subscription(name)?.leases.len())
    }

    /// Stores a message and creates a lease on every subscription whose filter
    /// matches `attributes`.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        attributes: Attributes,
    ) -> Result<MessageId, BrokerError> {
        let mut state = self.lock();
        let id = state.publish_locked(topic, payload.into(), attributes, Instant::now())?;
        self.signal(&mut state);
        Ok(id)
    }

    /// Leases up to `max_messages` pending messages of a pull subscription.
    /// An empty result means nothing is ready; callers should back off.
    pub fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        self.claim(subscription, max_messages, false)
    }

    /// Same atomic claim as `pull`, for push subscriptions.
    pub fn claim_push(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        self.claim(subscription, max_messages, true)
    }

    fn claim(
        &self,
        subscription: &str,
        max_messages: usize,
        push: bool,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let now = Instant::now();
        let mut state = self.lock();
        if state.subscription(subscription)?.config.mode.is_push() != push {
            return Err(BrokerError::WrongDeliveryMode {
                subscription: subscription.to_string(),
                expected: if push { "push" } else { "pull" },
            });
        }

        state.expire_subscription(subscription, now);
        let received = state.claim_locked(subscription, max_messages, now);
        self.signal(&mut state);
        Ok(received)
    }

    /// Acks a lease. Returns `true` if this call acked it and `false` if it
    /// was already gone, in which case nothing changes.
    pub fn ack(&self, lease_id: &LeaseId) -> Result<bool, BrokerError> {
        let now = Instant::now();
        let mut state = self.lock();
        let sub = state.subscription_mut(&lease_id.subscription)?;

        let acked = match sub.leases.remove(&lease_id.message_id) {
            Some(lease) => {
                debug!(lease = %lease_id, attempts = lease.attempts, "lease acked");
                let topic = sub.config.topic.clone();
                state.release(&topic, lease_id.message_id);
                true
            }
            None => {
                debug!(lease = %lease_id, "ack for unknown lease ignored");
                false
            }
        };

        state.expire_subscription(&lease_id.subscription, now);
        self.signal(&mut state);
        Ok(acked)
    }

    /// Nacks a delivered lease: it is redelivered, or dead-lettered once its
    /// attempts are exhausted. A nack from an earlier delivery, whose lease
    /// already expired and went to someone else, is ignored.
    pub fn nack(&self, lease_id: &LeaseId) -> Result<Transition, BrokerError> {
        let now = Instant::now();
        let mut state = self.lock();
        state.subscription(&lease_id.subscription)?;

        let transition = state.fail_lease(
            &lease_id.subscription,
            lease_id.message_id,
            Some(lease_id.delivery),
            RequeueReason::Nacked,
            now,
        );
        state.expire_subscription(&lease_id.subscription, now);
        self.signal(&mut state);
        Ok(transition)
    }

    /// Returns every expired delivered lease to pending (or dead-letters it).
    /// Returns the number of leases that expired.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let names: Vec<String> = state.subscriptions.keys().cloned().collect();
        let expired: usize = names
            .iter()
            .map(|name| state.expire_subscription(name, now))
            .sum();
        self.signal(&mut state);
        expired
    }

    /// Runs `sweep_expired` every `interval`. Intended to be spawned as a
    /// background task for the lifetime of the broker.
    pub async fn start_expiry_loop(broker: Arc<Broker>, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            let expired = broker.sweep_expired();
            if expired > 0 {
                debug!(expired, "expiry sweep");
            }
        }
    }
}

impl BrokerState {
    fn subscription(&self, name: &str) -> Result<&SubscriptionState, BrokerError> {
        self.subscriptions
            .get(name)
            .ok_or_else(|| BrokerError::UnknownSubscription(name.to_string()))
    }

    fn subscription_mut(&mut self, name: &str) -> Result<&mut SubscriptionState, BrokerError> {
        self.subscriptions
            .get_mut(name)
            .ok_or_else(|| BrokerError::UnknownSubscription(name.to_string()))
    }

    fn check_dead_letter_topic(&self, config: &SubscriptionConfig) -> Result<(), BrokerError> {
        match &config.dead_letter_topic {
            Some(topic) if !self.topics.contains_key(topic) => {
                Err(BrokerError::UnknownTopic(topic.clone()))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn publish_locked(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        attributes: Attributes,
        now: Instant,
    ) -> Result<MessageId, BrokerError> {
        let BrokerState {
            topics,
            subscriptions,
            push_work,
        } = self;

        let topic_entry = topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;

        let (matching, filtered): (Vec<&String>, Vec<&String>) = topic_entry
            .subscriptions
            .iter()
            .filter(|name| subscriptions.contains_key(name.as_str()))
            .partition(|name| {
                subscriptions
                    .get(name.as_str())
                    .is_some_and(|sub| sub.config.filter.matches(&attributes))
            });
        let matching: Vec<String> = matching.into_iter().cloned().collect();
        if !filtered.is_empty() {
            debug!(topic, filtered = ?filtered, "message filtered out");
        }

        let publish_time = chrono::Utc::now().timestamp_millis();
        let message = topic_entry.append(payload, attributes, publish_time, matching.len());

        for name in &matching {
            if let Some(sub) = subscriptions.get_mut(name) {
                sub.leases
                    .insert(message.id, Lease::new(message.clone(), now));
                if sub.config.mode.is_push() {
                    *push_work = true;
                }
            }
        }

        debug!(
            topic,
            message_id = message.id,
            subscriptions = matching.len(),
            "message published"
        );
        Ok(message.id)
    }

    fn claim_locked(
        &mut self,
        subscription: &str,
        max_messages: usize,
        now: Instant,
    ) -> Vec<ReceivedMessage> {
        let Some(sub) = self.subscriptions.get_mut(subscription) else {
            return Vec::new();
        };
        let ack_deadline = sub.config.ack_deadline;

        let mut received = Vec::new();
        for (id, lease) in sub.leases.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if lease.claim(now, ack_deadline) {
                received.push(ReceivedMessage {
                    lease_id: LeaseId {
                        subscription: subscription.to_string(),
                        message_id: *id,
                        delivery: lease.attempts,
                    },
                    message: lease.message.clone(),
                    delivery_attempt: lease.attempts,
                });
            }
        }
        received
    }

    /// Drops the store's reference for one finished lease.
    fn release(&mut self, topic: &str, id: MessageId) {
        if let Some(topic) = self.topics.get_mut(topic) {
            topic.release(id);
        }
    }

    /// Expiry sweep for one subscription. Returns the number of expired leases.
    fn expire_subscription(&mut self, name: &str, now: Instant) -> usize {
        let Some(sub) = self.subscriptions.get(name) else {
            return 0;
        };
        let expired: Vec<MessageId> = sub
            .leases
            .iter()
            .filter(|(_, lease)| lease.is_expired(now))
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.fail_lease(name, *id, None, RequeueReason::Expired, now);
        }
        expired.len()
    }

    /// Dead-letters pending leases whose attempts already reached the
    /// subscription's limit. Returns how many were escalated.
    fn escalate_exhausted(&mut self, name: &str, now: Instant) -> usize {
        let Some(sub) = self.subscriptions.get(name) else {
            return 0;
        };
        let max_attempts = sub.config.max_delivery_attempts;
        let exhausted: Vec<(MessageId, u32)> = sub
            .leases
            .iter()
            .filter(|(_, lease)| lease.is_exhausted(max_attempts))
            .map(|(id, lease)| (*id, lease.attempts))
            .collect();

        for (id, attempts) in &exhausted {
            self.dead_letter_lease(name, *id, *attempts, now);
        }
        exhausted.len()
    }

    /// Removes a lease for good and forwards its message to the dead-letter
    /// topic, if any.
    fn dead_letter_lease(&mut self, name: &str, id: MessageId, attempts: u32, now: Instant) {
        let Some(sub) = self.subscriptions.get_mut(name) else {
            return;
        };
        let Some(lease) = sub.leases.remove(&id) else {
            return;
        };
        let topic = sub.config.topic.clone();
        let dead_letter_topic = sub.config.dead_letter_topic.clone();

        self.release(&topic, id);
        self.escalate(name, dead_letter_topic.as_deref(), &lease.message, attempts, now);
    }

    /// Shared nack/expiry transition for a delivered lease. `delivery`, when
    /// given, must match the lease's current delivery.
    fn fail_lease(
        &mut self,
        name: &str,
        id: MessageId,
        delivery: Option<u32>,
        reason: RequeueReason,
        now: Instant,
    ) -> Transition {
        let Some(sub) = self.subscriptions.get_mut(name) else {
            return Transition::Ignored;
        };
        let Some(lease) = sub.leases.get_mut(&id) else {
            return Transition::Ignored;
        };
        if !lease.is_delivered() {
            return Transition::Ignored;
        }
        if delivery.is_some_and(|delivery| delivery != lease.attempts) {
            debug!(
                subscription = name,
                message_id = id,
                ?delivery,
                current = lease.attempts,
                "nack from an earlier delivery ignored"
            );
            return Transition::Ignored;
        }

        if reason == RequeueReason::Expired {
            lease.expirations += 1;
            if lease.expirations > 1 {
                warn!(
                    subscription = name,
                    message_id = id,
                    expirations = lease.expirations,
                    "lease expired again, handler may be stuck"
                );
            } else {
                debug!(subscription = name, message_id = id, "lease expired");
            }
        }

        let attempts = lease.attempts;
        match lease.fail(
            now,
            sub.config.max_delivery_attempts,
            &sub.config.retry_policy,
        ) {
            Failure::Retry => {
                if sub.config.mode.is_push() {
                    self.push_work = true;
                }
                debug!(subscription = name, message_id = id, attempts, ?reason, "lease requeued");
                Transition::Requeued { reason, attempts }
            }
            Failure::Exhausted => {
                self.dead_letter_lease(name, id, attempts, now);
                Transition::DeadLettered { attempts }
            }
        }
    }
}
