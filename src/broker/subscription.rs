//! Subscriptions and attribute filters
//!
//! A subscription is a named, filtered view over one topic. Its delivery mode
//! is fixed at creation; filter, ack-deadline, max delivery attempts, dead-letter
//! topic and retry backoff can be changed afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broker::message::Attributes;
use crate::utils::BrokerError;

/// Conjunction of exact-match attribute constraints. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeFilter {
    constraints: BTreeMap<String, String>,
}

impl AttributeFilter {
    /// Filter that accepts every message.
    pub fn any() -> Self {
        Self::default()
    }

    /// Adds a `key == value` constraint.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.constraints.insert(key.to_string(), value.to_string());
        self
    }

    pub fn matches(&self, attributes: &Attributes) -> bool {
        self.constraints
            .iter()
            .all(|(key, value)| attributes.get(key) == Some(value))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AttributeFilter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            constraints: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Drained by `Broker::pull`.
    Pull,
    /// Delivered by the push dispatcher to `endpoint`.
    Push { endpoint: String },
}

impl DeliveryMode {
    pub fn is_push(&self) -> bool {
        matches!(self, DeliveryMode::Push { .. })
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            DeliveryMode::Pull => "pull",
            DeliveryMode::Push { .. } => "push",
        }
    }
}

/// Backoff applied before a failed message becomes deliverable again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub minimum_backoff: Duration,
    pub maximum_backoff: Duration,
}

impl RetryPolicy {
    /// Redeliver immediately after a nack or expiry.
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn exponential(minimum_backoff: Duration, maximum_backoff: Duration) -> Self {
        Self {
            minimum_backoff,
            maximum_backoff: maximum_backoff.max(minimum_backoff),
        }
    }

    /// Delay after the `attempts`-th failed delivery: `min * 2^(attempts-1)`, capped at `max`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        if self.minimum_backoff.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempts.saturating_sub(1).min(16);
        self.minimum_backoff
            .saturating_mul(1 << exponent)
            .min(self.maximum_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub name: String,
    pub topic: String,
    pub mode: DeliveryMode,
    pub filter: AttributeFilter,
    pub ack_deadline: Duration,
    pub max_delivery_attempts: u32,
    pub dead_letter_topic: Option<String>,
    pub retry_policy: RetryPolicy,
}

impl SubscriptionConfig {
    /// Pull subscription with a 10s ack-deadline, 5 delivery attempts and no filter.
    pub fn pull(name: &str, topic: &str) -> Self {
        Self {
            name: name.to_string(),
            topic: topic.to_string(),
            mode: DeliveryMode::Pull,
            filter: AttributeFilter::any(),
            ack_deadline: Duration::from_secs(10),
            max_delivery_attempts: 5,
            dead_letter_topic: None,
            retry_policy: RetryPolicy::immediate(),
        }
    }

    /// Push subscription delivering to `endpoint`, otherwise like [`SubscriptionConfig::pull`].
    pub fn push(name: &str, topic: &str, endpoint: &str) -> Self {
        Self {
            mode: DeliveryMode::Push {
                endpoint: endpoint.to_string(),
            },
            ..Self::pull(name, topic)
        }
    }

    pub fn with_filter(mut self, filter: AttributeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_ack_deadline(mut self, ack_deadline: Duration) -> Self {
        self.ack_deadline = ack_deadline;
        self
    }

    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    pub fn with_dead_letter_topic(mut self, topic: &str) -> Self {
        self.dead_letter_topic = Some(topic.to_string());
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), BrokerError> {
        let invalid = |reason: &str| BrokerError::InvalidSubscription {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.max_delivery_attempts < 1 {
            return Err(invalid("max_delivery_attempts must be at least 1"));
        }
        if self.ack_deadline.is_zero() {
            return Err(invalid("ack_deadline must be positive"));
        }
        if let DeliveryMode::Push { endpoint } = &self.mode {
            if endpoint.is_empty() {
                return Err(invalid("push subscriptions require an endpoint"));
            }
        }
        Ok(())
    }
}

/// Mutable part of a subscription. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub filter: Option<AttributeFilter>,
    pub ack_deadline: Option<Duration>,
    pub max_delivery_attempts: Option<u32>,
    /// `Some(None)` removes the dead-letter topic.
    pub dead_letter_topic: Option<Option<String>>,
    pub retry_policy: Option<RetryPolicy>,
}

impl SubscriptionUpdate {
    pub(crate) fn apply_to(&self, config: &SubscriptionConfig) -> SubscriptionConfig {
        let mut updated = config.clone();
        if let Some(filter) = &self.filter {
            updated.filter = filter.clone();
        }
        if let Some(ack_deadline) = self.ack_deadline {
            updated.ack_deadline = ack_deadline;
        }
        if let Some(attempts) = self.max_delivery_attempts {
            updated.max_delivery_attempts = attempts;
        }
        if let Some(dead_letter_topic) = &self.dead_letter_topic {
            updated.dead_letter_topic = dead_letter_topic.clone();
        }
        if let Some(retry_policy) = self.retry_policy {
            updated.retry_policy = retry_policy;
        }
        updated
    }
}
