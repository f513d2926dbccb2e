//! ackbus broker
//!
//! The broker core: topics with an append-only message store, filtered
//! subscriptions, the per-lease delivery state machine and dead-letter routing.
//!
//! Public types:
//! - `Broker`: publish, pull, ack, nack and subscription management.
//! - `SubscriptionConfig` / `AttributeFilter` / `RetryPolicy`: subscription setup.
//! - `ReceivedMessage` / `LeaseId`: what consumers get back from a pull.

pub mod dead_letter;
pub mod engine;
pub mod lease;
pub mod message;
pub mod subscription;
pub mod topic;

pub use engine::Broker;
pub use lease::{LeaseId, ReceivedMessage, RequeueReason, Transition};
pub use message::{Attributes, Message, MessageId};
pub use subscription::{
    AttributeFilter, DeliveryMode, RetryPolicy, SubscriptionConfig, SubscriptionUpdate,
};
