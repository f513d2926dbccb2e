//! The `error` module defines the error types used within the `ackbus` crate.
//!
//! Broker errors are caller-configuration errors and are surfaced synchronously.
//! Per-message failures (handler nacks, lease expiry) are not errors: they are
//! lease transitions and never abort the broker.

use thiserror::Error;

/// Errors returned by the broker API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("invalid subscription {name}: {reason}")]
    InvalidSubscription { name: String, reason: String },

    #[error("subscription {subscription} is not a {expected} subscription")]
    WrongDeliveryMode {
        subscription: String,
        expected: &'static str,
    },

    #[error("pull consumer on {subscription} aborted: {reason}")]
    ConsumerAborted { subscription: String, reason: String },
}

/// Errors raised on either side of the push delivery contract.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("malformed push envelope: {0}")]
    MalformedEnvelope(String),

    #[error("push request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("push endpoint answered {0}")]
    Status(u16),
}

/// Error type handlers use to signal a failed delivery. Any error is a nack.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
