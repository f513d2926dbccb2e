//! Per-(subscription, message) delivery state
//!
//! A lease is created when a message matching a subscription's filter is
//! published and destroyed on ack or on dead-letter escalation. In between it
//! alternates between `Pending` (deliverable once `ready_at` passes) and
//! `Delivered` (held by one consumer until `expires_at`):
//!
//! ```text
//! pending --claim--> delivered --ack--> (removed)
//!    ^                  |
//!    +---nack/expiry----+--attempts exhausted--> dead-lettered (removed)
//! ```
//!
//! Every transition happens under the broker's state lock, which makes the
//! claim atomic: a pending lease is handed to at most one caller.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::broker::message::{Message, MessageId};
use crate::broker::subscription::RetryPolicy;

/// Identifier of one delivery of a lease.
///
/// `subscription` and `message_id` name the lease and stay the same across
/// redeliveries; `delivery` is the attempt number this id was handed out
/// with. Acks accept any delivery of the lease, nacks only the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId {
    pub subscription: String,
    pub message_id: MessageId,
    pub delivery: u32,
}

impl LeaseId {
    /// True when both ids refer to the same (subscription, message) lease,
    /// whatever delivery they came from.
    pub fn same_lease(&self, other: &LeaseId) -> bool {
        self.subscription == other.subscription && self.message_id == other.message_id
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.subscription, self.message_id, self.delivery)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Pending { ready_at: Instant },
    Delivered { expires_at: Instant },
}

/// Why a delivered lease went back to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    Nacked,
    Expired,
}

/// Result of a nack or an expiry on a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Back to pending; redelivered once the retry backoff has elapsed.
    Requeued {
        reason: RequeueReason,
        attempts: u32,
    },
    /// Attempts exhausted; forwarded to the dead-letter topic or dropped.
    DeadLettered { attempts: u32 },
    /// The lease was not delivered, is held by a later delivery, or no
    /// longer exists; nothing changed.
    Ignored,
}

/// A message handed out by `pull` or `claim_push`.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub lease_id: LeaseId,
    pub message: Arc<Message>,
    pub delivery_attempt: u32,
}

#[derive(Debug)]
pub(crate) struct Lease {
    pub message: Arc<Message>,
    pub attempts: u32,
    pub expirations: u32,
    pub state: LeaseState,
}

pub(crate) enum Failure {
    Retry,
    Exhausted,
}

impl Lease {
    pub fn new(message: Arc<Message>, now: Instant) -> Self {
        Self {
            message,
            attempts: 0,
            expirations: 0,
            state: LeaseState::Pending { ready_at: now },
        }
    }

    /// pending -> delivered, if the lease is ready.
    pub fn claim(&mut self, now: Instant, ack_deadline: Duration) -> bool {
        match self.state {
            LeaseState::Pending { ready_at } if ready_at <= now => {
                self.attempts += 1;
                self.state = LeaseState::Delivered {
                    expires_at: now + ack_deadline,
                };
                true
            }
            _ => false,
        }
    }

    /// Pending, but already used up every attempt `max_attempts` allows.
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        !self.is_delivered() && self.attempts >= max_attempts
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self.state, LeaseState::Delivered { .. })
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.state, LeaseState::Delivered { expires_at } if expires_at < now)
    }

    /// delivered -> pending, or reports that the attempts are exhausted.
    /// The caller removes exhausted leases.
    pub fn fail(&mut self, now: Instant, max_attempts: u32, retry: &RetryPolicy) -> Failure {
        if self.attempts >= max_attempts {
            return Failure::Exhausted;
        }
        self.state = LeaseState::Pending {
            ready_at: now + retry.backoff(self.attempts),
        };
        Failure::Retry
    }
}
