//! Notification service: a pull consumer that fails a share of its messages
//! at random, so retries and dead-lettering can be watched.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use tracing::{info, warn};

use crate::broker::Message;
use crate::client::{HandlerResult, MessageHandler, Outcome};
use crate::demo::events::GameEvent;

#[derive(Debug)]
pub struct NotificationService {
    failure_rate: f64,
    processed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotificationSummary {
    pub processed: u64,
    pub failed: u64,
    pub success_rate: f64,
}

impl NotificationService {
    /// `failure_rate` is clamped to `[0, 1]`.
    pub fn new(failure_rate: f64) -> Self {
        let failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
        Self {
            failure_rate,
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    pub fn summary(&self) -> NotificationSummary {
        let processed = self.processed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let attempts = processed + failed;
        NotificationSummary {
            processed,
            failed,
            success_rate: if attempts == 0 {
                0.0
            } else {
                processed as f64 / attempts as f64 * 100.0
            },
        }
    }
}

impl MessageHandler for NotificationService {
    fn handle(&self, message: &Message, delivery_attempt: u32) -> HandlerResult {
        let event = GameEvent::from_message(message)?;

        if rand::thread_rng().gen_bool(self.failure_rate) {
            let failed = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                attempt = delivery_attempt,
                "notification FAILED for: {} (failure #{failed})",
                event.headline()
            );
            return Ok(Outcome::Nack);
        }

        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        info!("notification sent: {} (success #{processed})", event.headline());
        Ok(Outcome::Ack)
    }
}
