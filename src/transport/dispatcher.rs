//! Push dispatcher
//!
//! Broker-side half of push delivery. The dispatcher wakes when the broker
//! reports new push work (or on a fixed tick, which covers backoff and expiry),
//! claims leases for every push subscription up to `max_outstanding` and POSTs
//! each one to the subscription's endpoint:
//! - 2xx: ack
//! - other status or connection error: nack
//! - no answer within the ack-deadline: nothing, the lease expires
//!
//! The broker lock is never held while a request is in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::broker::{Broker, DeliveryMode, ReceivedMessage};
use crate::transport::message::PushEnvelope;
use crate::utils::PushError;

pub struct PushDispatcher {
    broker: Arc<Broker>,
    client: reqwest::Client,
    max_outstanding: usize,
    tick: Duration,
    in_flight: HashMap<String, Arc<AtomicUsize>>,
}

impl PushDispatcher {
    pub fn new(broker: Arc<Broker>, max_outstanding: usize, tick: Duration) -> Self {
        Self {
            broker,
            client: reqwest::Client::new(),
            max_outstanding: max_outstanding.max(1),
            tick,
            in_flight: HashMap::new(),
        }
    }

    /// Dispatch loop. Runs until the task is dropped or aborted.
    pub async fn run(mut self) {
        loop {
            self.dispatch_once();
            tokio::select! {
                _ = self.broker.push_ready().notified() => {}
                _ = tokio::time::sleep(self.tick) => {}
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_subscriptions(&self) -> usize {
        self.in_flight.len()
    }

    /// Claims whatever is deliverable right now and starts the requests.
    /// Returns the number of deliveries started.
    pub fn dispatch_once(&mut self) -> usize {
        let mut started = 0;
        let subscriptions = self.broker.push_subscriptions();
        self.in_flight
            .retain(|name, _| subscriptions.iter().any(|sub| &sub.name == name));

        for sub in subscriptions {
            let DeliveryMode::Push { endpoint } = &sub.mode else {
                continue;
            };
            let in_flight = self
                .in_flight
                .entry(sub.name.clone())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                .clone();

            let capacity = self
                .max_outstanding
                .saturating_sub(in_flight.load(Ordering::SeqCst));
            if capacity == 0 {
                continue;
            }

            let claimed = match self.broker.claim_push(&sub.name, capacity) {
                Ok(claimed) => claimed,
                Err(e) => {
                    // deleted between listing and claiming
                    debug!(subscription = %sub.name, "skipping push subscription: {e}");
                    continue;
                }
            };

            for received in claimed {
                in_flight.fetch_add(1, Ordering::SeqCst);
                started += 1;
                tokio::spawn(deliver(
                    self.broker.clone(),
                    self.client.clone(),
                    endpoint.clone(),
                    sub.ack_deadline,
                    received,
                    in_flight.clone(),
                ));
            }
        }
        started
    }
}

/// How one push attempt ended for its lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Acked,
    Nacked,
    LeftToExpire,
}

pub(crate) async fn deliver(
    broker: Arc<Broker>,
    client: reqwest::Client,
    endpoint: String,
    ack_deadline: Duration,
    received: ReceivedMessage,
    in_flight: Arc<AtomicUsize>,
) -> Settlement {
    let lease_id = received.lease_id.clone();
    let envelope = PushEnvelope::for_delivery(&received);

    let (settlement, settle) = match post(&client, &endpoint, &envelope, ack_deadline).await {
        Ok(()) => (Settlement::Acked, broker.ack(&lease_id).map(|_| ())),
        Err(PushError::Transport(e)) if e.is_timeout() => {
            warn!(lease = %lease_id, %endpoint, "push timed out, lease left to expire");
            (Settlement::LeftToExpire, Ok(()))
        }
        Err(e) => {
            warn!(
                lease = %lease_id,
                %endpoint,
                attempt = received.delivery_attempt,
                "push delivery failed: {e}"
            );
            (Settlement::Nacked, broker.nack(&lease_id).map(|_| ()))
        }
    };
    if let Err(e) = settle {
        error!(lease = %lease_id, "could not settle push lease: {e}");
    }

    in_flight.fetch_sub(1, Ordering::SeqCst);
    settlement
}

async fn post(
    client: &reqwest::Client,
    endpoint: &str,
    envelope: &PushEnvelope,
    timeout: Duration,
) -> Result<(), PushError> {
    let response = client
        .post(endpoint)
        .timeout(timeout)
        .json(envelope)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(PushError::Status(status.as_u16()))
    }
}
