//! Flow-controlled pull consumer
//!
//! The runtime leases at most `max_in_flight - outstanding` messages per pull,
//! hands each one to the handler on the blocking pool and settles the lease
//! with ack or nack depending on the outcome. Empty pulls back off
//! exponentially between `min_poll_backoff` and `max_poll_backoff`.
//!
//! Stopping (explicitly, by dropping the handle, or when the time budget runs
//! out) only stops new pulls. Handlers already running still settle their
//! lease; leases that are never settled expire and get redelivered.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, ReceivedMessage};
use crate::client::handler::{MessageHandler, Outcome, run_handler};
use crate::utils::BrokerError;

#[derive(Debug, Clone)]
pub struct FlowControl {
    pub max_in_flight: usize,
    pub min_poll_backoff: Duration,
    pub max_poll_backoff: Duration,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self {
            max_in_flight: 10,
            min_poll_backoff: Duration::from_millis(10),
            max_poll_backoff: Duration::from_millis(500),
        }
    }
}

impl FlowControl {
    pub fn max_in_flight(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            ..Self::default()
        }
    }
}

/// Counters shared by every handler task of one consumer.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    acked: AtomicU64,
    nacked: AtomicU64,
    failed: AtomicU64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerReport {
        ConsumerReport {
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// `acked`: acks the broker accepted. `nacked`: handler answered Nack.
/// `failed`: handler errored or panicked (also nacked).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub acked: u64,
    pub nacked: u64,
    pub failed: u64,
}

pub struct PullConsumer {
    id: String,
    broker: Arc<Broker>,
    subscription: String,
    flow: FlowControl,
    time_budget: Option<Duration>,
    handler: Arc<dyn MessageHandler>,
    stats: Arc<ConsumerStats>,
}

impl PullConsumer {
    pub fn new(broker: Arc<Broker>, subscription: &str, handler: impl MessageHandler) -> Self {
        Self::from_shared(broker, subscription, Arc::new(handler))
    }

    /// Same as `new`, for a handler the caller keeps a reference to.
    pub fn from_shared(
        broker: Arc<Broker>,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            id: format!("consumer-{}", Uuid::new_v4()),
            broker,
            subscription: subscription.to_string(),
            flow: FlowControl::default(),
            time_budget: None,
            handler,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn with_flow_control(mut self, flow: FlowControl) -> Self {
        self.flow = flow;
        self
    }

    /// Stop pulling once `budget` has elapsed.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    /// Runs the consumer on a background task.
    pub fn spawn(self) -> ConsumerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let subscription = self.subscription.clone();
        let task = tokio::spawn(self.run(stop_rx));
        ConsumerHandle {
            subscription,
            stop: stop_tx,
            stats,
            task,
        }
    }

    /// Pull loop. Returns when `stop` flips to `true` (or its sender is dropped),
    /// when the time budget is spent, or with an error if the subscription is
    /// unknown or not a pull subscription.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<ConsumerReport, BrokerError> {
        let deadline = self.time_budget.map(|budget| Instant::now() + budget);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let settled = Arc::new(Notify::new());
        let mut backoff = self.flow.min_poll_backoff;

        info!(
            consumer = %self.id,
            subscription = %self.subscription,
            max_in_flight = self.flow.max_in_flight,
            "pull consumer started"
        );

        while !stopped(&stop) && !deadline.is_some_and(|d| Instant::now() >= d) {
            let capacity = self
                .flow
                .max_in_flight
                .saturating_sub(in_flight.load(Ordering::SeqCst));
            if capacity == 0 {
                wait_or_stop(&mut stop, deadline, settled.notified()).await;
                continue;
            }

            let batch = self.broker.pull(&self.subscription, capacity)?;
            if batch.is_empty() {
                wait_or_stop(&mut stop, deadline, sleep(backoff)).await;
                backoff = (backoff * 2).min(self.flow.max_poll_backoff);
                continue;
            }
            backoff = self.flow.min_poll_backoff;

            debug!(consumer = %self.id, leased = batch.len(), "pulled batch");
            for received in batch {
                in_flight.fetch_add(1, Ordering::SeqCst);
                let delivery = Delivery {
                    broker: self.broker.clone(),
                    handler: self.handler.clone(),
                    stats: self.stats.clone(),
                    in_flight: in_flight.clone(),
                    settled: settled.clone(),
                };
                tokio::spawn(delivery.process(received));
            }
        }

        let report = self.stats.snapshot();
        info!(
            consumer = %self.id,
            subscription = %self.subscription,
            outstanding = in_flight.load(Ordering::SeqCst),
            acked = report.acked,
            nacked = report.nacked,
            failed = report.failed,
            "pull consumer stopped"
        );
        Ok(report)
    }
}

fn stopped(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

async fn wait_or_stop(
    stop: &mut watch::Receiver<bool>,
    deadline: Option<Instant>,
    wait: impl Future,
) {
    let budget = async {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = wait => {}
        _ = stop.changed() => {}
        _ = budget => {}
    }
}

struct Delivery {
    broker: Arc<Broker>,
    handler: Arc<dyn MessageHandler>,
    stats: Arc<ConsumerStats>,
    in_flight: Arc<AtomicUsize>,
    settled: Arc<Notify>,
}

impl Delivery {
    async fn process(self, received: ReceivedMessage) {
        let lease_id = received.lease_id;
        let result = run_handler(
            self.handler.clone(),
            received.message,
            received.delivery_attempt,
        )
        .await;

        let settle = match result {
            Ok(Outcome::Ack) => self.broker.ack(&lease_id).map(|acked| {
                if acked {
                    self.stats.acked.fetch_add(1, Ordering::Relaxed);
                } else {
                    debug!(lease = %lease_id, "lease already settled");
                }
            }),
            Ok(Outcome::Nack) => {
                self.stats.nacked.fetch_add(1, Ordering::Relaxed);
                self.broker.nack(&lease_id).map(|_| ())
            }
            Err(e) => {
                warn!(lease = %lease_id, "handler failed: {e}");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.broker.nack(&lease_id).map(|_| ())
            }
        };
        if let Err(e) = settle {
            error!(lease = %lease_id, "could not settle lease: {e}");
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.settled.notify_one();
    }
}

/// Handle to a spawned pull consumer.
pub struct ConsumerHandle {
    subscription: String,
    stop: watch::Sender<bool>,
    stats: Arc<ConsumerStats>,
    task: JoinHandle<Result<ConsumerReport, BrokerError>>,
}

impl ConsumerHandle {
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Live counters, readable while the consumer runs.
    pub fn report(&self) -> ConsumerReport {
        self.stats.snapshot()
    }

    /// Waits for the consumer to finish on its own (time budget or error).
    /// A consumer task that panicked or was cancelled is reported as
    /// `ConsumerAborted`.
    pub async fn join(self) -> Result<ConsumerReport, BrokerError> {
        let ConsumerHandle {
            subscription,
            stop,
            task,
            ..
        } = self;
        let result = task.await;
        drop(stop);
        finish(&subscription, result)
    }

    /// Stops issuing pulls and waits for the loop to exit. Leases held by
    /// running handlers are left alone.
    pub async fn stop(self) -> Result<ConsumerReport, BrokerError> {
        let _ = self.stop.send(true);
        self.join().await
    }
}

pub(crate) fn finish(
    subscription: &str,
    joined: Result<Result<ConsumerReport, BrokerError>, JoinError>,
) -> Result<ConsumerReport, BrokerError> {
    joined.unwrap_or_else(|e| {
        error!(subscription, "pull consumer task failed: {e}");
        Err(BrokerError::ConsumerAborted {
            subscription: subscription.to_string(),
            reason: e.to_string(),
        })
    })
}
