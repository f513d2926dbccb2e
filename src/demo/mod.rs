//! NBA game demo
//!
//! Wires the broker to a small set of game services:
//! - `stats-service-pull`: pull, scoring plays only, per-player totals
//! - `notification-service-flaky`: pull, nacks a share of messages at random,
//!   dead-letters into `nba-dead-letter`
//! - `fantasy-calculator-push`: push to the in-process fantasy calculator
//! - `dead-letter-inspection`: pull on the dead-letter topic, drained at the end
//!
//! The game simulator publishes plays while the consumers run for the
//! configured time budget.

pub mod events;
pub mod fantasy;
pub mod notification;
pub mod producer;
pub mod stats;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::broker::{AttributeFilter, Broker, RetryPolicy, SubscriptionConfig};
use crate::broker::dead_letter::{DELIVERY_ATTEMPTS, ORIGINAL_SUBSCRIPTION};
use crate::client::{ConsumerReport, FlowControl, Publisher, PullConsumer};
use crate::config::{BrokerSettings, Settings};
use crate::transport::{PushDispatcher, serve_on};
use crate::utils::BrokerError;

pub use events::{DemoError, GameEvent};
pub use fantasy::{FantasyCalculator, FantasyTotals, fantasy_router};
pub use notification::{NotificationService, NotificationSummary};
pub use producer::GameSimulator;
pub use stats::{PlayerStats, StatsService};

pub const GAME_EVENTS_TOPIC: &str = "nba-game-events";
pub const DEAD_LETTER_TOPIC: &str = "nba-dead-letter";
pub const STATS_SUBSCRIPTION: &str = "stats-service-pull";
pub const NOTIFICATION_SUBSCRIPTION: &str = "notification-service-flaky";
pub const FANTASY_SUBSCRIPTION: &str = "fantasy-calculator-push";
pub const DEAD_LETTER_SUBSCRIPTION: &str = "dead-letter-inspection";

const STATS_FLOW: usize = 10;
const NOTIFICATION_FLOW: usize = 5;
const NOTIFICATION_MAX_ATTEMPTS: u32 = 5;

/// Creates the demo topics and subscriptions. Idempotent.
pub fn create_topology(
    broker: &Broker,
    settings: &BrokerSettings,
    push_endpoint: &str,
) -> Result<(), BrokerError> {
    broker.create_topic(GAME_EVENTS_TOPIC);
    broker.create_topic(DEAD_LETTER_TOPIC);

    let retry = RetryPolicy::exponential(
        Duration::from_millis(settings.min_backoff_ms),
        Duration::from_millis(settings.max_backoff_ms),
    );
    let defaults = |config: SubscriptionConfig| {
        config
            .with_ack_deadline(settings.ack_deadline())
            .with_max_delivery_attempts(settings.max_delivery_attempts)
            .with_retry_policy(retry)
    };

    broker.create_subscription(
        defaults(SubscriptionConfig::pull(STATS_SUBSCRIPTION, GAME_EVENTS_TOPIC))
            .with_filter(AttributeFilter::any().with("event_type", "score")),
    )?;
    broker.create_subscription(
        defaults(SubscriptionConfig::pull(
            NOTIFICATION_SUBSCRIPTION,
            GAME_EVENTS_TOPIC,
        ))
        .with_max_delivery_attempts(NOTIFICATION_MAX_ATTEMPTS)
        .with_dead_letter_topic(DEAD_LETTER_TOPIC),
    )?;
    broker.create_subscription(defaults(SubscriptionConfig::push(
        FANTASY_SUBSCRIPTION,
        GAME_EVENTS_TOPIC,
        push_endpoint,
    )))?;
    broker.create_subscription(defaults(SubscriptionConfig::pull(
        DEAD_LETTER_SUBSCRIPTION,
        DEAD_LETTER_TOPIC,
    )))?;

    info!(topic = GAME_EVENTS_TOPIC, push_endpoint, "demo topology ready");
    Ok(())
}

/// A message found on the dead-letter topic.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub headline: String,
    pub original_subscription: String,
    pub delivery_attempts: u32,
}

/// Acks and returns everything waiting on the dead-letter inspection
/// subscription.
pub fn drain_dead_letters(broker: &Broker) -> Result<Vec<DeadLetter>, BrokerError> {
    let mut dead_letters = Vec::new();
    loop {
        let batch = broker.pull(DEAD_LETTER_SUBSCRIPTION, 100)?;
        if batch.is_empty() {
            return Ok(dead_letters);
        }
        for received in batch {
            let message = &received.message;
            let headline = match GameEvent::from_message(message) {
                Ok(event) => event.headline(),
                Err(_) => String::from_utf8_lossy(&message.payload).into_owned(),
            };
            dead_letters.push(DeadLetter {
                headline,
                original_subscription: message
                    .attribute(ORIGINAL_SUBSCRIPTION)
                    .unwrap_or_default()
                    .to_string(),
                delivery_attempts: message
                    .attribute(DELIVERY_ATTEMPTS)
                    .and_then(|a| a.parse().ok())
                    .unwrap_or_default(),
            });
            broker.ack(&received.lease_id)?;
        }
    }
}

/// Everything the demo observed.
#[derive(Debug, Clone)]
pub struct DemoReport {
    pub published: Vec<GameEvent>,
    pub stats: Vec<(String, PlayerStats)>,
    pub stats_consumer: ConsumerReport,
    pub notifications: NotificationSummary,
    pub notification_consumer: ConsumerReport,
    pub fantasy: FantasyTotals,
    pub dead_letters: Vec<DeadLetter>,
}

/// Runs the whole demo: push endpoint, dispatcher, expiry loop, both pull
/// consumers and the game simulator. Returns once the consumers' time budget
/// is spent.
pub async fn run_demo(settings: &Settings) -> Result<DemoReport, DemoError> {
    let broker = Arc::new(Broker::new());

    let listener =
        TcpListener::bind((settings.server.host.as_str(), settings.server.port)).await?;
    let endpoint = format!("http://{}/", listener.local_addr()?);
    create_topology(&broker, &settings.broker, &endpoint)?;

    let calculator = Arc::new(FantasyCalculator::new());
    let server = tokio::spawn(serve_on(listener, fantasy_router(calculator.clone())));
    let expiry = tokio::spawn(Broker::start_expiry_loop(
        broker.clone(),
        settings.broker.expiry_sweep_interval(),
    ));
    let dispatcher = tokio::spawn(
        PushDispatcher::new(
            broker.clone(),
            settings.broker.push_max_outstanding,
            settings.broker.expiry_sweep_interval(),
        )
        .run(),
    );

    let budget = Duration::from_secs(settings.demo.duration_secs);
    let stats = Arc::new(StatsService::new());
    let stats_consumer = PullConsumer::from_shared(broker.clone(), STATS_SUBSCRIPTION, stats.clone())
        .with_flow_control(FlowControl::max_in_flight(STATS_FLOW))
        .with_time_budget(budget)
        .spawn();
    let notifications = Arc::new(NotificationService::new(settings.demo.failure_rate));
    let notification_consumer = PullConsumer::from_shared(
        broker.clone(),
        NOTIFICATION_SUBSCRIPTION,
        notifications.clone(),
    )
    .with_flow_control(FlowControl::max_in_flight(NOTIFICATION_FLOW))
    .with_time_budget(budget)
    .spawn();
    info!(
        failure_rate = notifications.failure_rate(),
        ?budget,
        "consumers listening"
    );

    let simulator = GameSimulator::new(Publisher::new(broker.clone(), GAME_EVENTS_TOPIC));
    let delay = Duration::from_millis(settings.demo.min_event_delay_ms)
        ..Duration::from_millis(settings.demo.max_event_delay_ms);
    let published = simulator.simulate_game_events(settings.demo.events, delay).await;

    let (stats_report, notification_report) = match &published {
        Ok(_) => futures::future::join(stats_consumer.join(), notification_consumer.join()).await,
        Err(_) => futures::future::join(stats_consumer.stop(), notification_consumer.stop()).await,
    };

    dispatcher.abort();
    expiry.abort();
    server.abort();

    let published = published?;
    let report = DemoReport {
        published,
        stats: stats.summary(),
        stats_consumer: stats_report?,
        notifications: notifications.summary(),
        notification_consumer: notification_report?,
        fantasy: calculator.totals(),
        dead_letters: drain_dead_letters(&broker)?,
    };

    let outstanding = broker.outstanding(NOTIFICATION_SUBSCRIPTION)?;
    if outstanding > 0 {
        warn!(outstanding, "notification messages still awaiting redelivery");
    }
    Ok(report)
}
