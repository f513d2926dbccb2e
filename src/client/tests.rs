use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::handler::run_handler;
use super::pull::finish;
use super::{ConsumerReport, FlowControl, HandlerResult, Outcome, Publisher, PullConsumer};
use crate::broker::{Attributes, Broker, Message, SubscriptionConfig};
use crate::utils::BrokerError;

fn broker_with_subscription(config: SubscriptionConfig) -> Arc<Broker> {
    let broker = Arc::new(Broker::new());
    broker.create_topic(&config.topic);
    broker.create_subscription(config).unwrap();
    broker
}

#[test]
fn test_publisher_publishes_to_its_topic() {
    let broker = broker_with_subscription(SubscriptionConfig::pull("sub", "events"));
    let publisher = Publisher::new(broker.clone(), "events");

    assert_eq!(publisher.topic(), "events");
    publisher.publish("hello", Attributes::new()).unwrap();
    assert_eq!(broker.outstanding("sub").unwrap(), 1);

    let missing = Publisher::new(broker, "missing");
    assert_eq!(
        missing.publish("hello", Attributes::new()).unwrap_err(),
        BrokerError::UnknownTopic("missing".to_string())
    );
}

#[tokio::test]
async fn test_run_handler_turns_panics_into_errors() {
    let message = Arc::new(Message {
        id: 1,
        topic: "events".to_string(),
        payload: b"x".to_vec(),
        attributes: Attributes::new(),
        publish_time: 0,
    });
    let handler = Arc::new(|_: &Message, _: u32| -> HandlerResult { panic!("boom") });

    let result = run_handler(handler, message, 1).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_pull_consumer_acks_every_message() {
    let broker = broker_with_subscription(SubscriptionConfig::pull("sub", "events"));
    let publisher = Publisher::new(broker.clone(), "events");
    for i in 0..20 {
        publisher.publish(format!("m{i}"), Attributes::new()).unwrap();
    }

    let seen = Arc::new(Mutex::new(HashSet::new()));
    let recorder = seen.clone();
    let handler = move |message: &Message, _: u32| -> HandlerResult {
        recorder.lock().unwrap().insert(message.id);
        Ok(Outcome::Ack)
    };
    let handle = PullConsumer::new(broker.clone(), "sub", handler)
    .with_flow_control(FlowControl::max_in_flight(4))
    .spawn();

    assert_eq!(handle.subscription(), "sub");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.report().acked, 20);
    let report = handle.stop().await.unwrap();

    assert_eq!(report.acked, 20);
    assert_eq!(seen.lock().unwrap().len(), 20);
    assert_eq!(broker.outstanding("sub").unwrap(), 0);
}

#[tokio::test]
async fn test_pull_consumer_respects_max_in_flight() {
    let broker = broker_with_subscription(SubscriptionConfig::pull("sub", "events"));
    for _ in 0..12 {
        broker.publish("events", "x", Attributes::new()).unwrap();
    }

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (c, p) = (current.clone(), peak.clone());
    let handler = move |_: &Message, _: u32| -> HandlerResult {
        let now = c.fetch_add(1, Ordering::SeqCst) + 1;
        p.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        c.fetch_sub(1, Ordering::SeqCst);
        Ok(Outcome::Ack)
    };
    let handle = PullConsumer::new(broker.clone(), "sub", handler)
    .with_flow_control(FlowControl::max_in_flight(3))
    .spawn();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let report = handle.stop().await.unwrap();

    assert_eq!(report.acked, 12);
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_failing_handler_messages_reach_dead_letter_topic() {
    let broker = Arc::new(Broker::new());
    broker.create_topic("events");
    broker.create_topic("dlq");
    broker
        .create_subscription(
            SubscriptionConfig::pull("flaky", "events")
                .with_max_delivery_attempts(3)
                .with_dead_letter_topic("dlq"),
        )
        .unwrap();
    broker
        .create_subscription(SubscriptionConfig::pull("dlq-reader", "dlq"))
        .unwrap();
    broker.publish("events", "nope", Attributes::new()).unwrap();

    let handler = |message: &Message, attempt: u32| -> HandlerResult {
        if attempt == 2 {
            return Err(format!("cannot handle {}", message.id).into());
        }
        Ok(Outcome::Nack)
    };
    let handle = PullConsumer::new(broker.clone(), "flaky", handler).spawn();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let report = handle.stop().await.unwrap();

    assert_eq!(report.nacked, 2);
    assert_eq!(report.failed, 1);
    let dead = broker.pull("dlq-reader", 10).unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message.attribute("delivery_attempts"), Some("3"));
}

#[tokio::test]
async fn test_time_budget_stops_consumer() {
    let broker = broker_with_subscription(SubscriptionConfig::pull("sub", "events"));
    let ack = |_: &Message, _: u32| -> HandlerResult { Ok(Outcome::Ack) };
    let consumer = PullConsumer::new(broker, "sub", ack)
        .with_time_budget(Duration::from_millis(100));

    let report = tokio::time::timeout(Duration::from_secs(2), consumer.spawn().join())
        .await
        .expect("consumer did not honour its time budget")
        .unwrap();
    assert_eq!(report.acked, 0);
}

#[tokio::test]
async fn test_stopped_consumer_leaves_leases_to_expire() {
    let broker = broker_with_subscription(
        SubscriptionConfig::pull("sub", "events").with_ack_deadline(Duration::from_millis(100)),
    );
    broker.publish("events", "slow", Attributes::new()).unwrap();

    let slow = |_: &Message, _: u32| -> HandlerResult {
        std::thread::sleep(Duration::from_millis(400));
        Ok(Outcome::Ack)
    };
    let handle = PullConsumer::new(broker.clone(), "sub", slow).spawn();

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stop().await.unwrap();

    // the stuck handler still holds the first delivery; the lease expires
    // and a second consumer gets it again
    tokio::time::sleep(Duration::from_millis(100)).await;
    let redelivered = broker.pull("sub", 1).unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].delivery_attempt, 2);
}

#[tokio::test]
async fn test_unknown_subscription_ends_consumer_with_error() {
    let broker = Arc::new(Broker::new());
    let ack = |_: &Message, _: u32| -> HandlerResult { Ok(Outcome::Ack) };
    let handle = PullConsumer::new(broker, "ghost", ack).spawn();

    let err = handle.join().await.unwrap_err();
    assert_eq!(err, BrokerError::UnknownSubscription("ghost".to_string()));
}

#[tokio::test]
async fn test_panicked_consumer_task_is_reported_as_aborted() {
    let task: tokio::task::JoinHandle<Result<ConsumerReport, BrokerError>> =
        tokio::spawn(async { panic!("pull loop crashed") });
    let joined = task.await;

    match finish("sub", joined) {
        Err(BrokerError::ConsumerAborted { subscription, reason }) => {
            assert_eq!(subscription, "sub");
            assert!(reason.contains("panic"), "{reason}");
        }
        other => panic!("expected ConsumerAborted, got {other:?}"),
    }
}
