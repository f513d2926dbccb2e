use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceExt;

use super::dispatcher::{Settlement, deliver};
use super::{PushDispatcher, PushEnvelope, push_router};
use crate::broker::{Attributes, Broker, Message, SubscriptionConfig};
use crate::client::{HandlerResult, MessageHandler, Outcome};
use crate::utils::PushError;

fn envelope(data: &str) -> String {
    json!({
        "message": {
            "data": STANDARD.encode(data),
            "attributes": {"event_type": "score", "points": "3"},
            "messageId": "7"
        }
    })
    .to_string()
}

fn post(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn spawn_endpoint(handler: Arc<dyn MessageHandler>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router: Router = push_router(handler);
    tokio::spawn(async move { axum::serve(listener, router).await });
    format!("http://{addr}/")
}

#[test]
fn test_decode_valid_envelope() {
    let pushed = PushEnvelope::decode(envelope("{\"player\":\"LeBron James\"}").as_bytes()).unwrap();
    assert_eq!(pushed.message.id, 7);
    assert_eq!(pushed.message.payload, b"{\"player\":\"LeBron James\"}");
    assert_eq!(pushed.message.attribute("points"), Some("3"));
    assert_eq!(pushed.delivery_attempt, 1);
}

#[test]
fn test_decode_rejects_malformed_envelopes() {
    for body in [
        "not json".to_string(),
        json!({}).to_string(),
        json!({"message": {"attributes": {}}}).to_string(),
        json!({"message": {"data": "%%%"}}).to_string(),
    ] {
        let err = PushEnvelope::decode(body.as_bytes()).unwrap_err();
        assert!(matches!(err, PushError::MalformedEnvelope(_)), "{body}");
    }
}

#[test]
fn test_envelope_for_delivery_round_trips_payload() {
    let broker = Broker::new();
    broker.create_topic("events");
    broker
        .create_subscription(SubscriptionConfig::push("push", "events", "http://x/"))
        .unwrap();
    let mut attributes = Attributes::new();
    attributes.insert("team".to_string(), "GSW".to_string());
    broker.publish("events", vec![0u8, 159, 255], attributes).unwrap();

    let received = broker.claim_push("push", 1).unwrap().remove(0);
    let body = serde_json::to_vec(&PushEnvelope::for_delivery(&received)).unwrap();
    let raw: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(raw["subscription"], "push");
    assert_eq!(raw["deliveryAttempt"], 1);
    assert_eq!(raw["message"]["messageId"], "1");

    let pushed = PushEnvelope::decode(&body).unwrap();
    assert_eq!(pushed.message.payload, vec![0u8, 159, 255]);
    assert_eq!(pushed.message.attribute("team"), Some("GSW"));
    assert_eq!(pushed.message.publish_time, received.message.publish_time);
}

async fn status_for(handler: Arc<dyn MessageHandler>) -> StatusCode {
    push_router(handler)
        .oneshot(post(envelope("{}")))
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_endpoint_maps_outcomes_to_status() {
    let ack = Arc::new(|_: &Message, _: u32| -> HandlerResult { Ok(Outcome::Ack) });
    assert_eq!(status_for(ack).await, StatusCode::OK);

    let nack = Arc::new(|_: &Message, _: u32| -> HandlerResult { Ok(Outcome::Nack) });
    assert_eq!(status_for(nack).await, StatusCode::INTERNAL_SERVER_ERROR);

    let failing = Arc::new(|_: &Message, _: u32| -> HandlerResult { Err("db down".into()) });
    assert_eq!(status_for(failing).await, StatusCode::INTERNAL_SERVER_ERROR);

    let panicking = Arc::new(|_: &Message, _: u32| -> HandlerResult { panic!("boom") });
    assert_eq!(status_for(panicking).await, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_endpoint_rejects_malformed_without_calling_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler: Arc<dyn MessageHandler> = Arc::new(move |_: &Message, _: u32| -> HandlerResult {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::Ack)
    });

    let response = push_router(handler)
        .oneshot(post(json!({"nothing": true}).to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dispatcher_delivers_and_acks() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let url = spawn_endpoint(Arc::new(move |message: &Message, _: u32| -> HandlerResult {
        assert_eq!(message.payload, b"dunk");
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::Ack)
    }))
    .await;

    let broker = Arc::new(Broker::new());
    broker.create_topic("events");
    broker
        .create_subscription(SubscriptionConfig::push("push", "events", &url))
        .unwrap();
    let dispatcher = tokio::spawn(
        PushDispatcher::new(broker.clone(), 10, Duration::from_millis(20)).run(),
    );

    broker.publish("events", "dunk", Attributes::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    dispatcher.abort();

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(broker.outstanding("push").unwrap(), 0);
    assert_eq!(broker.topic_len("events").unwrap(), 0);
}

#[tokio::test]
async fn test_push_500_retries_until_dead_letter() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let url = spawn_endpoint(Arc::new(move |_: &Message, _: u32| -> HandlerResult {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::Nack)
    }))
    .await;

    let broker = Arc::new(Broker::new());
    broker.create_topic("events");
    broker.create_topic("dlq");
    broker
        .create_subscription(
            SubscriptionConfig::push("push", "events", &url)
                .with_max_delivery_attempts(3)
                .with_dead_letter_topic("dlq"),
        )
        .unwrap();
    broker
        .create_subscription(SubscriptionConfig::pull("dlq-reader", "dlq"))
        .unwrap();
    let dispatcher = tokio::spawn(
        PushDispatcher::new(broker.clone(), 10, Duration::from_millis(20)).run(),
    );

    broker.publish("events", "foul", Attributes::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;
    dispatcher.abort();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let dead = broker.pull("dlq-reader", 10).unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message.attribute("delivery_attempts"), Some("3"));
    assert_eq!(dead[0].message.attribute("original_subscription"), Some("push"));
}

#[test]
fn test_decode_accepts_numeric_message_id() {
    let body = json!({
        "message": {"data": STANDARD.encode("alley-oop"), "messageId": 42},
        "deliveryAttempt": 3
    })
    .to_string();

    let pushed = PushEnvelope::decode(body.as_bytes()).unwrap();
    assert_eq!(pushed.message.id, 42);
    assert_eq!(pushed.delivery_attempt, 3);

    let bad = json!({"message": {"data": "", "messageId": true}}).to_string();
    assert!(matches!(
        PushEnvelope::decode(bad.as_bytes()),
        Err(PushError::MalformedEnvelope(_))
    ));
}

#[tokio::test]
async fn test_push_timeout_leaves_lease_delivered() {
    let url = spawn_endpoint(Arc::new(|_: &Message, _: u32| -> HandlerResult {
        std::thread::sleep(Duration::from_millis(300));
        Ok(Outcome::Ack)
    }))
    .await;

    let broker = Arc::new(Broker::new());
    broker.create_topic("events");
    broker
        .create_subscription(
            SubscriptionConfig::push("push", "events", &url)
                .with_ack_deadline(Duration::from_secs(5)),
        )
        .unwrap();
    broker.publish("events", "buzzer beater", Attributes::new()).unwrap();
    let received = broker.claim_push("push", 1).unwrap().remove(0);

    let settlement = deliver(
        broker.clone(),
        reqwest::Client::new(),
        url,
        Duration::from_millis(100),
        received,
        Arc::new(AtomicUsize::new(1)),
    )
    .await;

    assert_eq!(settlement, Settlement::LeftToExpire);
    // not nacked: the lease is still held until its deadline
    assert!(broker.claim_push("push", 1).unwrap().is_empty());
    assert_eq!(broker.outstanding("push").unwrap(), 1);
}

#[tokio::test]
async fn test_push_timeout_redelivers_after_ack_deadline() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorder = calls.clone();
    let url = spawn_endpoint(Arc::new(move |_: &Message, attempt: u32| -> HandlerResult {
        recorder.lock().unwrap().push((attempt, Instant::now()));
        if attempt == 1 {
            std::thread::sleep(Duration::from_millis(400));
        }
        Ok(Outcome::Ack)
    }))
    .await;

    let broker = Arc::new(Broker::new());
    broker.create_topic("events");
    broker
        .create_subscription(
            SubscriptionConfig::push("push", "events", &url)
                .with_ack_deadline(Duration::from_millis(150)),
        )
        .unwrap();
    let dispatcher = tokio::spawn(
        PushDispatcher::new(broker.clone(), 10, Duration::from_millis(20)).run(),
    );

    let published = Instant::now();
    broker.publish("events", "and one", Attributes::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;
    dispatcher.abort();

    let calls = calls.lock().unwrap().clone();
    let attempts: Vec<u32> = calls.iter().map(|(attempt, _)| *attempt).collect();
    assert_eq!(attempts, vec![1, 2]);
    assert!(calls[1].1.duration_since(published) >= Duration::from_millis(150));
    assert_eq!(broker.outstanding("push").unwrap(), 0);
}

#[tokio::test]
async fn test_dispatcher_forgets_deleted_subscriptions() {
    let broker = Arc::new(Broker::new());
    broker.create_topic("events");
    broker
        .create_subscription(SubscriptionConfig::push("push", "events", "http://127.0.0.1:9/"))
        .unwrap();

    let mut dispatcher = PushDispatcher::new(broker.clone(), 10, Duration::from_millis(20));
    assert_eq!(dispatcher.dispatch_once(), 0);
    assert_eq!(dispatcher.tracked_subscriptions(), 1);

    broker.delete_subscription("push").unwrap();
    assert_eq!(dispatcher.dispatch_once(), 0);
    assert_eq!(dispatcher.tracked_subscriptions(), 0);
}
