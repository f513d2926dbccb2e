//! Fantasy calculator
//!
//! Push endpoint that scores every play for fantasy purposes. Besides the push
//! receiver on `POST /` it answers `GET /` (health) and `GET /stats`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::get,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::broker::Message;
use crate::client::{HandlerResult, MessageHandler, Outcome};
use crate::demo::events::GameEvent;
use crate::transport::handle_push;

/// Fantasy value of a play. Scores are worth their scoreboard value, other
/// plays a fixed amount; anything unknown is worth nothing.
pub fn fantasy_points(event_type: &str, points: &str) -> f64 {
    match (event_type, points) {
        ("score", "2") => 2.0,
        ("score", "3") => 3.0,
        ("score", _) => 0.0,
        ("rebound", _) => 1.2,
        ("assist", _) => 1.5,
        ("steal", _) => 2.0,
        ("block", _) => 2.0,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FantasyTotals {
    pub total_events: u64,
    pub total_fantasy_points: f64,
    pub player_totals: BTreeMap<String, f64>,
}

#[derive(Debug, Default)]
pub struct FantasyCalculator {
    totals: Mutex<FantasyTotals>,
}

impl FantasyCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> FantasyTotals {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, FantasyTotals> {
        self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageHandler for FantasyCalculator {
    fn handle(&self, message: &Message, _delivery_attempt: u32) -> HandlerResult {
        let event = GameEvent::from_message(message)?;
        let earned = fantasy_points(
            message.attribute("event_type").unwrap_or_default(),
            message.attribute("points").unwrap_or("0"),
        );

        let player_total = {
            let mut totals = self.lock();
            totals.total_events += 1;
            totals.total_fantasy_points += earned;
            let player_total = totals.player_totals.entry(event.player.clone()).or_default();
            *player_total += earned;
            *player_total
        };

        info!(
            "fantasy calculator: {} earned {earned} fantasy points (player total {player_total})",
            event.player
        );
        Ok(Outcome::Ack)
    }
}

/// Router for the standalone calculator service.
pub fn fantasy_router(calculator: Arc<FantasyCalculator>) -> Router {
    Router::new()
        .route("/", get(health).post(receive))
        .route("/stats", get(stats))
        .with_state(calculator)
}

async fn receive(
    State(calculator): State<Arc<FantasyCalculator>>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    handle_push(calculator, &body).await
}

async fn health(State(calculator): State<Arc<FantasyCalculator>>) -> Json<Value> {
    let totals = calculator.totals();
    Json(json!({
        "status": "healthy",
        "service": "NBA Fantasy Calculator",
        "events_processed": totals.total_events,
        "total_fantasy_points": totals.total_fantasy_points,
    }))
}

async fn stats(State(calculator): State<Arc<FantasyCalculator>>) -> Json<FantasyTotals> {
    Json(calculator.totals())
}
