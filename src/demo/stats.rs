//! Stats service: pull consumer on scoring plays that keeps per-player totals.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use tracing::info;

use crate::broker::Message;
use crate::client::{HandlerResult, MessageHandler, Outcome};
use crate::demo::events::GameEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerStats {
    pub total_points: u64,
    pub events: u64,
}

#[derive(Debug, Default)]
pub struct StatsService {
    players: Mutex<BTreeMap<String, PlayerStats>>,
}

impl StatsService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn player(&self, name: &str) -> Option<PlayerStats> {
        self.lock().get(name).copied()
    }

    /// Player totals, ordered by name.
    pub fn summary(&self) -> Vec<(String, PlayerStats)> {
        self.lock()
            .iter()
            .map(|(name, stats)| (name.clone(), *stats))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, PlayerStats>> {
        self.players.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageHandler for StatsService {
    fn handle(&self, message: &Message, _delivery_attempt: u32) -> HandlerResult {
        let event = GameEvent::from_message(message)?;

        let totals = {
            let mut players = self.lock();
            let stats = players.entry(event.player.clone()).or_default();
            stats.total_points += u64::from(event.points);
            stats.events += 1;
            *stats
        };

        info!(
            "stats updated: {} - {} (+{} pts), total {} points in {} events",
            event.player, event.event, event.points, totals.total_points, totals.events
        );
        Ok(Outcome::Ack)
    }
}
