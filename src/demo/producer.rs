//! Game simulator
//!
//! Publishes random plays to the game events topic. The payload is a JSON
//! [`GameEvent`]; the attributes carry what subscriptions filter on:
//! `event_type`, `player_rating`, `team` and `points`.

use std::ops::Range;
use std::time::Duration;

use chrono::Local;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::broker::Attributes;
use crate::client::Publisher;
use crate::demo::events::{
    DemoError, EVENT_KINDS, EventKind, GAME_ID, GameEvent, PLAYERS, Player, event_kind, player,
};

pub struct GameSimulator {
    publisher: Publisher,
}

impl GameSimulator {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }

    /// Publishes one play. A player or event type that is not given, or not
    /// known, is picked at random.
    pub fn publish_single_event(
        &self,
        player_name: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<GameEvent, DemoError> {
        let (who, kind, points) = {
            let mut rng = rand::thread_rng();
            let who = pick(player_name.and_then(player), &PLAYERS, &mut rng);
            let kind = pick(event_type.and_then(event_kind), &EVENT_KINDS, &mut rng);
            let points = kind.points.choose(&mut rng).copied().unwrap_or(0);
            (who, kind, points)
        };
        self.publish_play(who, kind, points)
    }

    fn publish_play(
        &self,
        player: &Player,
        kind: &EventKind,
        points: u32,
    ) -> Result<GameEvent, DemoError> {
        let event = GameEvent {
            player: player.name.to_string(),
            team: player.team.to_string(),
            event: kind.description.to_string(),
            points,
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            game_id: GAME_ID.to_string(),
        };

        let attributes: Attributes = [
            ("event_type", kind.name.to_string()),
            ("player_rating", player.rating.to_string()),
            ("team", player.team.to_string()),
            ("points", points.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let id = self
            .publisher
            .publish(serde_json::to_vec(&event)?, attributes)?;
        info!(
            message_id = id,
            "published: {} {} ({} pts)", event.player, event.event, event.points
        );
        Ok(event)
    }

    /// Publishes `num_events` random plays, sleeping a random delay drawn from
    /// `delay` after each one.
    pub async fn simulate_game_events(
        &self,
        num_events: usize,
        delay: Range<Duration>,
    ) -> Result<Vec<GameEvent>, DemoError> {
        info!(num_events, "starting game simulation");
        let mut events = Vec::with_capacity(num_events);

        for _ in 0..num_events {
            events.push(self.publish_single_event(None, None)?);

            let pause = if delay.start < delay.end {
                rand::thread_rng().gen_range(delay.clone())
            } else {
                delay.start
            };
            debug!(?pause, "waiting for the next play");
            tokio::time::sleep(pause).await;
        }

        info!(published = events.len(), "game simulation complete");
        Ok(events)
    }
}

fn pick<T, R: Rng>(chosen: Option<&'static T>, all: &'static [T], rng: &mut R) -> &'static T {
    chosen
        .or_else(|| all.choose(rng))
        .unwrap_or(&all[0])
}
