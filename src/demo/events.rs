//! NBA game events: the roster, the event kinds and the JSON payload every
//! demo service parses.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broker::Message;
use crate::utils::BrokerError;

pub const GAME_ID: &str = "LAL_vs_GSW_2024_01_15";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Player {
    pub name: &'static str,
    pub team: &'static str,
    pub rating: &'static str,
}

pub static PLAYERS: [Player; 6] = [
    Player {
        name: "LeBron James",
        team: "LAL",
        rating: "star",
    },
    Player {
        name: "Stephen Curry",
        team: "GSW",
        rating: "star",
    },
    Player {
        name: "Giannis Antetokounmpo",
        team: "MIL",
        rating: "star",
    },
    Player {
        name: "Jayson Tatum",
        team: "BOS",
        rating: "star",
    },
    Player {
        name: "Austin Reaves",
        team: "LAL",
        rating: "regular",
    },
    Player {
        name: "James Harden",
        team: "LAC",
        rating: "regular",
    },
];

/// One kind of play. `points` lists the values a play of this kind can be
/// worth on the scoreboard; non-scoring plays only list `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKind {
    pub name: &'static str,
    pub points: &'static [u32],
    pub description: &'static str,
}

pub static EVENT_KINDS: [EventKind; 5] = [
    EventKind {
        name: "score",
        points: &[2, 3],
        description: "scored",
    },
    EventKind {
        name: "rebound",
        points: &[0],
        description: "grabbed a rebound",
    },
    EventKind {
        name: "assist",
        points: &[0],
        description: "made an assist",
    },
    EventKind {
        name: "steal",
        points: &[0],
        description: "made a steal",
    },
    EventKind {
        name: "block",
        points: &[0],
        description: "blocked a shot",
    },
];

pub fn player(name: &str) -> Option<&'static Player> {
    PLAYERS.iter().find(|p| p.name == name)
}

pub fn event_kind(name: &str) -> Option<&'static EventKind> {
    EVENT_KINDS.iter().find(|k| k.name == name)
}

/// Payload of a message on the game events topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub player: String,
    pub team: String,
    pub event: String,
    pub points: u32,
    pub timestamp: String,
    pub game_id: String,
}

impl GameEvent {
    pub fn from_message(message: &Message) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(&message.payload)
    }

    /// "LeBron James scored 3 points" / "Stephen Curry made a steal"
    pub fn headline(&self) -> String {
        if self.points > 0 {
            format!("{} {} {} points", self.player, self.event, self.points)
        } else {
            format!("{} {}", self.player, self.event)
        }
    }
}

#[derive(Debug, Error)]
pub enum DemoError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("could not encode game event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("push endpoint failed: {0}")]
    Io(#[from] std::io::Error),
}
