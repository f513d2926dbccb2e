use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the push endpoint server, the broker and the demo.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub demo: DemoSettings,
}

/// Address the push endpoint binds to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Broker defaults and background task tuning.
///
/// `ack_deadline_secs` and `max_delivery_attempts` are the defaults applied to
/// subscriptions that do not set their own.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub ack_deadline_secs: u64,
    pub max_delivery_attempts: u32,
    pub expiry_sweep_interval_ms: u64,
    pub push_max_outstanding: usize,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl BrokerSettings {
    pub fn ack_deadline(&self) -> Duration {
        Duration::from_secs(self.ack_deadline_secs)
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_interval_ms)
    }
}

/// Parameters of the game simulation.
#[derive(Debug, Deserialize, Clone)]
pub struct DemoSettings {
    pub events: usize,
    pub duration_secs: u64,
    pub min_event_delay_ms: u64,
    pub max_event_delay_ms: u64,
    pub failure_rate: f64,
    pub log_level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub demo: Option<PartialDemoSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub ack_deadline_secs: Option<u64>,
    pub max_delivery_attempts: Option<u32>,
    pub expiry_sweep_interval_ms: Option<u64>,
    pub push_max_outstanding: Option<usize>,
    pub min_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDemoSettings {
    pub events: Option<usize>,
    pub duration_secs: Option<u64>,
    pub min_event_delay_ms: Option<u64>,
    pub max_event_delay_ms: Option<u64>,
    pub failure_rate: Option<f64>,
    pub log_level: Option<String>,
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            broker: BrokerSettings {
                ack_deadline_secs: 10,
                max_delivery_attempts: 5,
                expiry_sweep_interval_ms: 500,
                push_max_outstanding: 10,
                min_backoff_ms: 100,
                max_backoff_ms: 5000,
            },
            demo: DemoSettings {
                events: 15,
                duration_secs: 45,
                min_event_delay_ms: 500,
                max_event_delay_ms: 2000,
                failure_rate: 0.4,
                log_level: "info".to_string(),
            },
        }
    }
}
