mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, DemoSettings, ServerSettings, Settings};

/// Loads the configuration from `config/default.*` and `ACKBUS__*` environment
/// variables (e.g. `ACKBUS__SERVER__PORT=9000`).
/// Merges whatever was found over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("ACKBUS")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();
    let server = partial.server.as_ref();
    let broker = partial.broker.as_ref();
    let demo = partial.demo.as_ref();

    Ok(Settings {
        server: ServerSettings {
            host: server
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server.and_then(|s| s.port).unwrap_or(default.server.port),
        },
        broker: BrokerSettings {
            ack_deadline_secs: broker
                .and_then(|b| b.ack_deadline_secs)
                .unwrap_or(default.broker.ack_deadline_secs),
            max_delivery_attempts: broker
                .and_then(|b| b.max_delivery_attempts)
                .unwrap_or(default.broker.max_delivery_attempts),
            expiry_sweep_interval_ms: broker
                .and_then(|b| b.expiry_sweep_interval_ms)
                .unwrap_or(default.broker.expiry_sweep_interval_ms),
            push_max_outstanding: broker
                .and_then(|b| b.push_max_outstanding)
                .unwrap_or(default.broker.push_max_outstanding),
            min_backoff_ms: broker
                .and_then(|b| b.min_backoff_ms)
                .unwrap_or(default.broker.min_backoff_ms),
            max_backoff_ms: broker
                .and_then(|b| b.max_backoff_ms)
                .unwrap_or(default.broker.max_backoff_ms),
        },
        demo: DemoSettings {
            events: demo.and_then(|d| d.events).unwrap_or(default.demo.events),
            duration_secs: demo
                .and_then(|d| d.duration_secs)
                .unwrap_or(default.demo.duration_secs),
            min_event_delay_ms: demo
                .and_then(|d| d.min_event_delay_ms)
                .unwrap_or(default.demo.min_event_delay_ms),
            max_event_delay_ms: demo
                .and_then(|d| d.max_event_delay_ms)
                .unwrap_or(default.demo.max_event_delay_ms),
            failure_rate: demo
                .and_then(|d| d.failure_rate)
                .unwrap_or(default.demo.failure_rate),
            log_level: demo
                .and_then(|d| d.log_level.clone())
                .unwrap_or(default.demo.log_level),
        },
    })
}

#[cfg(test)]
mod tests;
