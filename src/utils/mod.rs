//! The `utils` module provides the shared pieces used across `ackbus`:
//! the error taxonomy and logging setup.

pub mod error;
pub mod logging;

pub use error::{BrokerError, HandlerError, PushError};

#[cfg(test)]
mod tests {
    use super::error::BrokerError;
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
    }

    #[test]
    fn broker_error_messages_name_the_resource() {
        let err = BrokerError::UnknownTopic("nba-game-events".to_string());
        assert_eq!(err.to_string(), "unknown topic: nba-game-events");

        let err = BrokerError::WrongDeliveryMode {
            subscription: "fantasy".to_string(),
            expected: "pull",
        };
        assert_eq!(err.to_string(), "subscription fantasy is not a pull subscription");
    }
}
