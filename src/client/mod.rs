//! The `client` module holds the consumer- and producer-side pieces that sit
//! on top of the broker: the handler contract, the flow-controlled pull
//! consumer runtime and a topic-bound publisher.

pub mod handler;
pub mod publisher;
pub mod pull;

pub use handler::{HandlerResult, MessageHandler, Outcome};
pub use publisher::Publisher;
pub use pull::{ConsumerHandle, ConsumerReport, FlowControl, PullConsumer};

#[cfg(test)]
mod tests;
