//! Handler contract shared by the pull runtime and the push endpoint.
//!
//! A handler inspects one message and answers `Ack` or `Nack`. Returning an
//! error, or panicking, counts as `Nack`. Handlers may block: they always run
//! on tokio's blocking pool, never on the broker lock.

use std::sync::Arc;

use crate::broker::Message;
use crate::utils::HandlerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    Nack,
}

pub type HandlerResult = Result<Outcome, HandlerError>;

pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: &Message, delivery_attempt: u32) -> HandlerResult;
}

impl<F> MessageHandler for F
where
    F: Fn(&Message, u32) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, message: &Message, delivery_attempt: u32) -> HandlerResult {
        self(message, delivery_attempt)
    }
}

/// Runs `handler` on the blocking pool. A panic is reported as an error.
pub async fn run_handler(
    handler: Arc<dyn MessageHandler>,
    message: Arc<Message>,
    delivery_attempt: u32,
) -> HandlerResult {
    match tokio::task::spawn_blocking(move || handler.handle(&message, delivery_attempt)).await {
        Ok(result) => result,
        Err(e) => Err(format!("handler panicked: {e}").into()),
    }
}
