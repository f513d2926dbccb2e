//! The `transport` module implements both sides of push delivery over HTTP.
//!
//! It defines the JSON envelope exchanged between broker and endpoint, the
//! axum-based push endpoint that turns a handler outcome into a status code,
//! and the dispatcher that claims push leases and POSTs them with `reqwest`.

pub mod dispatcher;
pub mod endpoint;
pub mod message;

pub use dispatcher::PushDispatcher;
pub use endpoint::{handle_push, push_router, serve, serve_on};
pub use message::{PushEnvelope, PushMessage, PushedMessage};

#[cfg(test)]
mod tests;
