//! HTTP push endpoint
//!
//! Receives push envelopes on `POST /`, runs the handler and maps the outcome
//! to a status the broker understands:
//! - handler acked: `200`
//! - handler nacked, failed or panicked: `500`
//! - malformed envelope: `400`, handler not invoked

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::post,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::client::handler::{MessageHandler, Outcome, run_handler};
use crate::transport::message::PushEnvelope;

#[derive(Clone)]
pub struct PushState {
    handler: Arc<dyn MessageHandler>,
}

/// Router exposing the push receiver on `/`.
pub fn push_router(handler: Arc<dyn MessageHandler>) -> Router {
    Router::new()
        .route("/", post(receive_push))
        .with_state(PushState { handler })
}

async fn receive_push(State(state): State<PushState>, body: Bytes) -> (StatusCode, Json<Value>) {
    handle_push(state.handler, &body).await
}

/// Decodes one push body and runs `handler` on it.
///
/// Shared by [`push_router`] and services that mount the receiver next to
/// routes of their own.
pub async fn handle_push(handler: Arc<dyn MessageHandler>, body: &[u8]) -> (StatusCode, Json<Value>) {
    let pushed = match PushEnvelope::decode(body) {
        Ok(pushed) => pushed,
        Err(e) => {
            warn!("rejected push delivery: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "error", "detail": e.to_string() })),
            );
        }
    };

    let message_id = pushed.message.id;
    let outcome = run_handler(
        handler,
        Arc::new(pushed.message),
        pushed.delivery_attempt,
    )
    .await;

    match outcome {
        Ok(Outcome::Ack) => {
            debug!(message_id, "push delivery handled");
            (
                StatusCode::OK,
                Json(json!({ "status": "success", "messageId": message_id.to_string() })),
            )
        }
        Ok(Outcome::Nack) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "nack", "messageId": message_id.to_string() })),
        ),
        Err(e) => {
            warn!(message_id, "push handler failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "detail": format!("processing error: {e}") })),
            )
        }
    }
}

/// Serves `router` on `addr` until the listener fails.
pub async fn serve(addr: &str, router: Router) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, router).await
}

/// Like [`serve`], for a listener the caller already bound.
pub async fn serve_on(listener: TcpListener, router: Router) -> std::io::Result<()> {
    info!("push endpoint listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router).await
}
