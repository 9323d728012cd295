//! Inbound HTTP surface the backend pushes notifications to.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::platform::ChatPlatform;

#[derive(Clone)]
pub struct NotificationState {
    chat: Arc<dyn ChatPlatform>,
    channel: Arc<str>,
}

impl NotificationState {
    pub fn new(chat: Arc<dyn ChatPlatform>, channel: &str) -> Self {
        Self {
            chat,
            channel: Arc::from(channel),
        }
    }
}

pub fn router(state: NotificationState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/notification", post(notification))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "message": "Hello World" }))
}

/// Post the body verbatim to the notification channel.
///
/// Always answers 200 with an empty body; a failed post is only logged.
async fn notification(State(state): State<NotificationState>, body: String) -> StatusCode {
    debug!("Notification of {} bytes for {}", body.len(), state.channel);

    if let Err(e) = state.chat.post_message(&state.channel, &body).await {
        error!("Failed to post notification to {}: {}", state.channel, e);
    }
    StatusCode::OK
}
