//! Pub/Sub push endpoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, PushResponse};
use crate::pipeline::decode_push_body;

/// `POST /pubsub`: one push delivery.
///
/// 200 acknowledges (processed, ignored or missing entry), 400 rejects a
/// malformed envelope, 500 asks the broker to redeliver.
pub async fn receive(
    State(ctx): State<ApiContext>,
    body: Bytes,
) -> Result<Json<PushResponse>, ApiError> {
    let (envelope, event) = decode_push_body(&body)?;
    let message_id = envelope.message.message_id;

    tracing::debug!(
        message_id = message_id.as_deref().unwrap_or(""),
        publish_time = envelope.message.publish_time.as_deref().unwrap_or(""),
        subscription = envelope.subscription.as_deref().unwrap_or(""),
        event_type = %event.event_type,
        "Push message received"
    );

    // Run detached so a dropped connection does not cancel a half-done update
    let handler = ctx.handler.clone();
    let outcome = tokio::spawn(async move { handler.handle_event(event).await })
        .await
        .map_err(|e| ApiError::Internal(format!("handler task failed: {e}")))??;

    Ok(Json(PushResponse::new(outcome, message_id)))
}
