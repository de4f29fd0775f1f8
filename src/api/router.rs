//! HTTP router.
//!
//! Push subscriptions may be configured against `/pubsub` or the service
//! root; both routes run the same handler.

use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Build the ingress router.
pub fn api_router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/pubsub", post(endpoints::pubsub::receive))
        .route("/", post(endpoints::pubsub::receive))
        .route("/health", get(endpoints::health::check))
        .with_state(ctx)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}
