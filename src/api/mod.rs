//! HTTP ingress.
//!
//! The broker pushes messages to `POST /pubsub`; the router is composable
//! and `server` runs it with graceful shutdown.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_http_server, HttpServer};
pub use types::ApiContext;
