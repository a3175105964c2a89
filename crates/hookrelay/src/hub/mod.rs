//! Public relay hub.
//!
//! GitHub posts deliveries to `/{key}`; agents hold a WebSocket open on the
//! same path and receive every delivery for their key as a
//! [`DeliveryEnvelope`](hookrelay_protocol::DeliveryEnvelope) text frame.

mod error;
mod handler;
mod registry;

use std::future::Future;
use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit, routing::get};
use hookrelay_protocol::MAX_PAYLOAD_BYTES;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub use error::HubError;
pub use registry::{ConnId, Hub, Subscription};

/// Build the hub's router around a shared [`Hub`].
pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/health", get(handler::health))
        .route("/{key}", get(handler::subscribe).post(handler::deliver))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

/// Serve the hub on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, hub: Arc<Hub>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(hub))
        .with_graceful_shutdown(shutdown)
        .await
}
