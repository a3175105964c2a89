//! HTTP and WebSocket handlers for the relay hub.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use hookrelay_protocol::{
    AcceptedReply, DELIVERY_HEADER, DeliveryEnvelope, EVENT_HEADER, HealthReply,
};
use log::{debug, info, warn};
use serde_json::value::RawValue;

use super::error::HubError;
use super::registry::{Hub, Subscription};

/// Inbound GitHub delivery.
///
/// POST /{key}
///
/// Replies as soon as the request is validated. The fan-out runs on its own
/// task and is skipped entirely while nobody is subscribed to any key.
pub async fn deliver(
    State(hub): State<Arc<Hub>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AcceptedReply>, HubError> {
    require_header(&headers, DELIVERY_HEADER)?;
    let event = require_header(&headers, EVENT_HEADER)?;

    let payload: Box<RawValue> = serde_json::from_slice(&body)?;
    let envelope = DeliveryEnvelope::new(event, payload);

    if hub.subscriber_count().await > 0 {
        hub.spawn_broadcast(key, envelope);
    } else {
        debug!("No subscribers, dropping {} delivery for {}", envelope.event, key);
    }

    Ok(Json(AcceptedReply::default()))
}

/// Subscriber socket.
///
/// GET /{key} (WebSocket upgrade)
pub async fn subscribe(
    State(hub): State<Arc<Hub>>,
    Path(key): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!("Connection upgrade error on key {}: {}", key, rejection);
            return rejection.into_response();
        }
    };

    ws.on_failed_upgrade(|e| warn!("Connection upgrade error: {}", e))
        .on_upgrade(move |socket| handle_subscriber(socket, hub, key))
}

/// Liveness plus registry size.
///
/// GET /health
pub async fn health(State(hub): State<Arc<Hub>>) -> Json<HealthReply> {
    Json(HealthReply {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        keys: hub.key_count().await,
        subscribers: hub.subscriber_count().await,
    })
}

fn require_header(headers: &HeaderMap, name: &'static str) -> Result<String, HubError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .ok_or(HubError::MissingHeader(name))
}

/// Drive one subscriber socket until it fails.
///
/// Inbound frames are read only to notice the socket going away. Frames queued
/// by broadcasts are written by a separate task so a stalled peer never holds
/// up the registry.
async fn handle_subscriber(socket: WebSocket, hub: Arc<Hub>, key: String) {
    let (mut sender, mut receiver) = socket.split();
    let Subscription { id, mut frames } = hub.register(&key).await;

    let writer_key = key.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if let Err(e) = sender.send(Message::Text(frame.into())).await {
                warn!(
                    "Write to subscriber {} on key {} failed: {}",
                    id, writer_key, e
                );
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                info!("Subscriber {} on key {} closed the socket", id, key);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Read error from subscriber {} on key {}: {}", id, key, e);
                break;
            }
        }
    }

    writer.abort();
    hub.unregister(&key, id).await;
}
