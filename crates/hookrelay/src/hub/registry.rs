//! Keyed subscriber registry and broadcast fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hookrelay_protocol::DeliveryEnvelope;
use log::{debug, info, warn};
use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TrySendError;

/// Size of the per-connection send buffer.
const CONNECTION_BUFFER_SIZE: usize = 64;

/// Identifies one subscriber socket for its whole lifetime.
pub type ConnId = u64;

/// A sender for encoded frames to a specific subscriber.
pub type FrameSender = mpsc::Sender<String>;

/// Handle returned to a newly registered subscriber.
///
/// The socket's writer task drains `frames`; the read loop hands `id` back to
/// [`Hub::unregister`] once the socket fails.
#[derive(Debug)]
pub struct Subscription {
    pub id: ConnId,
    pub frames: mpsc::Receiver<String>,
}

/// Relay hub: maps relay keys to the sockets currently listening on them.
///
/// The hub is responsible for:
/// - Tracking open subscriber connections per key
/// - Fanning a delivery out to every subscriber of its key
///
/// A single lock guards the whole map. It is held for inserts, removals,
/// counts, and the enqueue loop of a broadcast, never for a socket write.
/// A failed enqueue does not remove the subscriber; only its read loop does.
#[derive(Debug, Default)]
pub struct Hub {
    /// Relay key -> connection id -> frame sender
    subscribers: Mutex<HashMap<String, HashMap<ConnId, FrameSender>>>,

    next_id: AtomicU64,

    /// Fan-outs started.
    broadcasts: AtomicU64,

    /// Frames successfully queued to a subscriber.
    writes: AtomicU64,
}

impl Hub {
    /// Create a new, empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber under `key`.
    pub async fn register(&self, key: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER_SIZE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock().await;
        subscribers.entry(key.to_string()).or_default().insert(id, tx);
        info!("Registered subscriber {} on key {}", id, key);

        Subscription { id, frames: rx }
    }

    /// Remove a subscriber. Returns whether it was present.
    pub async fn unregister(&self, key: &str, id: ConnId) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let Some(conns) = subscribers.get_mut(key) else {
            return false;
        };

        let removed = conns.remove(&id).is_some();
        if conns.is_empty() {
            subscribers.remove(key);
        }
        if removed {
            info!("Unregistered subscriber {} on key {}", id, key);
        }
        removed
    }

    /// Open subscribers across all keys.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.values().map(HashMap::len).sum()
    }

    /// Keys with at least one subscriber.
    pub async fn key_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Connection ids currently registered under `key`, sorted.
    pub async fn subscribers_for(&self, key: &str) -> Vec<ConnId> {
        let subscribers = self.subscribers.lock().await;
        let mut ids: Vec<ConnId> = subscribers
            .get(key)
            .map(|conns| conns.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Queue `envelope` on every subscriber of `key`.
    ///
    /// Returns how many subscribers accepted the frame. A full or closed queue
    /// is logged and skipped.
    pub async fn broadcast(&self, key: &str, envelope: &DeliveryEnvelope) -> usize {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);

        let frame = match envelope.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to serialize {} delivery: {}", envelope.event, e);
                return 0;
            }
        };

        let subscribers = self.subscribers.lock().await;
        let Some(conns) = subscribers.get(key) else {
            debug!("No subscribers on key {} for {} delivery", key, envelope.event);
            return 0;
        };

        let mut delivered = 0;
        for (id, tx) in conns {
            match tx.try_send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    self.writes.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} on key {} is not keeping up, dropped frame", id, key);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Subscriber {} on key {} has no writer, dropped frame", id, key);
                }
            }
        }

        debug!(
            "Broadcast {} delivery to {}/{} subscribers on key {}",
            envelope.event,
            delivered,
            conns.len(),
            key
        );
        delivered
    }

    /// Run [`Hub::broadcast`] on a detached task.
    pub fn spawn_broadcast(self: &Arc<Self>, key: String, envelope: DeliveryEnvelope) {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            hub.broadcast(&key, &envelope).await;
        });
    }

    /// Number of fan-outs started since the hub was created.
    pub fn broadcast_count(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }

    /// Number of frames queued to subscribers since the hub was created.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::value::RawValue;

    fn envelope(event: &str, payload: &str) -> DeliveryEnvelope {
        DeliveryEnvelope::new(event, RawValue::from_string(payload.to_string()).unwrap())
    }

    #[tokio::test]
    async fn test_broadcast_stays_within_key() {
        let hub = Hub::new();
        let mut on_a = hub.register("aaa").await;
        let mut on_b = hub.register("bbb").await;

        let delivered = hub.broadcast("aaa", &envelope("push", "{}")).await;

        assert_eq!(delivered, 1);
        assert_eq!(
            on_a.frames.try_recv().unwrap(),
            r#"{"event":"push","payload":{}}"#
        );
        assert!(on_b.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber_of_key() {
        let hub = Hub::new();
        let mut first = hub.register("key").await;
        let mut second = hub.register("key").await;

        assert_eq!(hub.broadcast("key", &envelope("ping", r#"{"zen":"x"}"#)).await, 2);
        assert!(first.frames.try_recv().is_ok());
        assert!(second.frames.try_recv().is_ok());
        assert_eq!(hub.write_count(), 2);
    }

    #[tokio::test]
    async fn test_closed_subscriber_does_not_block_others_and_is_not_pruned() {
        let hub = Hub::new();
        let dead = hub.register("key").await;
        let mut alive = hub.register("key").await;
        drop(dead.frames);

        assert_eq!(hub.broadcast("key", &envelope("push", "1")).await, 1);
        assert!(alive.frames.try_recv().is_ok());
        // Only the read loop prunes.
        assert_eq!(hub.subscribers_for("key").await, vec![dead.id, alive.id]);
    }

    #[tokio::test]
    async fn test_register_unregister_cycles_leave_only_open_connections() {
        let hub = Hub::new();
        let keeper = hub.register("key").await;

        for _ in 0..10 {
            let sub = hub.register("key").await;
            assert_eq!(hub.subscribers_for("key").await, vec![keeper.id, sub.id]);
            assert!(hub.unregister("key", sub.id).await);
            assert_eq!(hub.subscribers_for("key").await, vec![keeper.id]);
        }

        assert!(hub.unregister("key", keeper.id).await);
        assert_eq!(hub.key_count().await, 0);
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_wrong_key_is_noop() {
        let hub = Hub::new();
        let sub = hub.register("key").await;

        assert!(!hub.unregister("other", sub.id).await);
        assert!(!hub.unregister("key", sub.id + 1).await);
        assert_eq!(hub.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let hub = Hub::new();
        assert_eq!(hub.broadcast("nobody", &envelope("push", "{}")).await, 0);
        assert_eq!(hub.broadcast_count(), 1);
        assert_eq!(hub.write_count(), 0);
    }
}
