//! Wire types shared by the hookrelay hub and agent.
//!
//! The hub receives GitHub deliveries over HTTP and pushes them to agents over
//! a WebSocket as [`DeliveryEnvelope`] text frames. Both sides depend on this
//! crate so the frame shape cannot drift.

mod envelope;
mod replies;

pub use envelope::DeliveryEnvelope;
pub use replies::{AcceptedReply, ErrorReply, HealthReply};

/// Header carrying the GitHub delivery GUID.
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

/// Header carrying the GitHub event name (`push`, `pull_request`, ...).
pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// Largest delivery body the hub accepts. GitHub caps payloads at 25 MB.
pub const MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Largest frame an agent accepts: one full payload plus the envelope.
pub const MAX_FRAME_BYTES: usize = MAX_PAYLOAD_BYTES + 1024 * 1024;
