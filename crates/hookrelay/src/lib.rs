//! Receive GitHub webhooks on a machine without a public address.
//!
//! Two halves share this crate:
//!
//! - [`hub`]: a public relay. GitHub posts deliveries to `/{key}`, and every
//!   WebSocket subscribed to that key receives them.
//! - [`agent`] and [`lifecycle`]: the local side. A session registers a
//!   repository webhook pointing at a fresh key on the hub, listens on the
//!   matching socket, handles each delivery, and removes the webhook again
//!   on exit.

pub mod agent;
pub mod config;
pub mod credentials;
pub mod github;
pub mod hub;
pub mod key;
pub mod lifecycle;
pub mod remote;
