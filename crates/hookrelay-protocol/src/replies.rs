//! JSON bodies returned by the hub's HTTP endpoints.

use serde::{Deserialize, Serialize};

/// `200` reply to an accepted delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedReply {
    pub accepted: bool,
}

impl Default for AcceptedReply {
    fn default() -> Self {
        Self { accepted: true }
    }
}

/// `4xx` reply body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}

/// Hub liveness and registry size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReply {
    pub status: String,
    pub version: String,
    /// Keys with at least one subscriber.
    pub keys: usize,
    /// Open subscriber sockets across all keys.
    pub subscribers: usize,
}
