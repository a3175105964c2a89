//! The frame pushed from hub to agent.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// One GitHub delivery as relayed over the socket.
///
/// `payload` is the request body exactly as GitHub sent it. The relay never
/// looks inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEnvelope {
    /// Event name taken from the `X-GitHub-Event` header.
    pub event: String,

    /// Unparsed JSON body.
    pub payload: Box<RawValue>,
}

impl DeliveryEnvelope {
    pub fn new(event: impl Into<String>, payload: Box<RawValue>) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Decode a text frame received from the hub.
    pub fn from_frame(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Encode as a text frame.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Raw payload bytes, suitable as an outbound request body.
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.get().as_bytes()
    }
}
