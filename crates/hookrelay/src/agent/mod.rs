//! Agent side: the socket to the hub and what happens to each delivery.

mod dispatch;
mod forward;
mod socket;

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub use dispatch::{
    DispatchOptions, DispatchOutcome, Dispatcher, EventFilter, delivery_file_name,
};
pub use forward::Forwarder;
pub use socket::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_PING_INTERVAL, DeliverySocket, FrameReader, Keepalive,
    ReadOutcome, SocketCloser, socket_url,
};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("unsupported hub URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tungstenite::Error>,
    },

    #[error("timed out connecting to {url} after {after:?}")]
    ConnectTimeout { url: String, after: Duration },

    #[error("failed to close socket: {0}")]
    Close(#[source] Box<tungstenite::Error>),

    #[error("close frame not written after {0:?}")]
    CloseTimeout(Duration),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
