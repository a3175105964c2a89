//! Persistent connection from the agent to the hub.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, StreamExt};
use hookrelay_protocol::{DeliveryEnvelope, MAX_FRAME_BYTES};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tokio_util::sync::CancellationToken;

use super::AgentError;
use super::dispatch::Dispatcher;

/// Default keepalive period.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Default limit on the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lower bound on the keepalive period.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(10);

/// A ping that cannot be written within this long is abandoned.
const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest wait for the close frame to be written.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Derive the socket URL from a hook URL (`https:` → `wss:`, `http:` → `ws:`).
pub fn socket_url(hook_url: &str) -> Result<String, AgentError> {
    if let Some(rest) = hook_url.strip_prefix("https:") {
        Ok(format!("wss:{rest}"))
    } else if let Some(rest) = hook_url.strip_prefix("http:") {
        Ok(format!("ws:{rest}"))
    } else {
        Err(AgentError::UnsupportedScheme(hook_url.to_string()))
    }
}

/// Why the read loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The hub closed the socket or the stream ended.
    Closed,
    /// A transport-level read failed.
    Failed(String),
}

/// An open socket to the hub with its keepalive already running.
pub struct DeliverySocket {
    url: String,
    sink: Arc<Mutex<WsSink>>,
    source: WsSource,
    keepalive: Keepalive,
}

impl DeliverySocket {
    /// Dial the hub at the socket URL derived from `hook_url`, giving up
    /// after `connect_timeout`.
    ///
    /// Frames up to [`MAX_FRAME_BYTES`] are accepted so the largest delivery
    /// GitHub sends fits in one message.
    pub async fn connect(
        hook_url: &str,
        ping_interval: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, AgentError> {
        let url = socket_url(hook_url)?;
        debug!("Dialing hub at {}", url);

        let config = WebSocketConfig::default()
            .max_message_size(Some(MAX_FRAME_BYTES))
            .max_frame_size(Some(MAX_FRAME_BYTES));
        let dial = connect_async_with_config(url.as_str(), Some(config), false);

        let (stream, response) = tokio::time::timeout(connect_timeout, dial)
            .await
            .map_err(|_| AgentError::ConnectTimeout {
                url: url.clone(),
                after: connect_timeout,
            })?
            .map_err(|e| AgentError::Connect {
                url: url.clone(),
                source: Box::new(e),
            })?;
        info!("Connected to hub (HTTP {})", response.status());

        let (sink, source) = stream.split();
        let sink = Arc::new(Mutex::new(sink));
        let keepalive = Keepalive::spawn(Arc::clone(&sink), ping_interval);

        Ok(Self {
            url,
            sink,
            source,
            keepalive,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Split into independently owned handles so each can be torn down on
    /// its own.
    pub fn into_parts(self) -> (Keepalive, SocketCloser, FrameReader) {
        (
            self.keepalive,
            SocketCloser { sink: self.sink },
            FrameReader {
                source: self.source,
            },
        )
    }
}

/// Periodic ping task with an explicit stop signal.
pub struct Keepalive {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl Keepalive {
    fn spawn<S>(sink: Arc<Mutex<S>>, every: Duration) -> Self
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let every = every.max(MIN_PING_INTERVAL);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick fires immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let ping = async {
                    let mut sink = sink.lock().await;
                    sink.send(Message::Ping(Default::default())).await
                };
                // A write stuck on a dead peer must not hold up stop().
                tokio::select! {
                    _ = token.cancelled() => break,
                    sent = tokio::time::timeout(PING_TIMEOUT, ping) => match sent {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("Websocket ping error: {}", e),
                        Err(_) => warn!("Websocket ping not written after {:?}", PING_TIMEOUT),
                    },
                }
            }
            debug!("Keepalive stopped");
        });

        Self { stop, task }
    }

    /// A handle that stops the ticker when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Stop the ticker and wait for it to exit.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            warn!("Keepalive task ended abnormally: {}", e);
        }
    }
}

/// Write half of the socket, used to send the close frame.
#[derive(Clone)]
pub struct SocketCloser {
    sink: Arc<Mutex<WsSink>>,
}

impl SocketCloser {
    pub async fn close(&self) -> Result<(), AgentError> {
        let closing = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
            Ok(closed) => closed.map_err(|e| AgentError::Close(Box::new(e))),
            Err(_) => Err(AgentError::CloseTimeout(CLOSE_TIMEOUT)),
        }
    }
}

/// Read half of the socket.
pub struct FrameReader {
    source: WsSource,
}

impl FrameReader {
    /// Read frames and hand each decoded envelope to `dispatcher` until the
    /// transport fails or the hub closes the socket.
    ///
    /// Non-text frames are ignored. A text frame that is not a valid envelope
    /// is logged and skipped.
    pub async fn run(mut self, dispatcher: &mut Dispatcher) -> ReadOutcome {
        while let Some(msg) = self.source.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Websocket read error: {}", e);
                    return ReadOutcome::Failed(e.to_string());
                }
            };

            let text = match msg {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    info!("Hub closed the socket: {:?}", frame);
                    return ReadOutcome::Closed;
                }
                _ => continue,
            };

            match DeliveryEnvelope::from_frame(text.as_str()) {
                Ok(envelope) => {
                    dispatcher.dispatch(text.as_str(), envelope).await;
                }
                Err(e) => warn!("JSON error: {}", e),
            }
        }

        info!("Hub stream ended");
        ReadOutcome::Closed
    }
}
