//! What the agent does with each delivery it receives.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use hookrelay_protocol::DeliveryEnvelope;
use log::{info, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::AgentError;
use super::forward::Forwarder;

/// Event-name allow list. Empty means every event passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter(BTreeSet<String>);

impl EventFilter {
    pub fn new<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            events
                .into_iter()
                .map(Into::into)
                .filter(|e: &String| !e.is_empty())
                .collect(),
        )
    }

    pub fn allows(&self, event: &str) -> bool {
        self.0.is_empty() || self.0.contains(event)
    }
}

/// Agent-side handling switches.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    pub filter: EventFilter,
    /// Re-indent frames before printing and saving.
    pub pretty: bool,
    /// Save each delivery as `{nanos}.{event}.json` in this directory.
    pub save_dir: Option<PathBuf>,
    /// Re-post each delivery's payload to this URL.
    pub forward_url: Option<String>,
}

/// Result of handling one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Dropped by the event filter.
    Skipped,
    Delivered {
        saved: Option<PathBuf>,
        forwarded: bool,
    },
}

/// Filters, prints, saves and forwards deliveries.
pub struct Dispatcher {
    options: DispatchOptions,
    forwarder: Option<Forwarder>,
    out: Box<dyn AsyncWrite + Send + Unpin>,
}

impl Dispatcher {
    pub fn new(
        options: DispatchOptions,
        out: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Result<Self, AgentError> {
        let forwarder = options
            .forward_url
            .as_deref()
            .map(Forwarder::new)
            .transpose()?;

        Ok(Self {
            options,
            forwarder,
            out,
        })
    }

    /// Dispatcher printing to the process's stdout.
    pub fn stdout(options: DispatchOptions) -> Result<Self, AgentError> {
        Self::new(options, Box::new(tokio::io::stdout()))
    }

    /// Handle one decoded envelope. `raw` is the frame text it was decoded from.
    ///
    /// Output and save failures are logged; forwarding runs on its own task
    /// and is never awaited.
    pub async fn dispatch(&mut self, raw: &str, envelope: DeliveryEnvelope) -> DispatchOutcome {
        info!("Received event: {}", envelope.event);

        if !self.options.filter.allows(&envelope.event) {
            info!("Skipped: {}", envelope.event);
            return DispatchOutcome::Skipped;
        }

        let text = if self.options.pretty {
            pretty_frame(raw).unwrap_or_else(|| raw.to_string())
        } else {
            raw.to_string()
        };

        if let Err(e) = self.emit(&text).await {
            warn!("Output error: {}", e);
        }

        let saved = match &self.options.save_dir {
            Some(dir) => save_delivery(dir, &envelope.event, &text).await,
            None => None,
        };

        let forwarded = match &self.forwarder {
            Some(forwarder) => {
                forwarder.spawn(envelope);
                true
            }
            None => false,
        };

        DispatchOutcome::Delivered { saved, forwarded }
    }

    async fn emit(&mut self, text: &str) -> std::io::Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await
    }
}

/// Re-indent a frame, payload included, keeping key order and number
/// literals exactly as sent.
fn pretty_frame(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    serde_json::to_string_pretty(&value).ok()
}

/// File name for a delivery received now.
///
/// The event name comes off the wire, so anything outside `[A-Za-z0-9_-]` is
/// replaced before it reaches the filesystem.
pub fn delivery_file_name(event: &str) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let event: String = event
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{nanos}.{event}.json")
}

async fn save_delivery(dir: &Path, event: &str, text: &str) -> Option<PathBuf> {
    let path = dir.join(delivery_file_name(event));
    match tokio::fs::write(&path, text).await {
        Ok(()) => Some(path),
        Err(e) => {
            warn!("File save error for {}: {}", path.display(), e);
            None
        }
    }
}
