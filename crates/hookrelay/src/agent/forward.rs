//! Re-posting deliveries to a local endpoint.

use std::time::Duration;

use hookrelay_protocol::{DELIVERY_HEADER, DeliveryEnvelope, EVENT_HEADER};
use log::{info, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::AgentError;

/// Sends each delivery's payload to a secondary URL the way GitHub would.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    url: String,
}

impl Forwarder {
    pub fn new(url: &str) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post the raw payload with the event header restored and a fresh
    /// delivery id. The response body is drained and discarded.
    pub async fn forward(&self, envelope: &DeliveryEnvelope) -> Result<StatusCode, reqwest::Error> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(DELIVERY_HEADER, Uuid::new_v4().to_string())
            .header(EVENT_HEADER, envelope.event.as_str())
            .body(envelope.payload_bytes().to_vec())
            .send()
            .await?;

        let status = response.status();
        let _ = response.bytes().await;
        Ok(status)
    }

    /// Forward on a detached task; the outcome is only logged.
    pub fn spawn(&self, envelope: DeliveryEnvelope) -> JoinHandle<()> {
        let forwarder = self.clone();
        tokio::spawn(async move {
            match forwarder.forward(&envelope).await {
                Ok(status) => info!("Forwarded {} response: {}", envelope.event, status),
                Err(e) => warn!("Forward of {} to {} failed: {}", envelope.event, forwarder.url, e),
            }
        })
    }
}
