// Upstream collaborators: the birdnest telemetry feed (XML) and the drone
// registry (JSON). Both are thin reqwest wrappers; nothing here touches the store.

pub mod registry;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::errors::TransportError;
use crate::models::snapshot::RawCapture;

const SERVICE: &str = "birdnest API";

#[derive(Debug, Deserialize)]
struct RawReport {
    capture: RawCapture,
}

/// Where poll cycles get their captures from.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn fetch_capture(&self) -> Result<RawCapture, TransportError>;
}

/// Client for the birdnest feed. Every request is bounded by `timeout`.
#[derive(Clone)]
pub struct FeedClient {
    client: Client,
    url: String,
    timeout: Duration,
}

impl FeedClient {
    pub fn new(client: Client, url: String, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }
}

#[async_trait]
impl CaptureSource for FeedClient {
    /// GETs the feed and decodes the capture it contains.
    async fn fetch_capture(&self) -> Result<RawCapture, TransportError> {
        let body = get_text(&self.client, &self.url, self.timeout, SERVICE).await?;
        decode_report(&body)
    }
}

/// Shared GET used by both upstream clients.
pub(crate) async fn get_text(
    client: &Client,
    url: &str,
    timeout: Duration,
    service: &'static str,
) -> Result<String, TransportError> {
    let timed_out = |e: reqwest::Error| {
        if e.is_timeout() {
            TransportError::Timeout {
                service,
                millis: timeout.as_millis(),
            }
        } else {
            TransportError::Http(e)
        }
    };

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(timed_out)?;

    let status = response.status();
    info!("Response from {service}: {status}");
    if !status.is_success() {
        return Err(TransportError::Status {
            service,
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(timed_out)
}

/// Decodes a `<report>` document into its capture. Unknown elements are ignored.
pub fn decode_report(xml: &str) -> Result<RawCapture, TransportError> {
    quick_xml::de::from_str::<RawReport>(xml)
        .map(|report| report.capture)
        .map_err(|e| TransportError::Decode {
            service: SERVICE,
            message: e.to_string(),
        })
}
