use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::errors::TransportError;
use crate::feed::get_text;
use crate::models::drone::PilotRecord;

const SERVICE: &str = "drone registry API";

/// Resolves the pilot who owns a drone.
#[async_trait]
pub trait PilotDirectory: Send + Sync {
    async fn lookup(&self, entity_id: &str) -> Result<PilotRecord, TransportError>;
}

/// HTTP client for the drone registry: `GET {base_url}/{serialNumber}`.
#[derive(Clone)]
pub struct RegistryClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RegistryClient {
    pub fn new(client: Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl PilotDirectory for RegistryClient {
    async fn lookup(&self, entity_id: &str) -> Result<PilotRecord, TransportError> {
        let url = format!("{}/{}", self.base_url, entity_id);
        let body = get_text(&self.client, &url, self.timeout, SERVICE).await?;
        decode_pilot(&body)
    }
}

/// Decodes a registry answer. `createdDt` and other extra fields are dropped.
pub fn decode_pilot(json: &str) -> Result<PilotRecord, TransportError> {
    serde_json::from_str(json).map_err(|e| TransportError::Decode {
        service: SERVICE,
        message: e.to_string(),
    })
}
