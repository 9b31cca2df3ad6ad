// # Tailscale Device Directory
//
// This crate provides a Tailscale implementation of DeviceDirectory for the
// meshdns reconciliation engine.
//
// ## Behavior
//
// - One HTTP request per `list_devices` call
// - Fixed 30 second client timeout; no retries (the engine resyncs on a schedule)
// - Errors carry the HTTP status, never the API key
//
// ## Security Requirements
//
// - API key NEVER appears in logs or `Debug` output
// - Construction fails fast if the key or tailnet is empty
//
// ## API Reference
//
// - List devices: GET `/api/v2/tailnet/:tailnet/devices`
//   ```json
//   { "devices": [ { "name": "laptop.tail1234.ts.net", "hostname": "laptop",
//                    "addresses": ["100.64.0.5", "fd7a:115c:a1e0::5"], "online": true } ] }
//   ```

use async_trait::async_trait;
use meshdns_core::traits::{Device, DeviceDirectory};
use meshdns_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Tailscale API base URL
pub const DEFAULT_API_BASE: &str = "https://api.tailscale.com";

/// Timeout for every API request
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    devices: Vec<Device>,
}

/// Device directory backed by the Tailscale API
pub struct TailscaleDirectory {
    /// ⚠️ NEVER log this value
    api_key: String,
    tailnet: String,
    base_url: String,
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for TailscaleDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailscaleDirectory")
            .field("api_key", &"<REDACTED>")
            .field("tailnet", &self.tailnet)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl TailscaleDirectory {
    /// Create a directory for `tailnet` against the public API
    pub fn new(api_key: impl Into<String>, tailnet: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, tailnet, DEFAULT_API_BASE)
    }

    /// Create a directory against a custom API endpoint
    pub fn with_base_url(
        api_key: impl Into<String>,
        tailnet: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        let tailnet = tailnet.into();

        if api_key.trim().is_empty() {
            return Err(Error::config("Tailscale API key cannot be empty"));
        }
        if tailnet.trim().is_empty() {
            return Err(Error::config("Tailscale tailnet cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::directory(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            tailnet,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// URL of the device listing endpoint
    pub fn devices_url(&self) -> String {
        format!("{}/api/v2/tailnet/{}/devices", self.base_url, self.tailnet)
    }
}

/// Decode a device listing response body
pub fn parse_devices(body: &str) -> Result<Vec<Device>> {
    let response: DevicesResponse = serde_json::from_str(body)
        .map_err(|e| Error::directory(format!("Failed to parse device list: {}", e)))?;
    Ok(response.devices)
}

#[async_trait]
impl DeviceDirectory for TailscaleDirectory {
    async fn list_devices(&self) -> Result<Vec<Device>> {
        let url = self.devices_url();
        tracing::debug!("Fetching devices from {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::directory(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => Error::directory(format!(
                    "Authentication failed: invalid API key or insufficient permissions. Status: {}",
                    status
                )),
                404 => Error::directory(format!("Tailnet not found: {}", self.tailnet)),
                429 => Error::directory(format!("Rate limit exceeded. Status: {}", status)),
                _ => Error::directory(format!("API request failed with status {}", status)),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::directory(format!("Failed to read response: {}", e)))?;

        let devices = parse_devices(&body)?;
        tracing::debug!("Retrieved {} devices from Tailscale", devices.len());
        Ok(devices)
    }

    fn directory_name(&self) -> &'static str {
        "tailscale"
    }
}
