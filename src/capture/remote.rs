//! Remote streaming camera over HTTP
//!
//! - `GET capture` → `{ "success": true, "image": <base64 JPEG> }`
//! - `GET status`  → `{ "online": true }`
//! - `stream`      → MJPEG preview, pulled by the presentation layer

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::RemoteCamera;
use crate::error::CaptureError;
use crate::gateway::http::endpoint;
use crate::health::{HealthCheck, Reachability};
use crate::state::data::ImagePayload;

#[derive(Debug, Clone)]
pub struct HttpRemoteCamera {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    #[serde(default)]
    success: bool,
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    online: bool,
}

impl HttpRemoteCamera {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

fn decode_capture(response: CaptureResponse) -> Result<ImagePayload, CaptureError> {
    match response.image {
        Some(image) if response.success && !image.is_empty() => ImagePayload::from_base64(&image)
            .map_err(|e| CaptureError::RemoteCapture(format!("undecodable frame: {}", e))),
        _ => Err(CaptureError::RemoteCapture("device returned no frame".into())),
    }
}

#[async_trait]
impl RemoteCamera for HttpRemoteCamera {
    async fn capture(&self) -> Result<ImagePayload, CaptureError> {
        let url = endpoint(&self.base_url, "capture");
        debug!("Requesting still from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CaptureError::RemoteCapture(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CaptureError::RemoteCapture(format!("HTTP {}", status.as_u16())));
        }

        let body: CaptureResponse = response
            .json()
            .await
            .map_err(|e| CaptureError::RemoteCapture(e.to_string()))?;
        decode_capture(body)
    }

    fn preview_url(&self) -> String {
        endpoint(&self.base_url, "stream")
    }
}

#[async_trait]
impl HealthCheck for HttpRemoteCamera {
    async fn check(&self) -> Reachability {
        let response = match self.client.get(endpoint(&self.base_url, "status")).send().await {
            Ok(response) if response.status().is_success() => response,
            _ => return Reachability::Offline,
        };
        match response.json::<StatusResponse>().await {
            Ok(StatusResponse { online: true }) => Reachability::Online,
            _ => Reachability::Offline,
        }
    }
}
