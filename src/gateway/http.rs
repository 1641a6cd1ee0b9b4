//! HTTP adapter for the kiosk backend
//!
//! Endpoints (relative to the configured API base URL):
//! - `POST analyze/` `{ "image": <base64> }` → `{ "analysis": {...} }` or the bare analysis
//! - `POST generate/restored/` and `POST generate/3d/` `{ "prompt": ... }`
//!   → `{ "success": true, "image": <data URL> }`
//! - `GET health/`

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{AnalysisGateway, EnhancementGateway};
use crate::error::{AnalysisError, GenerationError};
use crate::health::{HealthCheck, Reachability};
use crate::state::data::{non_empty, AnalysisResult, EnhancementPurpose, ImagePayload, VrSceneInfo};

/// Build the shared HTTP client
///
/// Falls back to a client without timeout if the builder is rejected.
pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!("⚠️  Failed to configure HTTP client ({}), using defaults", e);
            reqwest::Client::new()
        })
}

/// Join a base URL and a path without doubling slashes
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Client for the analysis and enhancement backend
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn generate_path(purpose: EnhancementPurpose) -> &'static str {
        match purpose {
            EnhancementPurpose::Restoration => "generate/restored/",
            EnhancementPurpose::ThreeDDesign => "generate/3d/",
        }
    }
}

// ========== Wire formats ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisDto {
    #[serde(default)]
    name: String,
    #[serde(default)]
    era: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    usage: String,
    conservation_advice: Option<String>,
    visual_prompt: Option<String>,
    vr_scene: Option<String>,
    vr_scene_info: Option<VrSceneInfo>,
}

impl From<AnalysisDto> for AnalysisResult {
    fn from(dto: AnalysisDto) -> Self {
        let (vr_scene_id, vr_scene_info) =
            VrSceneInfo::resolve(dto.vr_scene.as_deref(), dto.vr_scene_info);
        AnalysisResult {
            name: dto.name,
            era: dto.era,
            description: dto.description,
            usage: dto.usage,
            conservation_advice: non_empty(dto.conservation_advice),
            visual_prompt: non_empty(dto.visual_prompt),
            vr_scene_id,
            vr_scene_info,
        }
    }
}

/// `{"analysis": {...}}` or just `{...}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnalysisEnvelope {
    Wrapped { analysis: AnalysisDto },
    Bare(AnalysisDto),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImageResponse {
    #[serde(default)]
    pub(crate) success: bool,
    pub(crate) image: Option<String>,
}

fn parse_analysis(body: &str) -> Result<AnalysisResult, AnalysisError> {
    let envelope: AnalysisEnvelope =
        serde_json::from_str(body).map_err(|e| AnalysisError::Malformed(e.to_string()))?;
    let dto = match envelope {
        AnalysisEnvelope::Wrapped { analysis } => analysis,
        AnalysisEnvelope::Bare(dto) => dto,
    };
    if dto.name.trim().is_empty() {
        return Err(AnalysisError::Malformed("analysis has no name".into()));
    }
    Ok(dto.into())
}

fn parse_generated(response: ImageResponse) -> Result<ImagePayload, GenerationError> {
    match response.image.filter(|_| response.success) {
        Some(image) if !image.is_empty() => {
            ImagePayload::from_base64(&image).map_err(|e| GenerationError::Malformed(e.to_string()))
        }
        _ => Err(GenerationError::Empty),
    }
}

#[async_trait]
impl AnalysisGateway for BackendClient {
    async fn analyze(&self, image: &ImagePayload) -> Result<AnalysisResult, AnalysisError> {
        let url = endpoint(&self.base_url, "analyze/");
        debug!("Submitting {} KB still to {}", image.bytes().len() / 1024, url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "image": image.to_base64() }))
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.detail)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            return Err(AnalysisError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        parse_analysis(&body)
    }
}

#[async_trait]
impl EnhancementGateway for BackendClient {
    async fn generate(
        &self,
        purpose: EnhancementPurpose,
        prompt: &str,
    ) -> Result<ImagePayload, GenerationError> {
        let url = endpoint(&self.base_url, Self::generate_path(purpose));
        debug!("Requesting {} image from {}", purpose, url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: ImageResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        parse_generated(body)
    }
}

#[async_trait]
impl HealthCheck for BackendClient {
    async fn check(&self) -> Reachability {
        match self.client.get(endpoint(&self.base_url, "health/")).send().await {
            Ok(response) if response.status().is_success() => Reachability::Online,
            Ok(response) => {
                debug!("Backend health returned HTTP {}", response.status());
                Reachability::Offline
            }
            Err(e) => {
                debug!("Backend health check failed: {}", e);
                Reachability::Offline
            }
        }
    }
}
