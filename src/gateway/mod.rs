//! External AI collaborators
//!
//! - `AnalysisGateway`: turns a captured still into an [`AnalysisResult`]
//! - `EnhancementGateway`: generates one enhancement image from a prompt
//!
//! `http.rs` holds the adapter for the kiosk backend.

pub mod http;

use async_trait::async_trait;

use crate::error::{AnalysisError, GenerationError};
use crate::state::data::{AnalysisResult, EnhancementPurpose, ImagePayload};

#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    async fn analyze(&self, image: &ImagePayload) -> Result<AnalysisResult, AnalysisError>;
}

#[async_trait]
pub trait EnhancementGateway: Send + Sync {
    /// Generate the image for `purpose`; called once per purpose per scan
    async fn generate(
        &self,
        purpose: EnhancementPurpose,
        prompt: &str,
    ) -> Result<ImagePayload, GenerationError>;
}
