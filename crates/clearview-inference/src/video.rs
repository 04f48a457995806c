//! Video generation backend trait and operation types.
//!
//! Generation is a long-running operation: `submit` returns a handle, `poll`
//! refreshes it until `done`, and `download` fetches the finished asset.

use async_trait::async_trait;
use clearview_core::Result;
use serde::{Deserialize, Serialize};

/// Per-request generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoGenerationConfig {
    pub aspect_ratio: String,
    pub negative_prompt: Option<String>,
}

impl Default for VideoGenerationConfig {
    fn default() -> Self {
        Self {
            aspect_ratio: clearview_core::defaults::VEO_ASPECT_RATIO.to_string(),
            negative_prompt: Some(
                "text overlays, captions, medical instruments, surgery footage".to_string(),
            ),
        }
    }
}

/// A finished asset reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAsset {
    pub uri: String,
    pub mime_type: Option<String>,
}

/// Snapshot of a long-running generation operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoOperation {
    /// Provider-assigned operation name, used for polling.
    pub name: String,
    pub done: bool,
    /// Present once `done` and the provider produced a sample.
    pub asset: Option<VideoAsset>,
    /// Provider-reported failure for a finished operation.
    pub error: Option<String>,
}

impl VideoOperation {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            asset: None,
            error: None,
        }
    }

    pub fn completed(name: impl Into<String>, asset: Option<VideoAsset>) -> Self {
        Self {
            name: name.into(),
            done: true,
            asset,
            error: None,
        }
    }
}

/// Backend for generating short videos from a text prompt.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    /// Start a generation job.
    async fn submit(&self, prompt: &str, config: &VideoGenerationConfig) -> Result<VideoOperation>;

    /// Refresh an operation's state.
    async fn poll(&self, operation: &VideoOperation) -> Result<VideoOperation>;

    /// Fetch the bytes of a finished asset.
    async fn download(&self, asset: &VideoAsset) -> Result<Vec<u8>>;

    /// Model name, for logging.
    fn model_name(&self) -> &str;
}
