//! Veo backend over the generative language long-running-operation API.
//!
//! - submit: `POST {base}/models/{model}:predictLongRunning`
//! - poll:   `GET {base}/{operation name}`
//! - download: `GET {sample uri}`
//!
//! All requests carry the key in `x-goog-api-key`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use clearview_core::{defaults, Error, Result};

use crate::video::{VideoAsset, VideoBackend, VideoGenerationConfig, VideoOperation};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Configuration for the Veo backend.
#[derive(Debug, Clone)]
pub struct VeoConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub aspect_ratio: String,
    pub timeout_seconds: u64,
}

impl VeoConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: defaults::VEO_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: defaults::VEO_MODEL.to_string(),
            aspect_ratio: defaults::VEO_ASPECT_RATIO.to_string(),
            timeout_seconds: defaults::VEO_TIMEOUT_SECS,
        }
    }

    /// Create from environment variables.
    /// Returns None if neither `VEO_API_KEY` nor `GEMINI_API_KEY` is set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("VEO_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty())?;

        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var("VEO_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("VEO_MODEL") {
            config.model = model;
        }
        if let Ok(ratio) = std::env::var("VEO_ASPECT_RATIO") {
            config.aspect_ratio = ratio;
        }
        if let Some(secs) = std::env::var("VEO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout_seconds = secs;
        }
        Some(config)
    }

    /// Generation parameters derived from this configuration.
    pub fn generation_config(&self) -> VideoGenerationConfig {
        VideoGenerationConfig {
            aspect_ratio: self.aspect_ratio.clone(),
            ..Default::default()
        }
    }
}

// --- wire types -------------------------------------------------------------

#[derive(Serialize)]
struct PredictRequest<'a> {
    instances: Vec<PredictInstance<'a>>,
    parameters: PredictParameters<'a>,
}

#[derive(Serialize)]
struct PredictInstance<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters<'a> {
    aspect_ratio: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    name: Option<String>,
    #[serde(default)]
    done: bool,
    response: Option<OperationResult>,
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResult {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    video: Option<SampleVideo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SampleVideo {
    uri: Option<String>,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    code: Option<i64>,
    message: Option<String>,
}

impl OperationResponse {
    fn into_operation(self, fallback_name: &str) -> VideoOperation {
        let asset = self
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|g| g.generated_samples.into_iter().next())
            .and_then(|s| s.video)
            .and_then(|v| {
                v.uri.map(|uri| VideoAsset {
                    uri,
                    mime_type: v.mime_type,
                })
            });
        let error = self.error.map(|e| {
            format!(
                "{} (code {})",
                e.message.unwrap_or_else(|| "operation failed".to_string()),
                e.code.unwrap_or_default()
            )
        });
        VideoOperation {
            name: self.name.unwrap_or_else(|| fallback_name.to_string()),
            done: self.done || error.is_some(),
            asset,
            error,
        }
    }
}

/// Veo video generation backend.
pub struct VeoBackend {
    client: Client,
    config: VeoConfig,
}

impl VeoBackend {
    pub fn new(config: VeoConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Inference(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "veo",
            model = %config.model,
            base_url = %config.base_url,
            "Initializing Veo backend"
        );
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &VeoConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Inference(format!(
            "Veo {} returned {}: {}",
            what, status, body
        )))
    }
}

#[async_trait]
impl VideoBackend for VeoBackend {
    async fn submit(&self, prompt: &str, config: &VideoGenerationConfig) -> Result<VideoOperation> {
        let request = PredictRequest {
            instances: vec![PredictInstance { prompt }],
            parameters: PredictParameters {
                aspect_ratio: &config.aspect_ratio,
                negative_prompt: config.negative_prompt.as_deref(),
            },
        };
        let url = self.url(&format!("models/{}:predictLongRunning", self.config.model));
        debug!(
            subsystem = "inference",
            component = "veo",
            op = "submit",
            prompt_len = prompt.len(),
            "Submitting video generation"
        );

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Veo submit failed: {}", e)))?;
        let response = Self::check(response, "submit").await?;

        let body: OperationResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse Veo operation: {}", e)))?;
        if body.name.is_none() {
            return Err(Error::Inference(
                "Veo submit response has no operation name".to_string(),
            ));
        }
        Ok(body.into_operation(""))
    }

    async fn poll(&self, operation: &VideoOperation) -> Result<VideoOperation> {
        let response = self
            .client
            .get(self.url(&operation.name))
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Veo poll failed: {}", e)))?;
        let response = Self::check(response, "poll").await?;

        let body: OperationResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse Veo operation: {}", e)))?;
        Ok(body.into_operation(&operation.name))
    }

    async fn download(&self, asset: &VideoAsset) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&asset.uri)
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Veo download failed: {}", e)))?;
        let response = Self::check(response, "download").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Inference(format!("Veo download failed: {}", e)))?;
        Ok(bytes.to_vec())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let config = VeoConfig::new("key");
        assert_eq!(config.model, defaults::VEO_MODEL);
        assert_eq!(config.base_url, defaults::VEO_BASE_URL);
        assert_eq!(config.generation_config().aspect_ratio, "16:9");
    }

    #[test]
    fn test_predict_request_shape() {
        let request = PredictRequest {
            instances: vec![PredictInstance { prompt: "a walk" }],
            parameters: PredictParameters {
                aspect_ratio: "16:9",
                negative_prompt: None,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["instances"][0]["prompt"], "a walk");
        assert_eq!(json["parameters"]["aspectRatio"], "16:9");
        assert!(json["parameters"].get("negativePrompt").is_none());
    }

    #[test]
    fn test_operation_with_sample() {
        let body: OperationResponse = serde_json::from_value(json!({
            "name": "models/veo/operations/op1",
            "done": true,
            "response": {"generateVideoResponse": {"generatedSamples": [
                {"video": {"uri": "https://files/v1.mp4"}}
            ]}}
        }))
        .unwrap();
        let op = body.into_operation("fallback");
        assert!(op.done);
        assert_eq!(op.name, "models/veo/operations/op1");
        assert_eq!(op.asset.unwrap().uri, "https://files/v1.mp4");
    }

    #[test]
    fn test_operation_pending_keeps_name() {
        let body: OperationResponse = serde_json::from_value(json!({})).unwrap();
        let op = body.into_operation("ops/1");
        assert_eq!(op, VideoOperation::pending("ops/1"));
    }

    #[test]
    fn test_operation_error_is_done_without_asset() {
        let body: OperationResponse = serde_json::from_value(json!({
            "name": "ops/2",
            "error": {"code": 3, "message": "prompt rejected"}
        }))
        .unwrap();
        let op = body.into_operation("ops/2");
        assert!(op.done);
        assert!(op.asset.is_none());
        assert!(op.error.unwrap().contains("prompt rejected"));
    }
}
