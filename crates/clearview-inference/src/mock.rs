//! Scripted video backend for deterministic testing.
//!
//! ```rust,ignore
//! let backend = MockVideoBackend::new().completes_after(2);
//! let op = backend.submit("prompt", &VideoGenerationConfig::default()).await?;
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use clearview_core::{Error, Result};

use crate::video::{VideoAsset, VideoBackend, VideoGenerationConfig, VideoOperation};

/// How the scripted operation finishes.
#[derive(Debug, Clone)]
enum Completion {
    /// Done after N polls, with an asset.
    WithAsset(u32),
    /// Done after N polls, with no asset.
    Empty(u32),
    /// Never done.
    Never,
    /// Panics inside `poll`.
    Panic,
}

#[derive(Debug, Clone)]
struct MockConfig {
    completion: Completion,
    fail_submit: bool,
    fail_download: bool,
    asset_bytes: Vec<u8>,
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockVideoCall {
    pub operation: String,
    pub input: String,
}

/// Mock video backend with a call log.
#[derive(Clone)]
pub struct MockVideoBackend {
    config: MockConfig,
    polls: Arc<Mutex<u32>>,
    call_log: Arc<Mutex<Vec<MockVideoCall>>>,
    submitted: Arc<Mutex<Vec<VideoGenerationConfig>>>,
}

impl Default for MockVideoBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockVideoBackend {
    /// Completes on the first poll with an asset.
    pub fn new() -> Self {
        Self {
            config: MockConfig {
                completion: Completion::WithAsset(1),
                fail_submit: false,
                fail_download: false,
                asset_bytes: b"mock-video-bytes".to_vec(),
            },
            polls: Arc::new(Mutex::new(0)),
            call_log: Arc::new(Mutex::new(Vec::new())),
            submitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn completes_after(mut self, polls: u32) -> Self {
        self.config.completion = Completion::WithAsset(polls);
        self
    }

    pub fn completes_without_asset_after(mut self, polls: u32) -> Self {
        self.config.completion = Completion::Empty(polls);
        self
    }

    pub fn never_completes(mut self) -> Self {
        self.config.completion = Completion::Never;
        self
    }

    pub fn panics_on_poll(mut self) -> Self {
        self.config.completion = Completion::Panic;
        self
    }

    pub fn failing_submit(mut self) -> Self {
        self.config.fail_submit = true;
        self
    }

    pub fn failing_download(mut self) -> Self {
        self.config.fail_download = true;
        self
    }

    pub fn with_asset_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.config.asset_bytes = bytes.into();
        self
    }

    pub fn get_calls(&self) -> Vec<MockVideoCall> {
        lock(&self.call_log).clone()
    }

    /// Generation parameters received by each `submit`.
    pub fn submitted_configs(&self) -> Vec<VideoGenerationConfig> {
        lock(&self.submitted).clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        lock(&self.call_log)
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn record(&self, operation: &str, input: &str) {
        lock(&self.call_log).push(MockVideoCall {
            operation: operation.to_string(),
            input: input.to_string(),
        });
    }
}

#[async_trait]
impl VideoBackend for MockVideoBackend {
    async fn submit(&self, prompt: &str, config: &VideoGenerationConfig) -> Result<VideoOperation> {
        self.record("submit", prompt);
        lock(&self.submitted).push(config.clone());
        if self.config.fail_submit {
            return Err(Error::Inference("mock submit failure".to_string()));
        }
        Ok(VideoOperation::pending("operations/mock-1"))
    }

    async fn poll(&self, operation: &VideoOperation) -> Result<VideoOperation> {
        self.record("poll", &operation.name);
        let n = {
            let mut polls = lock(&self.polls);
            *polls += 1;
            *polls
        };
        let op = match self.config.completion {
            Completion::WithAsset(after) if n >= after => VideoOperation::completed(
                operation.name.clone(),
                Some(VideoAsset {
                    uri: "https://mock.invalid/video.mp4".to_string(),
                    mime_type: Some("video/mp4".to_string()),
                }),
            ),
            Completion::Empty(after) if n >= after => {
                VideoOperation::completed(operation.name.clone(), None)
            }
            Completion::Panic => panic!("mock poll panic on {}", operation.name),
            _ => VideoOperation::pending(operation.name.clone()),
        };
        Ok(op)
    }

    async fn download(&self, asset: &VideoAsset) -> Result<Vec<u8>> {
        self.record("download", &asset.uri);
        if self.config.fail_download {
            return Err(Error::Inference("mock download failure".to_string()));
        }
        Ok(self.config.asset_bytes.clone())
    }

    fn model_name(&self) -> &str {
        "mock-veo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_after_n_polls() {
        let backend = MockVideoBackend::new().completes_after(3);
        let op = backend
            .submit("p", &VideoGenerationConfig::default())
            .await
            .unwrap();
        assert!(!backend.poll(&op).await.unwrap().done);
        assert!(!backend.poll(&op).await.unwrap().done);
        let done = backend.poll(&op).await.unwrap();
        assert!(done.done);
        assert!(done.asset.is_some());
        assert_eq!(backend.count("poll"), 3);
    }

    #[tokio::test]
    async fn test_never_completes() {
        let backend = MockVideoBackend::new().never_completes();
        let op = VideoOperation::pending("x");
        for _ in 0..10 {
            assert!(!backend.poll(&op).await.unwrap().done);
        }
    }

    #[tokio::test]
    #[should_panic(expected = "mock poll panic")]
    async fn test_panics_on_poll() {
        let backend = MockVideoBackend::new().panics_on_poll();
        let _ = backend.poll(&VideoOperation::pending("x")).await;
    }

    #[tokio::test]
    async fn test_submit_records_generation_config() {
        let backend = MockVideoBackend::new();
        let config = VideoGenerationConfig {
            aspect_ratio: "9:16".to_string(),
            negative_prompt: None,
        };
        backend.submit("p", &config).await.unwrap();
        assert_eq!(backend.submitted_configs(), vec![config]);
    }

    #[tokio::test]
    async fn test_failing_submit_logged() {
        let backend = MockVideoBackend::new().failing_submit();
        assert!(backend
            .submit("prompt text", &VideoGenerationConfig::default())
            .await
            .is_err());
        assert_eq!(
            backend.get_calls(),
            vec![MockVideoCall {
                operation: "submit".to_string(),
                input: "prompt text".to_string()
            }]
        );
    }
}
