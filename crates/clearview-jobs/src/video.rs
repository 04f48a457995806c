//! Video generation controller.
//!
//! Drives one generation run through `none → generating → {ready, failed}`,
//! persisting each transition so readers see `generating` while the poll
//! loop is still running. A run never resubmits: a poll timeout is terminal.
//! A run that panics, or whose task is cancelled, still ends in `failed`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use clearview_core::{
    defaults, extract, CallEventRepository, CallInsights, ConversationData, Error, EventBus,
    ExtractionHints, LensInterestLabel, Result, ServerEvent, VideoStatus,
};
use clearview_db::{video_key, BlobStore};
use clearview_inference::{VideoBackend, VideoGenerationConfig, VideoOperation};

/// Poll loop configuration.
#[derive(Debug, Clone)]
pub struct VideoPollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for VideoPollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(defaults::VIDEO_POLL_INTERVAL_SECS),
            max_attempts: defaults::VIDEO_POLL_MAX_ATTEMPTS,
        }
    }
}

impl VideoPollConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `VIDEO_POLL_INTERVAL_SECS` | `10` |
    /// | `VIDEO_POLL_MAX_ATTEMPTS` | `60` |
    pub fn from_env() -> Self {
        let interval = std::env::var("VIDEO_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::VIDEO_POLL_INTERVAL_SECS);
        let max_attempts = std::env::var("VIDEO_POLL_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults::VIDEO_POLL_MAX_ATTEMPTS)
            .max(1);
        Self {
            interval: Duration::from_secs(interval),
            max_attempts,
        }
    }
}

// =============================================================================
// PROMPT
// =============================================================================

/// Activity category that picks the closing scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityScene {
    Reading,
    Driving,
    Outdoor,
    General,
}

static READING: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\b(read\w*|books?|newspapers?|knit\w*|sew\w*|crosswords?|puzzles?|screens?|computers?|phones?)\b")
        .ok()
});
static DRIVING: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\b(driv\w*|cars?|night\s+driving|headlights?|glare|commut\w*)\b")
        .ok()
});
static OUTDOOR: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\b(golf\w*|tennis|hik\w*|walk\w*|garden\w*|fish\w*|cycl\w*|bik\w*|swim\w*|outdoors?|sports?|travel\w*|beach|running|birdwatch\w*)\b")
        .ok()
});

fn matches(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

impl ActivityScene {
    /// First category that matches, in reading, driving, outdoor order.
    pub fn classify(text: Option<&str>) -> Self {
        match text.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) if matches(&READING, t) => Self::Reading,
            Some(t) if matches(&DRIVING, t) => Self::Driving,
            Some(t) if matches(&OUTDOOR, t) => Self::Outdoor,
            _ => Self::General,
        }
    }

    fn closing_clause(self) -> &'static str {
        match self {
            Self::Reading => {
                "The scene closes on them reading a book in warm afternoon light, \
                 the small print crisp and effortless without reading glasses."
            }
            Self::Driving => {
                "The scene closes at dusk as they drive confidently along a quiet road, \
                 oncoming headlights clear with no halos or glare."
            }
            Self::Outdoor => {
                "The scene closes outdoors in bright sunshine as they enjoy their favourite \
                 activity, every detail of the landscape sharp and vivid."
            }
            Self::General => {
                "The scene closes on a relaxed, smiling moment at home, everything around \
                 them bright, clear, and in focus."
            }
        }
    }
}

fn positive(text: Option<&str>) -> bool {
    static NEGATIVE: Lazy<Option<Regex>> =
        Lazy::new(|| Regex::new(r"(?i)\b(no|not|never|none|uninterested)\b").ok());
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| !matches(&NEGATIVE, t))
        .unwrap_or(false)
}

/// Build the generation prompt. Deterministic.
pub fn build_prompt(insights: &CallInsights) -> String {
    let mut parts = vec![
        "A warm, cinematic short film of an older adult in their everyday life after \
         cataract surgery, natural lighting, gentle camera movement, hopeful mood."
            .to_string(),
    ];

    if let Some(occupation) = insights.occupation.as_deref().map(str::trim).filter(|o| !o.is_empty()) {
        parts.push(format!(
            "They are shown briefly at work as a {}, seeing clearly.",
            occupation.to_lowercase()
        ));
    }

    match insights.premium_lens_label {
        LensInterestLabel::Interested | LensInterestLabel::Considering => parts.push(
            "They move easily between looking far away, at a computer, and at something \
             in their hands, never reaching for glasses."
                .to_string(),
        ),
        _ => parts.push(
            "Their distance vision is bright and clear as they look across the room."
                .to_string(),
        ),
    }

    if positive(insights.laser_interest.as_deref()) {
        parts.push(
            "Morning light shows them waking up and seeing the clock across the room \
             immediately."
                .to_string(),
        );
    }

    let activities = [insights.activities.as_deref(), insights.hobbies.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    let scene = ActivityScene::classify(Some(activities.as_str()));
    parts.push(scene.closing_clause().to_string());

    parts.join(" ")
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Runs the generation state machine for one call at a time.
pub struct VideoController {
    backend: Option<Arc<dyn VideoBackend>>,
    generation: VideoGenerationConfig,
    calls: Arc<dyn CallEventRepository>,
    blobs: Arc<dyn BlobStore>,
    events: EventBus,
    poll: VideoPollConfig,
}

impl VideoController {
    pub fn new(
        backend: Option<Arc<dyn VideoBackend>>,
        calls: Arc<dyn CallEventRepository>,
        blobs: Arc<dyn BlobStore>,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            generation: VideoGenerationConfig::default(),
            calls,
            blobs,
            events,
            poll: VideoPollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, poll: VideoPollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_generation_config(mut self, generation: VideoGenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    /// Generate, rehost, and record a video for the call.
    ///
    /// Returns the rehosted URL, or `None` on any failure. Without a backend
    /// this returns `None` before touching stored state.
    pub async fn generate(&self, data: &ConversationData, call_id: Uuid) -> Option<String> {
        let Some(backend) = self.backend.as_ref() else {
            debug!(
                subsystem = "jobs",
                component = "video",
                %call_id,
                "Video generation not configured; skipping"
            );
            return None;
        };

        let outcome = match self.set_status(call_id, VideoStatus::Generating, None).await {
            Ok(()) => AssertUnwindSafe(self.run(backend.as_ref(), data, call_id))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(Error::Inference("video generation panicked".to_string()))),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Some(url)) => Some(url),
            Ok(None) => {
                self.mark_failed(call_id).await;
                None
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "video",
                    %call_id,
                    error = %e,
                    "Video generation failed"
                );
                self.mark_failed(call_id).await;
                None
            }
        }
    }

    /// Fail a run that was cancelled or panicked outside [`Self::generate`].
    /// Only a call still `generating` is touched.
    pub async fn abandon(&self, call_id: Uuid, reason: &str) {
        match self.calls.get(call_id).await {
            Ok(Some(call)) if call.video_status == VideoStatus::Generating => {
                warn!(
                    subsystem = "jobs",
                    component = "video",
                    %call_id,
                    %reason,
                    "Video run abandoned"
                );
                self.mark_failed(call_id).await;
            }
            Ok(_) => {}
            Err(e) => warn!(
                subsystem = "jobs",
                component = "video",
                %call_id,
                error = %e,
                "Failed to load call for abandoned video run"
            ),
        }
    }

    /// `Ok(None)` is a clean failure already logged here.
    async fn run(
        &self,
        backend: &dyn VideoBackend,
        data: &ConversationData,
        call_id: Uuid,
    ) -> Result<Option<String>> {
        let insights = extract(data.data_collection(), &ExtractionHints::default(), None);
        let prompt = build_prompt(&insights);

        info!(
            subsystem = "jobs",
            component = "video",
            op = "submit",
            %call_id,
            model = backend.model_name(),
            "Submitting video generation"
        );
        let mut operation = backend.submit(&prompt, &self.generation).await?;

        let Some(operation_done) = self.poll_until_done(backend, &mut operation, call_id).await? else {
            warn!(
                subsystem = "jobs",
                component = "video",
                %call_id,
                attempts = self.poll.max_attempts,
                "Video generation timed out"
            );
            return Ok(None);
        };

        if let Some(error) = &operation_done.error {
            warn!(
                subsystem = "jobs",
                component = "video",
                %call_id,
                %error,
                "Video generation reported an error"
            );
            return Ok(None);
        }
        let Some(asset) = &operation_done.asset else {
            warn!(
                subsystem = "jobs",
                component = "video",
                %call_id,
                "Video generation finished without an asset"
            );
            return Ok(None);
        };

        let bytes = backend.download(asset).await?;
        let key = video_key(call_id, &bytes);
        let size_bytes = bytes.len();
        let url = self.blobs.put(&key, &bytes, "video/mp4").await?;

        self.set_status(call_id, VideoStatus::Ready, Some(&url)).await?;
        info!(
            subsystem = "jobs",
            component = "video",
            %call_id,
            size_bytes,
            "Video ready"
        );
        Ok(Some(url))
    }

    /// `None` when the attempt budget runs out.
    async fn poll_until_done(
        &self,
        backend: &dyn VideoBackend,
        operation: &mut VideoOperation,
        call_id: Uuid,
    ) -> Result<Option<VideoOperation>> {
        for attempt in 1..=self.poll.max_attempts {
            tokio::time::sleep(self.poll.interval).await;
            *operation = backend.poll(operation).await?;
            trace!(
                subsystem = "jobs",
                component = "video",
                %call_id,
                attempt,
                done = operation.done,
                "Polled video operation"
            );
            if operation.done {
                return Ok(Some(operation.clone()));
            }
        }
        Ok(None)
    }

    async fn set_status(&self, call_id: Uuid, status: VideoStatus, url: Option<&str>) -> Result<()> {
        self.calls.set_video_status(call_id, status, url).await?;
        self.events.emit(ServerEvent::VideoStatusChanged {
            call_id,
            status,
            video_url: url.map(String::from),
        });
        Ok(())
    }

    async fn mark_failed(&self, call_id: Uuid) {
        if let Err(e) = self.set_status(call_id, VideoStatus::Failed, None).await {
            warn!(
                subsystem = "jobs",
                component = "video",
                %call_id,
                error = %e,
                "Failed to record video failure"
            );
        }
    }
}
