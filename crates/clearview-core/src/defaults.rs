//! Centralized default constants for clearview.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// WEBHOOK INTAKE
// =============================================================================

/// Maximum accepted age of a webhook signature timestamp, in seconds.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 1800;

/// Header carrying the voice-agent platform's webhook signature.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "elevenlabs-signature";

/// Maximum webhook request body size (transcripts can be long).
pub const WEBHOOK_BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

// =============================================================================
// VIDEO GENERATION
// =============================================================================

/// Interval between polls of a video generation operation.
pub const VIDEO_POLL_INTERVAL_SECS: u64 = 10;

/// Maximum number of polls before a generation run is declared timed out.
pub const VIDEO_POLL_MAX_ATTEMPTS: u32 = 60;

/// Default video generation model.
pub const VEO_MODEL: &str = "veo-3.0-fast-generate-001";

/// Default generative API endpoint.
pub const VEO_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default aspect ratio for generated videos.
pub const VEO_ASPECT_RATIO: &str = "16:9";

/// HTTP timeout for a single generation API request.
pub const VEO_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// EMAIL
// =============================================================================

/// Default transactional email API endpoint.
pub const EMAIL_API_URL: &str = "https://api.resend.com/emails";

/// HTTP timeout for a single email send.
pub const EMAIL_TIMEOUT_SECS: u64 = 30;

/// Default clinic name used in templates and the handout header.
pub const CLINIC_NAME: &str = "Clearview Eye Centre";

// =============================================================================
// TASK SCHEDULER
// =============================================================================

/// Concurrent notification pipelines.
pub const PIPELINE_MAX_CONCURRENT: usize = 8;

/// Concurrent video generation runs.
pub const VIDEO_MAX_CONCURRENT: usize = 4;

/// Upper bound on one task's run time. Covers the full video poll budget.
pub const TASK_TIMEOUT_SECS: u64 = 900;

/// How long shutdown waits for in-flight tasks.
pub const TASK_SHUTDOWN_GRACE_SECS: u64 = 30;

/// A `generating` row untouched this long has no live task behind it.
/// Twice the task timeout.
pub const VIDEO_GENERATING_STALE_SECS: u64 = 2 * TASK_TIMEOUT_SECS;

/// Event bus / worker event channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for the call list.
pub const PAGE_LIMIT: i64 = 50;

/// Largest page size a caller may request.
pub const PAGE_LIMIT_MAX: i64 = 500;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default media storage directory for rehosted assets.
pub const MEDIA_STORAGE_PATH: &str = "/var/lib/clearview/media";
