//! Structured logging schema and field name constants for clearview.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable stage failure (email, video, document) |
//! | INFO  | Lifecycle events, stage completions |
//! | DEBUG | Decision points, skipped stages, keyword matches |
//! | TRACE | Per-item iteration (poll attempts, extracted fields) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across request → task → sub-calls (UUIDv7).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "db", "inference", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "webhook", "orchestrator", "video", "mailer", "scheduler"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "verify", "upsert", "submit", "poll", "send"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Internal call event UUID.
pub const CALL_ID: &str = "call_id";

/// External conversation id (idempotency key).
pub const CONVERSATION_ID: &str = "conversation_id";

/// Background task UUID.
pub const TASK_ID: &str = "task_id";

/// Background task kind.
pub const TASK_KIND: &str = "task_kind";

/// Notification channel ("doctor", "patient", "video").
pub const CHANNEL: &str = "channel";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Poll attempt number for long-running operations.
pub const ATTEMPT: &str = "attempt";

/// Byte length of a rendered document or downloaded asset.
pub const SIZE_BYTES: &str = "size_bytes";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
