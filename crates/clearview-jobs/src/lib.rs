//! # clearview-jobs
//!
//! Post-call notification pipeline for clearview.
//!
//! This crate provides:
//! - A bounded in-process task scheduler with per-kind concurrency
//! - The notification orchestrator (clinician summary, patient handout, video follow-up)
//! - Handout document synthesis
//! - Personalized video generation against a long-running backend
//! - Email transport and HTML templates
//!
//! ## Example
//!
//! ```ignore
//! use clearview_jobs::{SchedulerConfig, TaskKind, TaskScheduler};
//!
//! let scheduler = TaskScheduler::new(SchedulerConfig::from_env(), events.clone());
//! scheduler.register_handler(PipelineHandler::new(orchestrator, calls)).await;
//!
//! // Fire and forget; the ticket can be joined later.
//! let _ticket = scheduler
//!     .submit(TaskKind::NotificationPipeline, call.id, serde_json::json!({}))
//!     .await?;
//!
//! // Graceful shutdown
//! scheduler.shutdown(Duration::from_secs(30)).await;
//! ```

pub mod display;
pub mod handout;
pub mod mailer;
pub mod orchestrator;
pub mod scheduler;
pub mod templates;
pub mod video;

// Re-export core types
pub use clearview_core::*;

pub use display::{DisplayFields, EvaluationLine};
pub use handout::HandoutInput;
#[cfg(any(test, feature = "mock"))]
pub use mailer::RecordingMailer;
pub use mailer::{Attachment, HttpMailer, Mailer, MailerConfig, OutboundEmail};
pub use orchestrator::{
    load_call_data, NotificationOrchestrator, PipelineHandler, VideoTaskHandler, HANDOUT_FILENAME,
};
pub use scheduler::{
    SchedulerConfig, TaskContext, TaskHandler, TaskKind, TaskOutcome, TaskResult, TaskScheduler,
    TaskTicket,
};
pub use templates::RenderedEmail;
pub use video::{ActivityScene, VideoController, VideoPollConfig};
