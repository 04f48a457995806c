//! Notification orchestrator and the task handlers that run it.
//!
//! One run, in order:
//! 1. resolve display fields from the stored payload
//! 2. synthesize the handout (failure leaves it absent)
//! 3. submit the video task without waiting
//! 4. clinician summary, when an address is configured
//! 5. patient email with the handout, when both an address and the handout exist
//! 6. rejoin the video task; send the video-ready email if a URL came back
//!
//! Each stage's failure is logged and contained; later stages still run.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use clearview_core::{
    CallEvent, CallEventRepository, ConversationData, Error, EventBus, NotificationChannel,
    PatientRepository, Result, ServerEvent,
};

use crate::display::DisplayFields;
use crate::handout::{self, HandoutInput};
use crate::mailer::{Attachment, Mailer, MailerConfig, OutboundEmail};
use crate::scheduler::{TaskContext, TaskHandler, TaskKind, TaskResult, TaskScheduler};
use crate::templates::{self, RenderedEmail};
use crate::video::VideoController;

/// Attachment file name for the patient handout.
pub const HANDOUT_FILENAME: &str = "consultation-summary.pdf";

/// Load a call and re-parse its verbatim body.
pub async fn load_call_data(
    calls: &dyn CallEventRepository,
    call_id: Uuid,
) -> Result<(CallEvent, ConversationData)> {
    let call = calls.get(call_id).await?.ok_or(Error::CallNotFound(call_id))?;
    let data = ConversationData::from_raw_body(&call.source_body())?;
    Ok((call, data))
}

/// Coordinates one notification run per call.
pub struct NotificationOrchestrator {
    calls: Arc<dyn CallEventRepository>,
    patients: Arc<dyn PatientRepository>,
    mailer: Arc<dyn Mailer>,
    config: MailerConfig,
    scheduler: TaskScheduler,
    events: EventBus,
}

impl NotificationOrchestrator {
    pub fn new(
        calls: Arc<dyn CallEventRepository>,
        patients: Arc<dyn PatientRepository>,
        mailer: Arc<dyn Mailer>,
        config: MailerConfig,
        scheduler: TaskScheduler,
        events: EventBus,
    ) -> Self {
        Self {
            calls,
            patients,
            mailer,
            config,
            scheduler,
            events,
        }
    }

    /// Run the full sequence. Never fails; stage errors are logged.
    pub async fn run(&self, call: &CallEvent, data: &ConversationData) {
        let call_id = call.id;

        // 1. Display fields
        let patient = match call.patient_id {
            Some(patient_id) => match self.patients.get(patient_id).await {
                Ok(patient) => patient,
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "orchestrator",
                        %call_id,
                        %patient_id,
                        error = %e,
                        "Patient lookup failed; continuing without it"
                    );
                    None
                }
            },
            None => None,
        };
        let fields = DisplayFields::resolve(
            data,
            &call.scalars(),
            call.call_started_at.or(call.event_timestamp),
            patient.as_ref(),
        );

        // 2. Handout
        let handout = match handout::synthesize(&HandoutInput::from_fields(
            &fields,
            &self.config.clinic_name,
        )) {
            Ok(bytes) => {
                debug!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    %call_id,
                    size_bytes = bytes.len(),
                    "Handout synthesized"
                );
                Some(bytes)
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    %call_id,
                    error = %e,
                    "Handout synthesis failed"
                );
                None
            }
        };

        // 3. Video, detached
        let video = match self
            .scheduler
            .submit(TaskKind::VideoGeneration, call_id, json!({}))
            .await
        {
            Ok(ticket) => Some(ticket),
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    %call_id,
                    error = %e,
                    "Video task not submitted"
                );
                None
            }
        };

        // 4. Clinician summary
        match self.config.doctor_email.as_deref() {
            Some(doctor) => {
                let rendered = templates::doctor_summary(&fields, &self.config.clinic_name);
                if self
                    .deliver(call_id, NotificationChannel::Doctor, doctor, rendered, Vec::new())
                    .await
                {
                    self.record(call_id, "doctor", || async {
                        self.calls.mark_doctor_email_sent(call_id, Utc::now()).await
                    })
                    .await;
                }
            }
            None => debug!(
                subsystem = "jobs",
                component = "orchestrator",
                %call_id,
                "No clinician address configured; skipping summary"
            ),
        }

        // 5. Patient email with handout
        match (fields.email.as_deref(), handout) {
            (Some(address), Some(pdf)) => {
                let rendered = templates::patient_handout(&fields, &self.config.clinic_name);
                let attachment = Attachment {
                    filename: HANDOUT_FILENAME.to_string(),
                    content: pdf,
                };
                if self
                    .deliver(
                        call_id,
                        NotificationChannel::Patient,
                        address,
                        rendered,
                        vec![attachment],
                    )
                    .await
                {
                    self.record(call_id, "patient", || async {
                        self.calls
                            .mark_patient_email_sent(call_id, address, Utc::now())
                            .await
                    })
                    .await;
                }
            }
            (None, _) => debug!(
                subsystem = "jobs",
                component = "orchestrator",
                %call_id,
                "No patient address; skipping patient email"
            ),
            (Some(_), None) => debug!(
                subsystem = "jobs",
                component = "orchestrator",
                %call_id,
                "No handout; skipping patient email"
            ),
        }

        // 6. Rejoin video
        let Some(ticket) = video else {
            return;
        };
        let video_url = ticket
            .join()
            .await
            .data()
            .and_then(|d| d.get("videoUrl"))
            .and_then(|u| u.as_str())
            .map(String::from);

        if let (Some(url), Some(address)) = (video_url, fields.email.as_deref()) {
            let rendered = templates::video_ready(&fields, &url, &self.config.clinic_name);
            self.deliver(call_id, NotificationChannel::Video, address, rendered, Vec::new())
                .await;
        }

        info!(
            subsystem = "jobs",
            component = "orchestrator",
            %call_id,
            "Notification run finished"
        );
    }

    /// Send one email. Returns whether the provider accepted it.
    async fn deliver(
        &self,
        call_id: Uuid,
        channel: NotificationChannel,
        to: &str,
        rendered: RenderedEmail,
        attachments: Vec<Attachment>,
    ) -> bool {
        let email = OutboundEmail {
            from: self.config.from.clone(),
            to: to.to_string(),
            subject: rendered.subject,
            html: rendered.html,
            attachments,
        };
        match self.mailer.send(&email).await {
            Ok(message_id) => {
                info!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    %call_id,
                    %channel,
                    %message_id,
                    "Email sent"
                );
                self.events
                    .emit(ServerEvent::NotificationSent { call_id, channel });
                true
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    %call_id,
                    %channel,
                    error = %e,
                    "Email send failed"
                );
                self.events.emit(ServerEvent::NotificationFailed {
                    call_id,
                    channel,
                    error: e.to_string(),
                });
                false
            }
        }
    }

    async fn record<F, Fut>(&self, call_id: Uuid, what: &str, write: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        if let Err(e) = write().await {
            warn!(
                subsystem = "jobs",
                component = "orchestrator",
                %call_id,
                error = %e,
                "Failed to record {} email status",
                what
            );
        }
    }
}

/// Runs the orchestrator for a stored call.
pub struct PipelineHandler {
    orchestrator: Arc<NotificationOrchestrator>,
    calls: Arc<dyn CallEventRepository>,
}

impl PipelineHandler {
    pub fn new(
        orchestrator: Arc<NotificationOrchestrator>,
        calls: Arc<dyn CallEventRepository>,
    ) -> Self {
        Self {
            orchestrator,
            calls,
        }
    }
}

#[async_trait]
impl TaskHandler for PipelineHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::NotificationPipeline
    }

    async fn execute(&self, ctx: TaskContext) -> TaskResult {
        match load_call_data(self.calls.as_ref(), ctx.call_id).await {
            Ok((call, data)) => {
                self.orchestrator.run(&call, &data).await;
                TaskResult::Success(None)
            }
            Err(e) => TaskResult::Failed(e.to_string()),
        }
    }
}

/// Runs one video generation for a stored call.
pub struct VideoTaskHandler {
    controller: Arc<VideoController>,
    calls: Arc<dyn CallEventRepository>,
}

impl VideoTaskHandler {
    pub fn new(controller: Arc<VideoController>, calls: Arc<dyn CallEventRepository>) -> Self {
        Self { controller, calls }
    }
}

#[async_trait]
impl TaskHandler for VideoTaskHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::VideoGeneration
    }

    async fn execute(&self, ctx: TaskContext) -> TaskResult {
        match load_call_data(self.calls.as_ref(), ctx.call_id).await {
            Ok((call, data)) => {
                let url = self.controller.generate(&data, call.id).await;
                TaskResult::Success(Some(json!({ "videoUrl": url })))
            }
            Err(e) => TaskResult::Failed(e.to_string()),
        }
    }

    async fn on_abandoned(&self, ctx: &TaskContext, reason: &str) {
        self.controller.abandon(ctx.call_id, reason).await;
    }
}
