//! Core data models for clearview.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// CALL OUTCOME
// =============================================================================

/// Platform verdict on whether the call achieved its goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl CallOutcome {
    /// `Some(true|false)` for a known outcome, `None` when unknown.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Succeeded => Some(true),
            Self::Failed => Some(false),
            Self::Unknown => None,
        }
    }

    /// Human-readable label for emails and documents.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "Successful",
            Self::Failed => "Unsuccessful",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for CallOutcome {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid call outcome: {}", s)),
        }
    }
}

// =============================================================================
// VIDEO STATUS
// =============================================================================

/// Per-call video generation state.
///
/// Within one run the state only moves `none -> generating -> ready|failed`.
/// A manual resend may restart from any state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    #[default]
    None,
    Generating,
    Ready,
    Failed,
}

impl VideoStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl std::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Generating => write!(f, "generating"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for VideoStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "generating" => Ok(Self::Generating),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid video status: {}", s)),
        }
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Outbound email channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    /// Clinician summary.
    Doctor,
    /// Patient handout with the attached document.
    Patient,
    /// Video-ready follow-up to the patient.
    Video,
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Doctor => write!(f, "doctor"),
            Self::Patient => write!(f, "patient"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Channel filter accepted by the manual resend endpoint.
///
/// The full sequence is always re-run; the value is validated and recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResendType {
    Patient,
    Doctor,
    #[default]
    Both,
}

impl std::fmt::Display for ResendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Patient => write!(f, "patient"),
            Self::Doctor => write!(f, "doctor"),
            Self::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for ResendType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "patient" => Ok(Self::Patient),
            "doctor" => Ok(Self::Doctor),
            "both" => Ok(Self::Both),
            _ => Err(format!("Invalid resend type: {}", s)),
        }
    }
}

// =============================================================================
// CALL EVENT
// =============================================================================

/// Scalars derived from the raw payload once, at ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedScalars {
    pub call_outcome: CallOutcome,
    pub call_duration_secs: Option<i32>,
    /// 1..=10 when present.
    pub vision_scale: Option<i32>,
    pub activities_affected: Option<String>,
    pub stated_preference: Option<String>,
    /// Contains both `@` and `.` when present.
    pub extracted_email: Option<String>,
}

/// A verified webhook delivery, ready to be upserted.
#[derive(Debug, Clone)]
pub struct NewCallEvent {
    pub conversation_id: String,
    pub agent_id: Option<String>,
    pub event_type: String,
    /// Parsed payload (JSONB).
    pub raw_payload: JsonValue,
    /// Body bytes exactly as signed.
    pub raw_body: String,
    pub event_timestamp: Option<DateTime<Utc>>,
    pub call_started_at: Option<DateTime<Utc>>,
    pub scalars: DerivedScalars,
}

/// One stored call, keyed by its external conversation id.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub id: Uuid,
    pub conversation_id: String,
    pub agent_id: Option<String>,
    pub event_type: String,
    #[schema(value_type = Object)]
    pub raw_payload: JsonValue,
    #[serde(skip)]
    pub raw_body: String,
    pub event_timestamp: Option<DateTime<Utc>>,
    pub call_started_at: Option<DateTime<Utc>>,

    pub call_outcome: CallOutcome,
    pub call_duration_secs: Option<i32>,
    pub vision_scale: Option<i32>,
    pub activities_affected: Option<String>,
    pub stated_preference: Option<String>,
    pub extracted_email: Option<String>,

    pub doctor_email_sent_at: Option<DateTime<Utc>>,
    pub patient_email_sent_at: Option<DateTime<Utc>>,
    pub patient_email_used: Option<String>,
    pub video_status: VideoStatus,
    pub video_url: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,

    pub patient_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallEvent {
    /// Tri-state outcome as an optional boolean.
    pub fn call_successful(&self) -> Option<bool> {
        self.call_outcome.as_bool()
    }

    /// Body to re-parse for orchestration. Falls back to re-serializing the
    /// JSONB payload for rows written before the verbatim body was kept.
    pub fn source_body(&self) -> String {
        if self.raw_body.is_empty() {
            self.raw_payload.to_string()
        } else {
            self.raw_body.clone()
        }
    }

    /// Derived scalars as currently stored.
    pub fn scalars(&self) -> DerivedScalars {
        DerivedScalars {
            call_outcome: self.call_outcome,
            call_duration_secs: self.call_duration_secs,
            vision_scale: self.vision_scale,
            activities_affected: self.activities_affected.clone(),
            stated_preference: self.stated_preference.clone(),
            extracted_email: self.extracted_email.clone(),
        }
    }

    /// Build a fresh record from a delivery, as the store would on first insert.
    pub fn from_new(id: Uuid, new: NewCallEvent, now: DateTime<Utc>) -> Self {
        let NewCallEvent {
            conversation_id,
            agent_id,
            event_type,
            raw_payload,
            raw_body,
            event_timestamp,
            call_started_at,
            scalars,
        } = new;
        Self {
            id,
            conversation_id,
            agent_id,
            event_type,
            raw_payload,
            raw_body,
            event_timestamp,
            call_started_at,
            call_outcome: scalars.call_outcome,
            call_duration_secs: scalars.call_duration_secs,
            vision_scale: scalars.vision_scale,
            activities_affected: scalars.activities_affected,
            stated_preference: scalars.stated_preference,
            extracted_email: scalars.extracted_email,
            doctor_email_sent_at: None,
            patient_email_sent_at: None,
            patient_email_used: None,
            video_status: VideoStatus::None,
            video_url: None,
            reviewed_at: None,
            patient_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite payload and derived scalars from a repeat delivery.
    /// Notification status and the patient link are left untouched.
    pub fn apply_redelivery(&mut self, new: NewCallEvent, now: DateTime<Utc>) {
        self.agent_id = new.agent_id;
        self.event_type = new.event_type;
        self.raw_payload = new.raw_payload;
        self.raw_body = new.raw_body;
        self.event_timestamp = new.event_timestamp;
        self.call_started_at = new.call_started_at;
        self.call_outcome = new.scalars.call_outcome;
        self.call_duration_secs = new.scalars.call_duration_secs;
        self.vision_scale = new.scalars.vision_scale;
        self.activities_affected = new.scalars.activities_affected;
        self.stated_preference = new.scalars.stated_preference;
        self.extracted_email = new.scalars.extracted_email;
        self.updated_at = now;
    }
}

// =============================================================================
// PATIENT
// =============================================================================

/// Clinic-side patient record. Calls may be tagged with one.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Single-field name from older imports.
    #[serde(rename = "name")]
    pub legacy_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Patient {
    /// `first last` when either part is set, else the legacy name.
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if !parts.is_empty() {
            return parts.join(" ");
        }
        self.legacy_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("Patient")
            .to_string()
    }

    /// Email with surrounding whitespace removed, if plausible.
    pub fn contact_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| crate::insights::is_plausible_email(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_event(conversation_id: &str) -> NewCallEvent {
        NewCallEvent {
            conversation_id: conversation_id.to_string(),
            agent_id: Some("agent_1".to_string()),
            event_type: "post_call_transcription".to_string(),
            raw_payload: json!({"data": {}}),
            raw_body: r#"{"data":{}}"#.to_string(),
            event_timestamp: None,
            call_started_at: None,
            scalars: DerivedScalars {
                call_outcome: CallOutcome::Succeeded,
                vision_scale: Some(8),
                ..Default::default()
            },
        }
    }

    fn patient(first: Option<&str>, last: Option<&str>, legacy: Option<&str>) -> Patient {
        Patient {
            id: Uuid::nil(),
            first_name: first.map(String::from),
            last_name: last.map(String::from),
            legacy_name: legacy.map(String::from),
            email: None,
            phone: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_video_status_roundtrip_and_terminal() {
        for status in [
            VideoStatus::None,
            VideoStatus::Generating,
            VideoStatus::Ready,
            VideoStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<VideoStatus>().unwrap(), status);
        }
        assert!(VideoStatus::Ready.is_terminal());
        assert!(VideoStatus::Failed.is_terminal());
        assert!(!VideoStatus::Generating.is_terminal());
        assert!("bogus".parse::<VideoStatus>().is_err());
    }

    #[test]
    fn test_call_outcome_as_bool() {
        assert_eq!(CallOutcome::Succeeded.as_bool(), Some(true));
        assert_eq!(CallOutcome::Failed.as_bool(), Some(false));
        assert_eq!(CallOutcome::Unknown.as_bool(), None);
    }

    #[test]
    fn test_resend_type_default_and_parse() {
        assert_eq!(ResendType::default(), ResendType::Both);
        assert_eq!("Doctor".parse::<ResendType>().unwrap(), ResendType::Doctor);
        assert!("sms".parse::<ResendType>().is_err());
    }

    #[test]
    fn test_call_event_serializes_camel_case_without_raw_body() {
        let call = CallEvent::from_new(Uuid::nil(), new_event("conv_1"), Utc::now());
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["conversationId"], "conv_1");
        assert_eq!(json["visionScale"], 8);
        assert_eq!(json["videoStatus"], "none");
        assert!(json.get("rawBody").is_none());
    }

    #[test]
    fn test_redelivery_keeps_notification_state() {
        let now = Utc::now();
        let mut call = CallEvent::from_new(Uuid::nil(), new_event("conv_1"), now);
        call.doctor_email_sent_at = Some(now);
        call.video_status = VideoStatus::Ready;
        call.patient_id = Some(Uuid::new_v4());

        let mut second = new_event("conv_1");
        second.scalars.vision_scale = Some(3);
        call.apply_redelivery(second, now);

        assert_eq!(call.vision_scale, Some(3));
        assert_eq!(call.doctor_email_sent_at, Some(now));
        assert_eq!(call.video_status, VideoStatus::Ready);
        assert!(call.patient_id.is_some());
    }

    #[test]
    fn test_source_body_prefers_verbatim() {
        let mut call = CallEvent::from_new(Uuid::nil(), new_event("c"), Utc::now());
        assert_eq!(call.source_body(), r#"{"data":{}}"#);
        call.raw_body.clear();
        assert_eq!(call.source_body(), call.raw_payload.to_string());
    }

    #[test]
    fn test_patient_display_name() {
        assert_eq!(
            patient(Some("Ann"), Some("Lee"), Some("Old")).display_name(),
            "Ann Lee"
        );
        assert_eq!(patient(None, Some("Lee"), None).display_name(), "Lee");
        assert_eq!(
            patient(Some(" "), None, Some("Ann Lee")).display_name(),
            "Ann Lee"
        );
    }

    #[test]
    fn test_patient_contact_email_requires_plausible_address() {
        let mut p = patient(Some("Ann"), None, None);
        p.email = Some(" ann@example.com ".to_string());
        assert_eq!(p.contact_email(), Some("ann@example.com"));
        p.email = Some("not-an-email".to_string());
        assert_eq!(p.contact_email(), None);
    }
}
