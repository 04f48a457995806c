//! Repository traits for call events and patients.
//!
//! The PostgreSQL adapter and the in-memory store both implement these, so
//! the orchestrator and HTTP handlers can run against either.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

/// Request for listing calls, newest first.
#[derive(Debug, Clone, Default)]
pub struct ListCallsRequest {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One page of calls plus the total row count.
#[derive(Debug, Clone)]
pub struct ListCallsResponse {
    pub calls: Vec<CallEvent>,
    pub total: i64,
}

/// Event store over call records keyed by conversation id.
///
/// Writers are independent and last-write-wins per field. Missing ids fail
/// with [`crate::Error::CallNotFound`].
#[async_trait]
pub trait CallEventRepository: Send + Sync {
    /// Insert, or overwrite payload and derived scalars of the existing row
    /// with the same conversation id. Notification status and the patient
    /// link survive a redelivery.
    async fn upsert_from_webhook(&self, event: NewCallEvent) -> Result<CallEvent>;

    async fn get(&self, id: Uuid) -> Result<Option<CallEvent>>;

    async fn get_by_conversation(&self, conversation_id: &str) -> Result<Option<CallEvent>>;

    async fn list(&self, req: ListCallsRequest) -> Result<ListCallsResponse>;

    /// Persist a video state transition. `url` is only meaningful for `ready`
    /// and is cleared for every other state.
    async fn set_video_status(&self, id: Uuid, status: VideoStatus, url: Option<&str>)
        -> Result<()>;

    /// Move every `generating` row last touched before `before` to `failed`.
    /// Runs left behind by a crash or restart have no task to finish them.
    /// Returns the number of rows changed.
    async fn fail_stale_video_runs(&self, before: DateTime<Utc>) -> Result<u64>;

    async fn mark_doctor_email_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Record the patient email send and the address actually used.
    async fn mark_patient_email_sent(&self, id: Uuid, email: &str, at: DateTime<Utc>)
        -> Result<()>;

    /// Set the review timestamp to `now` if unset, otherwise clear it.
    /// Returns the new value.
    async fn toggle_review(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>>;

    /// Attach (`Some`) or detach (`None`) a patient.
    async fn assign_patient(&self, id: Uuid, patient_id: Option<Uuid>) -> Result<()>;
}

/// Read access to clinic patients.
#[async_trait]
pub trait PatientRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Patient>>;
}
