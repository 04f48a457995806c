//! In-memory call and patient store.
//!
//! Mirrors the PostgreSQL repositories' semantics (upsert by conversation id,
//! redelivery keeps notification state, missing ids fail with
//! `CallNotFound`). Used by router and orchestrator tests, and by local runs
//! without a database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use clearview_core::{
    CallEvent, CallEventRepository, Error, ListCallsRequest, ListCallsResponse, NewCallEvent,
    Patient, PatientRepository, Result, VideoStatus,
};

use crate::calls::page_bounds;

#[derive(Default)]
struct Inner {
    calls: HashMap<Uuid, CallEvent>,
    by_conversation: HashMap<String, Uuid>,
    patients: HashMap<Uuid, Patient>,
}

/// Shared in-memory store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_patient(&self, patient: Patient) {
        self.inner.write().await.patients.insert(patient.id, patient);
    }

    pub async fn call_count(&self) -> usize {
        self.inner.read().await.calls.len()
    }

    async fn update<F>(&self, id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut CallEvent) + Send,
    {
        let mut inner = self.inner.write().await;
        let call = inner.calls.get_mut(&id).ok_or(Error::CallNotFound(id))?;
        f(call);
        call.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl CallEventRepository for MemoryStore {
    async fn upsert_from_webhook(&self, event: NewCallEvent) -> Result<CallEvent> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        if let Some(id) = inner.by_conversation.get(&event.conversation_id).copied() {
            let call = inner.calls.get_mut(&id).ok_or(Error::CallNotFound(id))?;
            call.apply_redelivery(event, now);
            return Ok(call.clone());
        }

        let id = clearview_core::new_v7();
        let call = CallEvent::from_new(id, event, now);
        inner
            .by_conversation
            .insert(call.conversation_id.clone(), id);
        inner.calls.insert(id, call.clone());
        Ok(call)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CallEvent>> {
        Ok(self.inner.read().await.calls.get(&id).cloned())
    }

    async fn get_by_conversation(&self, conversation_id: &str) -> Result<Option<CallEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_conversation
            .get(conversation_id)
            .and_then(|id| inner.calls.get(id))
            .cloned())
    }

    async fn list(&self, req: ListCallsRequest) -> Result<ListCallsResponse> {
        let (limit, offset) = page_bounds(&req);
        let inner = self.inner.read().await;
        let mut calls: Vec<CallEvent> = inner.calls.values().cloned().collect();
        calls.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = calls.len() as i64;
        let calls = calls
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(ListCallsResponse { calls, total })
    }

    async fn set_video_status(
        &self,
        id: Uuid,
        status: VideoStatus,
        url: Option<&str>,
    ) -> Result<()> {
        let url = if status == VideoStatus::Ready {
            url.map(String::from)
        } else {
            None
        };
        self.update(id, move |call| {
            call.video_status = status;
            call.video_url = url;
        })
        .await
    }

    async fn fail_stale_video_runs(&self, before: DateTime<Utc>) -> Result<u64> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let mut changed = 0;
        for call in inner.calls.values_mut() {
            if call.video_status == VideoStatus::Generating && call.updated_at < before {
                call.video_status = VideoStatus::Failed;
                call.video_url = None;
                call.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn mark_doctor_email_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.update(id, move |call| call.doctor_email_sent_at = Some(at))
            .await
    }

    async fn mark_patient_email_sent(
        &self,
        id: Uuid,
        email: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let email = email.to_string();
        self.update(id, move |call| {
            call.patient_email_sent_at = Some(at);
            call.patient_email_used = Some(email);
        })
        .await
    }

    async fn toggle_review(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let mut inner = self.inner.write().await;
        let call = inner.calls.get_mut(&id).ok_or(Error::CallNotFound(id))?;
        call.reviewed_at = match call.reviewed_at {
            Some(_) => None,
            None => Some(now),
        };
        call.updated_at = now;
        Ok(call.reviewed_at)
    }

    async fn assign_patient(&self, id: Uuid, patient_id: Option<Uuid>) -> Result<()> {
        self.update(id, move |call| call.patient_id = patient_id)
            .await
    }
}

#[async_trait]
impl PatientRepository for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Patient>> {
        Ok(self.inner.read().await.patients.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearview_core::{CallOutcome, DerivedScalars};
    use serde_json::json;

    fn delivery(conversation_id: &str, scale: i32) -> NewCallEvent {
        NewCallEvent {
            conversation_id: conversation_id.to_string(),
            agent_id: None,
            event_type: "post_call_transcription".to_string(),
            raw_payload: json!({"scale": scale}),
            raw_body: format!(r#"{{"scale":{}}}"#, scale),
            event_timestamp: None,
            call_started_at: None,
            scalars: DerivedScalars {
                call_outcome: CallOutcome::Succeeded,
                vision_scale: Some(scale),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_duplicate_delivery_updates_single_record() {
        let store = MemoryStore::new();
        let first = store.upsert_from_webhook(delivery("conv_1", 3)).await.unwrap();
        store
            .mark_doctor_email_sent(first.id, Utc::now())
            .await
            .unwrap();

        let second = store.upsert_from_webhook(delivery("conv_1", 8)).await.unwrap();

        assert_eq!(store.call_count().await, 1);
        assert_eq!(second.id, first.id);
        assert_eq!(second.vision_scale, Some(8));
        assert_eq!(second.raw_body, r#"{"scale":8}"#);
        assert!(second.doctor_email_sent_at.is_some());
    }

    #[tokio::test]
    async fn test_get_by_conversation() {
        let store = MemoryStore::new();
        let call = store.upsert_from_webhook(delivery("conv_x", 5)).await.unwrap();
        let found = store.get_by_conversation("conv_x").await.unwrap().unwrap();
        assert_eq!(found.id, call.id);
        assert!(store.get_by_conversation("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_video_url_only_kept_when_ready() {
        let store = MemoryStore::new();
        let call = store.upsert_from_webhook(delivery("c", 5)).await.unwrap();

        store
            .set_video_status(call.id, VideoStatus::Generating, Some("ignored"))
            .await
            .unwrap();
        let stored = CallEventRepository::get(&store, call.id).await.unwrap().unwrap();
        assert_eq!(stored.video_url, None);

        store
            .set_video_status(call.id, VideoStatus::Ready, Some("https://cdn/v.mp4"))
            .await
            .unwrap();
        let stored = CallEventRepository::get(&store, call.id).await.unwrap().unwrap();
        assert_eq!(stored.video_status, VideoStatus::Ready);
        assert_eq!(stored.video_url.as_deref(), Some("https://cdn/v.mp4"));
    }

    #[tokio::test]
    async fn test_stale_generating_runs_fail() {
        let store = MemoryStore::new();
        let stuck = store.upsert_from_webhook(delivery("stuck", 5)).await.unwrap();
        let ready = store.upsert_from_webhook(delivery("ready", 5)).await.unwrap();
        store
            .set_video_status(stuck.id, VideoStatus::Generating, None)
            .await
            .unwrap();
        store
            .set_video_status(ready.id, VideoStatus::Ready, Some("https://cdn/v.mp4"))
            .await
            .unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.fail_stale_video_runs(cutoff).await.unwrap(), 1);
        assert_eq!(
            CallEventRepository::get(&store, stuck.id)
                .await
                .unwrap()
                .unwrap()
                .video_status,
            VideoStatus::Failed
        );
        assert_eq!(
            CallEventRepository::get(&store, ready.id)
                .await
                .unwrap()
                .unwrap()
                .video_status,
            VideoStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_recent_generating_run_is_kept() {
        let store = MemoryStore::new();
        let call = store.upsert_from_webhook(delivery("live", 5)).await.unwrap();
        store
            .set_video_status(call.id, VideoStatus::Generating, None)
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(15);
        assert_eq!(store.fail_stale_video_runs(cutoff).await.unwrap(), 0);
        assert_eq!(
            CallEventRepository::get(&store, call.id)
                .await
                .unwrap()
                .unwrap()
                .video_status,
            VideoStatus::Generating
        );
    }

    #[tokio::test]
    async fn test_toggle_review() {
        let store = MemoryStore::new();
        let call = store.upsert_from_webhook(delivery("c", 5)).await.unwrap();
        let now = Utc::now();

        assert_eq!(store.toggle_review(call.id, now).await.unwrap(), Some(now));
        assert_eq!(store.toggle_review(call.id, now).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_call_errors() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let err = store
            .set_video_status(id, VideoStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CallNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_paging() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .upsert_from_webhook(delivery(&format!("conv_{i}"), 5))
                .await
                .unwrap();
        }
        let page = store
            .list(ListCallsRequest {
                limit: Some(2),
                offset: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.calls.len(), 2);
        assert!(page.calls[0].id > page.calls[1].id);
    }
}
