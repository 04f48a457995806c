//! PostgreSQL event store for call records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use clearview_core::{
    defaults, CallEvent, CallEventRepository, Error, ListCallsRequest, ListCallsResponse,
    NewCallEvent, Result, VideoStatus,
};

const CALL_COLUMNS: &str = "id, conversation_id, agent_id, event_type, raw_payload, raw_body,
    event_timestamp, call_started_at, call_outcome, call_duration_secs, vision_scale,
    activities_affected, stated_preference, extracted_email, doctor_email_sent_at,
    patient_email_sent_at, patient_email_used, video_status, video_url, reviewed_at,
    patient_id, created_at, updated_at";

/// Clamp caller-supplied pagination to the allowed window.
pub fn page_bounds(req: &ListCallsRequest) -> (i64, i64) {
    let limit = req
        .limit
        .unwrap_or(defaults::PAGE_LIMIT)
        .clamp(1, defaults::PAGE_LIMIT_MAX);
    let offset = req.offset.unwrap_or(defaults::PAGE_OFFSET).max(0);
    (limit, offset)
}

/// PostgreSQL call event repository.
pub struct PgCallEventRepository {
    pool: Pool<Postgres>,
}

impl PgCallEventRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(r: &PgRow) -> CallEvent {
        let outcome: String = r.get("call_outcome");
        let video_status: String = r.get("video_status");
        CallEvent {
            id: r.get("id"),
            conversation_id: r.get("conversation_id"),
            agent_id: r.get("agent_id"),
            event_type: r.get("event_type"),
            raw_payload: r.get("raw_payload"),
            raw_body: r.get("raw_body"),
            event_timestamp: r.get("event_timestamp"),
            call_started_at: r.get("call_started_at"),
            call_outcome: outcome.parse().unwrap_or_default(),
            call_duration_secs: r.get("call_duration_secs"),
            vision_scale: r.get("vision_scale"),
            activities_affected: r.get("activities_affected"),
            stated_preference: r.get("stated_preference"),
            extracted_email: r.get("extracted_email"),
            doctor_email_sent_at: r.get("doctor_email_sent_at"),
            patient_email_sent_at: r.get("patient_email_sent_at"),
            patient_email_used: r.get("patient_email_used"),
            video_status: video_status.parse().unwrap_or_default(),
            video_url: r.get("video_url"),
            reviewed_at: r.get("reviewed_at"),
            patient_id: r.get("patient_id"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }
    }

    fn require_row(id: Uuid, rows_affected: u64) -> Result<()> {
        if rows_affected == 0 {
            return Err(Error::CallNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl CallEventRepository for PgCallEventRepository {
    async fn upsert_from_webhook(&self, event: NewCallEvent) -> Result<CallEvent> {
        let id = clearview_core::new_v7();
        let now = Utc::now();
        let s = &event.scalars;
        let row = sqlx::query(&format!(
            "INSERT INTO call_event (id, conversation_id, agent_id, event_type, raw_payload,
                raw_body, event_timestamp, call_started_at, call_outcome, call_duration_secs,
                vision_scale, activities_affected, stated_preference, extracted_email,
                created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
             ON CONFLICT (conversation_id) DO UPDATE SET
                agent_id = EXCLUDED.agent_id,
                event_type = EXCLUDED.event_type,
                raw_payload = EXCLUDED.raw_payload,
                raw_body = EXCLUDED.raw_body,
                event_timestamp = EXCLUDED.event_timestamp,
                call_started_at = EXCLUDED.call_started_at,
                call_outcome = EXCLUDED.call_outcome,
                call_duration_secs = EXCLUDED.call_duration_secs,
                vision_scale = EXCLUDED.vision_scale,
                activities_affected = EXCLUDED.activities_affected,
                stated_preference = EXCLUDED.stated_preference,
                extracted_email = EXCLUDED.extracted_email,
                updated_at = EXCLUDED.updated_at
             RETURNING {CALL_COLUMNS}"
        ))
        .bind(id)
        .bind(&event.conversation_id)
        .bind(&event.agent_id)
        .bind(&event.event_type)
        .bind(&event.raw_payload)
        .bind(&event.raw_body)
        .bind(event.event_timestamp)
        .bind(event.call_started_at)
        .bind(s.call_outcome.to_string())
        .bind(s.call_duration_secs)
        .bind(s.vision_scale)
        .bind(&s.activities_affected)
        .bind(&s.stated_preference)
        .bind(&s.extracted_email)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let call = Self::parse_row(&row);
        tracing::debug!(
            subsystem = "db",
            component = "calls",
            op = "upsert",
            call_id = %call.id,
            conversation_id = %call.conversation_id,
            inserted = call.id == id,
            "Upserted call event"
        );
        Ok(call)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CallEvent>> {
        let row = sqlx::query(&format!("SELECT {CALL_COLUMNS} FROM call_event WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn get_by_conversation(&self, conversation_id: &str) -> Result<Option<CallEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {CALL_COLUMNS} FROM call_event WHERE conversation_id = $1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn list(&self, req: ListCallsRequest) -> Result<ListCallsResponse> {
        let (limit, offset) = page_bounds(&req);
        let rows = sqlx::query(&format!(
            "SELECT {CALL_COLUMNS} FROM call_event
             ORDER BY created_at DESC, id DESC
             LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM call_event")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(ListCallsResponse {
            calls: rows.iter().map(Self::parse_row).collect(),
            total,
        })
    }

    async fn set_video_status(
        &self,
        id: Uuid,
        status: VideoStatus,
        url: Option<&str>,
    ) -> Result<()> {
        let url = if status == VideoStatus::Ready { url } else { None };
        let result = sqlx::query(
            "UPDATE call_event SET video_status = $2, video_url = $3, updated_at = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.to_string())
        .bind(url)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Self::require_row(id, result.rows_affected())
    }

    async fn fail_stale_video_runs(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE call_event SET video_status = 'failed', video_url = NULL, updated_at = $2
             WHERE video_status = 'generating' AND updated_at < $1",
        )
        .bind(before)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn mark_doctor_email_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE call_event SET doctor_email_sent_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Self::require_row(id, result.rows_affected())
    }

    async fn mark_patient_email_sent(
        &self,
        id: Uuid,
        email: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE call_event
             SET patient_email_sent_at = $2, patient_email_used = $3, updated_at = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .bind(email)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Self::require_row(id, result.rows_affected())
    }

    async fn toggle_review(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "UPDATE call_event
             SET reviewed_at = CASE WHEN reviewed_at IS NULL THEN $2 ELSE NULL END,
                 updated_at = $2
             WHERE id = $1
             RETURNING reviewed_at",
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(r) => Ok(r.get("reviewed_at")),
            None => Err(Error::CallNotFound(id)),
        }
    }

    async fn assign_patient(&self, id: Uuid, patient_id: Option<Uuid>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE call_event SET patient_id = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(patient_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Self::require_row(id, result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds_defaults() {
        assert_eq!(
            page_bounds(&ListCallsRequest::default()),
            (defaults::PAGE_LIMIT, 0)
        );
    }

    #[test]
    fn test_page_bounds_clamped() {
        let req = ListCallsRequest {
            limit: Some(100_000),
            offset: Some(-5),
        };
        assert_eq!(page_bounds(&req), (defaults::PAGE_LIMIT_MAX, 0));

        let req = ListCallsRequest {
            limit: Some(0),
            offset: Some(10),
        };
        assert_eq!(page_bounds(&req), (1, 10));
    }
}
