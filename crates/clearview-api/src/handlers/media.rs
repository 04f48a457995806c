//! Rehosted media.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;

use crate::error::ApiError;
use crate::AppState;

/// `GET /api/v1/media/*key`
///
/// Keys are content-addressed, so responses are cacheable forever.
pub async fn get_media(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let blob = state
        .blobs
        .get(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Media {} not found", key)))?;

    Ok((
        [
            (header::CONTENT_TYPE, blob.content_type),
            (
                header::CACHE_CONTROL,
                "public, max-age=31536000, immutable".to_string(),
            ),
        ],
        blob.data,
    ))
}
