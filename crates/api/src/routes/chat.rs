//! Chat routes
//!
//! Admin inbox, history, read markers, deletion, attachments and presence. There is no
//! route that sends a text message: text goes over the WebSocket only.

use axum::{
    extract::{multipart::MultipartError, Extension, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use supportchat_shared::{Message, Page, Thread};
use uuid::Uuid;

use crate::{
    attachments::AttachmentError,
    auth::AuthUser,
    error::{ApiError, ApiResult},
    presence::UserPresence,
    registry::ThreadPage,
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListThreadsQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub total_unread_for_admin: i64,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub thread_id: Uuid,
    pub messages: Vec<Message>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Admin inbox: one consolidated thread per customer, most recent first
pub async fn list_threads(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<ListThreadsQuery>,
) -> ApiResult<Json<ThreadPage>> {
    auth_user.require_admin()?;

    let defaults = Page::default();
    let page = Page::new(
        query.page.unwrap_or(defaults.number),
        query.page_size.unwrap_or(defaults.size),
    );
    let threads = state.hub.registry().list_threads_for_admin(page).await?;
    Ok(Json(threads))
}

/// Admin badge count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UnreadResponse>> {
    auth_user.require_admin()?;

    let total_unread_for_admin = state.hub.coordinator().total_unread_for_admin().await?;
    Ok(Json(UnreadResponse {
        total_unread_for_admin,
    }))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(thread_id): Path<Uuid>,
) -> ApiResult<Json<MessagesResponse>> {
    let messages = state
        .hub
        .list_messages(&auth_user.identity(), thread_id)
        .await?;
    Ok(Json(MessagesResponse {
        thread_id,
        messages,
    }))
}

/// Reset the caller's side of the unread counters
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(thread_id): Path<Uuid>,
) -> ApiResult<Json<Thread>> {
    let thread = state.hub.mark_read(&auth_user.identity(), thread_id).await?;
    Ok(Json(thread))
}

pub async fn delete_thread(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(thread_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    auth_user.require_admin()?;

    state
        .hub
        .delete_thread(&auth_user.identity(), thread_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Upload an image (multipart field `file`) and post it to the thread
pub async fn upload_attachment(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(thread_id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let limit = state.attachments.max_bytes();

    // Only reading the body is bounded by the timeout; delivery must not be cut short
    let bytes = tokio::time::timeout(
        state.config.upload_timeout,
        read_file_field(multipart, limit),
    )
    .await
    .map_err(|_| ApiError::from(AttachmentError::Timeout))??;

    let message = state
        .attachments
        .upload(&state.hub, auth_user.identity(), thread_id, &bytes)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Serve a stored attachment by key
pub async fn get_attachment(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let (bytes, mime) = state.attachments.fetch(&key).await?;
    Ok((
        [
            (header::CONTENT_TYPE, mime),
            (
                header::CACHE_CONTROL,
                "public, max-age=31536000, immutable".to_string(),
            ),
        ],
        bytes,
    ))
}

pub async fn get_presence(
    State(state): State<AppState>,
    Extension(_auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> Json<UserPresence> {
    Json(state.hub.presence().presence_of(user_id))
}

// =============================================================================
// Helper Functions
// =============================================================================

async fn read_file_field(mut multipart: Multipart, limit: usize) -> ApiResult<Vec<u8>> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if bytes.len() + chunk.len() > limit {
                return Err(AttachmentError::TooLarge { limit }.into());
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(bytes);
    }

    Err(ApiError::BadRequest("Missing multipart field 'file'".to_string()))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::PayloadTooLarge;
    }
    tracing::warn!(error = %err, "Malformed multipart upload");
    ApiError::BadRequest(err.body_text())
}
