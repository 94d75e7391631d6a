//! Voice upload, reply polling and history handlers.
//!
//! An upload is transcribed, recorded as `sent`, and relayed to the
//! operator. The verdict arrives later over the WebSocket; clients that
//! miss the push can poll `GET /api/reply`.

use crate::{api::ApiError, auth::SessionUser, delivery, AppState};
use axum::{
    extract::{Extension, Multipart, Query},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use talkback_db::{
    arm_deadline, expire_overdue, get_message, insert_message, list_messages, resolve_message,
    MessageRecord, NewMessage, Resolution,
};
use talkback_relay::{DeliveryMode, PendingRequest};
use talkback_types::{MessageStatus, UserId};
use uuid::Uuid;

/// Maximum upload file size: 10 MiB.
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Multipart field carrying the recording.
const AUDIO_FIELD: &str = "audio";

const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Slack added to the stored deadline so lazy expiry never overtakes a
/// waiter that matched right at its own deadline.
const LAZY_EXPIRY_GRACE: Duration = Duration::from_secs(1);
const MAX_HISTORY_LIMIT: u32 = 200;

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message_id: String,
    pub text: String,
    pub status: MessageStatus,
}

#[derive(Debug, Deserialize)]
pub struct ReplyQuery {
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

/// Extension for a stored upload, taken from the client's file name when
/// it is a plain alphanumeric suffix.
fn upload_extension(file_name: Option<&str>) -> &str {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("webm")
}

async fn read_audio_field(multipart: &mut Multipart) -> Result<(Vec<u8>, String), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("multipart error: {}", e)))?
    {
        if field.name() != Some(AUDIO_FIELD) {
            continue;
        }
        let ext = upload_extension(field.file_name()).to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {}", e)))?;
        if data.is_empty() {
            return Err(ApiError::BadRequest("audio file is empty".to_string()));
        }
        if data.len() > MAX_UPLOAD_SIZE {
            return Err(ApiError::BadRequest(format!(
                "audio file exceeds maximum size of {} bytes",
                MAX_UPLOAD_SIZE
            )));
        }
        return Ok((data.to_vec(), ext));
    }
    Err(ApiError::BadRequest(format!(
        "missing multipart field '{}'",
        AUDIO_FIELD
    )))
}

async fn transcribe_upload(state: &AppState, path: &Path) -> Result<String, ApiError> {
    let result = state.stt.transcribe(path).await;
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), "could not remove upload: {}", e);
    }
    Ok(result?)
}

/// Handler for `POST /api/upload`.
pub async fn upload_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let (data, ext) = read_audio_field(&mut multipart).await?;

    let message_id = Uuid::new_v4().simple().to_string();
    let upload_dir = state.upload_dir();
    let upload_path: PathBuf = upload_dir.join(format!("upload-{}.{}", message_id, ext));
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .map_err(|e| ApiError::InternalServerError(format!("audio dir unavailable: {}", e)))?;
    tokio::fs::write(&upload_path, &data)
        .await
        .map_err(|e| ApiError::InternalServerError(format!("failed to store upload: {}", e)))?;

    let text = transcribe_upload(&state, &upload_path).await.map_err(|e| {
        tracing::warn!(
            user_id = user.user_id,
            message_id = %message_id,
            "transcription failed: {}",
            e
        );
        e
    })?;

    record_sent(&state, &user, &message_id, &text).await?;

    let envelope = state
        .correlator
        .encode_request(user.user_id, &message_id, &text);
    if let Err(e) = state
        .correlator
        .relay()
        .send_request(&state.recipient, &envelope)
        .await
    {
        tracing::error!(
            user_id = user.user_id,
            message_id = %message_id,
            "failed to queue request: {}",
            e
        );
        mark_ignored(&state, &message_id).await;
        return Err(e.into());
    }

    tracing::info!(
        user_id = user.user_id,
        message_id = %message_id,
        recipient = %state.recipient,
        "request relayed to operator"
    );

    arm_reply_deadline(&state, &message_id).await;
    if state.delivery == DeliveryMode::Waiter {
        spawn_waiter(state.clone(), user.user_id, message_id.clone());
    }

    Ok(Json(UploadResponse {
        message_id,
        text,
        status: MessageStatus::Sent,
    }))
}

async fn record_sent(
    state: &AppState,
    user: &SessionUser,
    message_id: &str,
    text: &str,
) -> Result<(), ApiError> {
    let pool = state.pool.clone();
    let user = user.clone();
    let message_id = message_id.to_string();
    let text = text.to_string();
    tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        let conn = pool.get()?;
        insert_message(
            &conn,
            &NewMessage {
                user_id: user.user_id,
                username: &user.username,
                message_id: &message_id,
                text: &text,
            },
        )?;
        Ok(())
    })
    .await?
}

async fn mark_ignored(state: &AppState, message_id: &str) {
    let pool = state.pool.clone();
    let message_id = message_id.to_string();
    let result = tokio::task::spawn_blocking(move || -> Result<bool, ApiError> {
        let conn = pool.get()?;
        Ok(resolve_message(&conn, &message_id, &Resolution::Ignored)?)
    })
    .await;
    if !matches!(result, Ok(Ok(_))) {
        tracing::error!("failed to mark unsent message as ignored");
    }
}

/// Starts the stored reply deadline once the request is on the queue.
async fn arm_reply_deadline(state: &AppState, message_id: &str) {
    let pool = state.pool.clone();
    let id = message_id.to_string();
    let timeout = state.reply_timeout + LAZY_EXPIRY_GRACE;
    let result = tokio::task::spawn_blocking(move || -> Result<bool, ApiError> {
        let conn = pool.get()?;
        Ok(arm_deadline(&conn, &id, timeout)?)
    })
    .await;
    if !matches!(result, Ok(Ok(_))) {
        tracing::error!(message_id, "failed to arm reply deadline");
    }
}

/// Spawns the task that waits for the reply to one request.
///
/// The wait is bounded by the request deadline, not by the client's
/// connection; a verdict for a user who has gone away is simply discarded
/// by the hub. Shutdown abandons the wait and leaves the row `sent`.
fn spawn_waiter(state: Arc<AppState>, user_id: UserId, message_id: String) {
    let request = PendingRequest::new(user_id, message_id, state.reply_timeout);
    tokio::spawn(async move {
        let outcome = tokio::select! {
            () = state.shutdown.cancelled() => {
                tracing::debug!(
                    user_id,
                    message_id = %request.msg_id,
                    "shutdown; abandoning reply wait"
                );
                return;
            }
            outcome = state.correlator.await_reply(&state.recipient, &request) => outcome,
        };
        delivery::complete(&state, user_id, &request.msg_id, outcome).await;
    });
}

/// Handler for `GET /api/reply?message_id=`.
///
/// `sent` messages past their stored deadline are resolved to `timeout`
/// before the read.
pub async fn reply_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Query(query): Query<ReplyQuery>,
) -> Result<Json<MessageRecord>, ApiError> {
    let pool = state.pool.clone();
    let message_id = query.message_id;

    let record = tokio::task::spawn_blocking(move || -> Result<Option<MessageRecord>, ApiError> {
        let conn = pool.get()?;
        let expired = expire_overdue(&conn, user.user_id)?;
        if expired > 0 {
            tracing::info!(user_id = user.user_id, count = expired, "expired overdue messages");
        }
        Ok(get_message(&conn, user.user_id, &message_id)?)
    })
    .await??;

    record
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("message not found".to_string()))
}

/// Handler for `GET /api/history`.
pub async fn history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<SessionUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let pool = state.pool.clone();

    let records = tokio::task::spawn_blocking(move || -> Result<Vec<MessageRecord>, ApiError> {
        let conn = pool.get()?;
        Ok(list_messages(&conn, user.user_id, limit)?)
    })
    .await??;

    Ok(Json(records))
}
