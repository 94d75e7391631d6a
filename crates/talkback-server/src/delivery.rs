//! Turning a request's terminal outcome into a stored status and a push.
//!
//! Shared by the per-request waiter and the background listener. The
//! stored row is the source of truth: an outcome is pushed only if it
//! actually moved the row out of `sent`, so a client never sees two
//! verdicts for one message. A matched reply is stored before speech
//! synthesis starts, so a slow synthesizer cannot let the row expire.

use crate::AppState;
use std::path::{Path, PathBuf};
use talkback_db::{attach_reply_audio, resolve_message, Resolution};
use talkback_relay::{RelayError, ReplyOutcome};
use talkback_types::{
    MessageStatus, ReplyPayload, StatusPayload, UserId, EVENT_REPLY, EVENT_STATUS,
};

/// URL prefix under which files in the reply audio directory are served.
pub const AUDIO_URL_PREFIX: &str = "/api/audio";

/// Records and pushes the verdict for `message_id`.
///
/// A relay error means the waiter gave up without a verdict; the message
/// is stored as `ignored`.
pub async fn complete(
    state: &AppState,
    user_id: UserId,
    message_id: &str,
    outcome: Result<ReplyOutcome, RelayError>,
) {
    match outcome {
        Ok(ReplyOutcome::Replied(reply)) => deliver_reply(state, user_id, message_id, reply).await,
        Ok(ReplyOutcome::TimedOut) => {
            finish_with_status(state, user_id, message_id, Resolution::Timeout).await
        }
        Err(e) => {
            tracing::warn!(
                user_id,
                message_id,
                "relay failed while waiting for reply: {}",
                e
            );
            finish_with_status(state, user_id, message_id, Resolution::Ignored).await
        }
    }
}

/// Stores a matched reply, renders its audio and pushes it.
pub async fn deliver_reply(state: &AppState, user_id: UserId, message_id: &str, reply: String) {
    let resolution = Resolution::Replied {
        reply: reply.clone(),
        reply_audio: None,
    };
    if !persist(state, message_id, resolution).await {
        return;
    }

    let reply_audio = match synthesize(state, message_id, &reply).await {
        Some(url) => Some(store_reply_audio(state, message_id, url).await),
        None => None,
    };
    state.hub.send_to_user(
        user_id,
        EVENT_REPLY,
        ReplyPayload {
            message_id: message_id.to_string(),
            reply,
            reply_audio,
        },
    );
}

async fn finish_with_status(
    state: &AppState,
    user_id: UserId,
    message_id: &str,
    resolution: Resolution,
) {
    let status: MessageStatus = resolution.status();
    if !persist(state, message_id, resolution).await {
        return;
    }
    state.hub.send_to_user(
        user_id,
        EVENT_STATUS,
        StatusPayload {
            message_id: message_id.to_string(),
            status,
        },
    );
}

/// Returns whether the row was moved out of `sent`.
async fn persist(state: &AppState, message_id: &str, resolution: Resolution) -> bool {
    let pool = state.pool.clone();
    let id = message_id.to_string();
    let status = resolution.status();
    let result = tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| format!("db connection failed: {}", e))?;
        resolve_message(&conn, &id, &resolution).map_err(|e| e.to_string())
    })
    .await;

    match result {
        Ok(Ok(true)) => {
            tracing::info!(message_id, status = %status, "message resolved");
            true
        }
        Ok(Ok(false)) => {
            tracing::debug!(
                message_id,
                status = %status,
                "message already resolved; dropping late verdict"
            );
            false
        }
        Ok(Err(e)) => {
            tracing::error!(message_id, "failed to persist message status: {}", e);
            false
        }
        Err(e) => {
            tracing::error!(message_id, "status update task failed: {}", e);
            false
        }
    }
}

/// Saves the audio URL on the replied row. The URL is kept for the push
/// even if the update fails; the file is already being served.
async fn store_reply_audio(state: &AppState, message_id: &str, url: String) -> String {
    let pool = state.pool.clone();
    let id = message_id.to_string();
    let stored = url.clone();
    let result = tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| format!("db connection failed: {}", e))?;
        attach_reply_audio(&conn, &id, &stored).map_err(|e| e.to_string())
    })
    .await;

    match result {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => {
            tracing::warn!(message_id, "replied row vanished before audio was stored")
        }
        Ok(Err(e)) => tracing::error!(message_id, "failed to store reply audio: {}", e),
        Err(e) => tracing::error!(message_id, "reply audio task failed: {}", e),
    }
    url
}

/// Renders `reply` to speech and returns its URL. Failures are logged and
/// leave the reply text-only.
async fn synthesize(state: &AppState, message_id: &str, reply: &str) -> Option<String> {
    let generated = match state.tts.synthesize(reply).await {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(message_id, "speech synthesis failed: {}", e);
            return None;
        }
    };

    match place_in_audio_dir(&state.reply_audio_dir(), &generated, message_id).await {
        Ok(name) => Some(format!("{}/{}", AUDIO_URL_PREFIX, name)),
        Err(e) => {
            tracing::warn!(
                message_id,
                path = %generated.display(),
                "failed to move synthesized audio into place: {}",
                e
            );
            None
        }
    }
}

/// Makes `generated` servable from the reply directory and returns its
/// file name.
async fn place_in_audio_dir(
    audio_dir: &Path,
    generated: &Path,
    message_id: &str,
) -> std::io::Result<String> {
    if generated.parent() == Some(audio_dir) {
        if let Some(name) = generated.file_name().and_then(|n| n.to_str()) {
            return Ok(name.to_string());
        }
    }

    let ext = generated
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("wav");
    let name = format!("reply-{}.{}", message_id, ext);
    let target: PathBuf = audio_dir.join(&name);

    tokio::fs::create_dir_all(audio_dir).await?;
    tokio::fs::copy(generated, &target).await?;
    if let Err(e) = tokio::fs::remove_file(generated).await {
        tracing::debug!(path = %generated.display(), "could not remove synthesizer output: {}", e);
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn audio_already_in_place_keeps_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.wav");
        std::fs::write(&file, b"RIFF").unwrap();

        let name = place_in_audio_dir(dir.path(), &file, "abc").await.unwrap();
        assert_eq!(name, "out.wav");
        assert!(file.exists());
    }

    #[tokio::test]
    async fn foreign_audio_is_moved_under_message_name() {
        let audio_dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let file = scratch.path().join("tts-123.mp3");
        std::fs::write(&file, b"ID3").unwrap();

        let name = place_in_audio_dir(audio_dir.path(), &file, "abc").await.unwrap();
        assert_eq!(name, "reply-abc.mp3");
        assert!(audio_dir.path().join("reply-abc.mp3").exists());
        assert!(!file.exists());
    }
}
