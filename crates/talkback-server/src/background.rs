//! Background inbox listener for `listener` delivery mode.
//!
//! Instead of one waiter per request, a single task scans the bot's inbox
//! without consuming it and delivers each new reply. Store outages are
//! retried forever with a fixed backoff.

use crate::{delivery, AppState};
use std::sync::Arc;
use std::time::Duration;
use talkback_db::get_message;
use talkback_relay::envelope::{decode, decode_legacy};
use talkback_relay::{EnvelopeFormat, InboxMessage, InboxScanner};
use talkback_types::{Direction, MessageStatus, ReplyPayload, UserId, EVENT_REPLY};

/// Scan cadence.
#[derive(Debug, Clone, Copy)]
pub struct ListenerTiming {
    /// Sleep after a scan that found nothing new.
    pub interval: Duration,
    /// Sleep after a failed scan.
    pub backoff: Duration,
}

/// Spawns the listener task. It stops when `state.shutdown` is cancelled.
pub fn start_inbox_listener(
    state: Arc<AppState>,
    timing: ListenerTiming,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let scanner = InboxScanner::new(state.correlator.relay().clone());
        run_listener(state, scanner, timing).await;
    })
}

async fn run_listener(state: Arc<AppState>, mut scanner: InboxScanner, timing: ListenerTiming) {
    let recipient = state.recipient.clone();

    // Replies that predate this process are not redelivered.
    loop {
        match scanner.prime(&recipient).await {
            Ok(skipped) => {
                tracing::info!(recipient = %recipient, skipped, "inbox listener started");
                break;
            }
            Err(e) => {
                tracing::warn!(recipient = %recipient, "inbox listener cannot reach store: {}", e);
                if sleep_or_shutdown(&state, timing.backoff).await {
                    return;
                }
            }
        }
    }

    loop {
        let pause = match scanner.scan(&recipient).await {
            Ok(entries) if entries.is_empty() => timing.interval,
            Ok(entries) => {
                for raw in entries {
                    handle_entry(&state, &raw).await;
                }
                Duration::ZERO
            }
            Err(e) => {
                tracing::warn!(
                    recipient = %recipient,
                    backoff_ms = timing.backoff.as_millis() as u64,
                    "inbox scan failed: {}",
                    e
                );
                timing.backoff
            }
        };
        if sleep_or_shutdown(&state, pause).await {
            break;
        }
    }

    tracing::info!(recipient = %recipient, "inbox listener stopped");
}

/// Returns `true` if shutdown was requested.
async fn sleep_or_shutdown(state: &AppState, pause: Duration) -> bool {
    tokio::select! {
        () = state.shutdown.cancelled() => true,
        () = tokio::time::sleep(pause) => false,
    }
}

async fn handle_entry(state: &AppState, raw: &str) {
    let entry = match InboxMessage::parse(raw) {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!("dropping undecodable inbox entry: {}", e);
            return;
        }
    };
    let channel = state.correlator.channel();

    match state.correlator.format() {
        EnvelopeFormat::Correlated => match decode(&entry.text, Direction::To, channel) {
            Ok(env) => {
                if is_pending(state, env.user_id, &env.msg_id).await {
                    delivery::deliver_reply(state, env.user_id, &env.msg_id, env.body).await;
                } else {
                    tracing::warn!(
                        user_id = env.user_id,
                        message_id = %env.msg_id,
                        "reply does not answer any pending request; dropped"
                    );
                }
            }
            Err(e) => tracing::warn!(reason = %e, "dropping malformed envelope"),
        },
        // Legacy replies carry no identity, so everyone connected hears them.
        EnvelopeFormat::Legacy => match decode_legacy(&entry.text, Direction::To, channel) {
            Ok(env) => state.hub.broadcast_all(
                EVENT_REPLY,
                ReplyPayload {
                    message_id: String::new(),
                    reply: env.body,
                    reply_audio: None,
                },
            ),
            Err(e) => tracing::warn!(reason = %e, "dropping malformed envelope"),
        },
    }
}

/// Whether `user_id` has a `sent` message with this id.
async fn is_pending(state: &AppState, user_id: UserId, message_id: &str) -> bool {
    let pool = state.pool.clone();
    let message_id = message_id.to_string();
    let result = tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| format!("db connection failed: {}", e))?;
        get_message(&conn, user_id, &message_id).map_err(|e| e.to_string())
    })
    .await;

    match result {
        Ok(Ok(Some(record))) => record.status == MessageStatus::Sent,
        Ok(Ok(None)) => false,
        Ok(Err(e)) => {
            tracing::error!(user_id, "pending lookup failed: {}", e);
            false
        }
        Err(e) => {
            tracing::error!(user_id, "pending lookup task failed: {}", e);
            false
        }
    }
}
