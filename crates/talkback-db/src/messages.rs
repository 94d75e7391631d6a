//! Persistence of submitted messages and their lifecycle status.
//!
//! Status changes are forward-only: every update is guarded by
//! `status = 'sent'`, so a message that has already reached a terminal
//! state can never be revived or overwritten by a late reply.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::time::Duration;
use talkback_types::{MessageStatus, UserId};
use thiserror::Error;

/// Errors raised by the message store.
#[derive(Debug, Error)]
pub enum MessageStoreError {
    #[error("message database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored message has invalid status: {0}")]
    InvalidStatus(String),
}

/// A freshly submitted message, recorded as `sent`.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub user_id: UserId,
    pub username: &'a str,
    pub message_id: &'a str,
    /// Recognized speech sent to the operator.
    pub text: &'a str,
}

/// Terminal outcome recorded for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Replied {
        reply: String,
        reply_audio: Option<String>,
    },
    Timeout,
    Ignored,
}

impl Resolution {
    pub fn status(&self) -> MessageStatus {
        match self {
            Self::Replied { .. } => MessageStatus::Replied,
            Self::Timeout => MessageStatus::Timeout,
            Self::Ignored => MessageStatus::Ignored,
        }
    }
}

/// A stored message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub user_id: UserId,
    pub username: String,
    pub message_id: String,
    pub text: String,
    pub reply: Option<String>,
    pub reply_audio: Option<String>,
    pub status: MessageStatus,
    pub sent_at: String,
    pub replied_at: Option<String>,
    /// When lazy expiry may time the message out; unset until relayed.
    pub deadline: Option<String>,
}

const SELECT_COLUMNS: &str = "id, user_id, username, message_id, text, reply, reply_audio, \
                              status, sent_at, replied_at, deadline";

/// Millisecond-precision timestamp; sorts lexically in time order.
const NOW_MS: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

fn map_row(row: &Row<'_>) -> rusqlite::Result<(MessageRecord, String)> {
    let status: String = row.get(7)?;
    Ok((
        MessageRecord {
            id: row.get(0)?,
            user_id: row.get::<_, i64>(1)? as UserId,
            username: row.get(2)?,
            message_id: row.get(3)?,
            text: row.get(4)?,
            reply: row.get(5)?,
            reply_audio: row.get(6)?,
            status: MessageStatus::Sent,
            sent_at: row.get(8)?,
            replied_at: row.get(9)?,
            deadline: row.get(10)?,
        },
        status,
    ))
}

fn finish((mut record, status): (MessageRecord, String)) -> Result<MessageRecord, MessageStoreError> {
    record.status = parse_status(&status)?;
    Ok(record)
}

fn parse_status(raw: &str) -> Result<MessageStatus, MessageStoreError> {
    raw.parse()
        .map_err(|_| MessageStoreError::InvalidStatus(raw.to_string()))
}

/// Records a new message with status `sent` and returns its row id.
///
/// # Errors
///
/// Fails on SQL errors, including a duplicate `message_id`.
pub fn insert_message(conn: &Connection, msg: &NewMessage<'_>) -> Result<i64, MessageStoreError> {
    conn.execute(
        "INSERT INTO messages (user_id, username, message_id, text, status, sent_at)
         VALUES (?1, ?2, ?3, ?4, 'sent', datetime('now'))",
        params![msg.user_id as i64, msg.username, msg.message_id, msg.text],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Sets the reply deadline of a `sent` message to now plus `timeout`.
///
/// Returns `false` when the message is unknown or already resolved.
pub fn arm_deadline(
    conn: &Connection,
    message_id: &str,
    timeout: Duration,
) -> Result<bool, MessageStoreError> {
    let changed = conn.execute(
        "UPDATE messages
         SET deadline = strftime('%Y-%m-%d %H:%M:%f', 'now', ?2)
         WHERE message_id = ?1 AND status = 'sent'",
        params![message_id, format!("+{:.3} seconds", timeout.as_secs_f64())],
    )?;
    Ok(changed == 1)
}

/// Moves a `sent` message into its terminal state.
///
/// Returns `false` when the message does not exist or was already
/// resolved; the stored row is left untouched in that case.
pub fn resolve_message(
    conn: &Connection,
    message_id: &str,
    resolution: &Resolution,
) -> Result<bool, MessageStoreError> {
    let changed = match resolution {
        Resolution::Replied { reply, reply_audio } => conn.execute(
            "UPDATE messages
             SET status = 'replied', reply = ?2, reply_audio = ?3,
                 replied_at = datetime('now'), updated_at = datetime('now')
             WHERE message_id = ?1 AND status = 'sent'",
            params![message_id, reply, reply_audio],
        )?,
        other => conn.execute(
            "UPDATE messages SET status = ?2, updated_at = datetime('now')
             WHERE message_id = ?1 AND status = 'sent'",
            params![message_id, other.status().as_str()],
        )?,
    };
    Ok(changed == 1)
}

/// Records the synthesized audio URL of a `replied` message.
pub fn attach_reply_audio(
    conn: &Connection,
    message_id: &str,
    reply_audio: &str,
) -> Result<bool, MessageStoreError> {
    let changed = conn.execute(
        "UPDATE messages SET reply_audio = ?2, updated_at = datetime('now')
         WHERE message_id = ?1 AND status = 'replied'",
        params![message_id, reply_audio],
    )?;
    Ok(changed == 1)
}

/// Loads one of `user_id`'s messages.
pub fn get_message(
    conn: &Connection,
    user_id: UserId,
    message_id: &str,
) -> Result<Option<MessageRecord>, MessageStoreError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM messages WHERE user_id = ?1 AND message_id = ?2"
            ),
            params![user_id as i64, message_id],
            map_row,
        )
        .optional()?;
    row.map(finish).transpose()
}

/// Lists `user_id`'s messages, newest first.
pub fn list_messages(
    conn: &Connection,
    user_id: UserId,
    limit: u32,
) -> Result<Vec<MessageRecord>, MessageStoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM messages WHERE user_id = ?1
         ORDER BY sent_at DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![user_id as i64, limit], map_row)?;
    let records = rows
        .map(|row| finish(row?))
        .collect::<Result<Vec<_>, MessageStoreError>>()?;
    Ok(records)
}

/// Marks `user_id`'s `sent` messages whose deadline has passed as `timeout`.
///
/// Lets a polling client observe a verdict even when no waiter is running
/// for the message. Messages without a deadline are never expired here.
/// Returns the number of rows changed.
pub fn expire_overdue(conn: &Connection, user_id: UserId) -> Result<usize, MessageStoreError> {
    let changed = conn.execute(
        &format!(
            "UPDATE messages SET status = 'timeout', updated_at = datetime('now')
             WHERE user_id = ?1 AND status = 'sent'
               AND deadline IS NOT NULL AND deadline <= {NOW_MS}"
        ),
        params![user_id as i64],
    )?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        crate::run_migrations(&conn).expect("migrations should succeed");
        conn
    }

    fn submit(conn: &Connection, user_id: UserId, message_id: &str) {
        insert_message(
            conn,
            &NewMessage {
                user_id,
                username: "alice",
                message_id,
                text: "hello",
            },
        )
        .expect("insert should succeed");
    }

    #[test]
    fn new_message_starts_sent() {
        let conn = test_db();
        submit(&conn, 7, "abc123");

        let record = get_message(&conn, 7, "abc123")
            .expect("query should succeed")
            .expect("message should exist");
        assert_eq!(record.status, MessageStatus::Sent);
        assert_eq!(record.text, "hello");
        assert!(record.reply.is_none());
    }

    #[test]
    fn get_message_is_scoped_to_owner() {
        let conn = test_db();
        submit(&conn, 7, "abc123");
        assert!(get_message(&conn, 9, "abc123").unwrap().is_none());
    }

    #[test]
    fn replied_records_reply_and_audio() {
        let conn = test_db();
        submit(&conn, 7, "abc123");

        let changed = resolve_message(
            &conn,
            "abc123",
            &Resolution::Replied {
                reply: "world".to_string(),
                reply_audio: Some("/api/audio/world.mp3".to_string()),
            },
        )
        .unwrap();
        assert!(changed);

        let record = get_message(&conn, 7, "abc123").unwrap().unwrap();
        assert_eq!(record.status, MessageStatus::Replied);
        assert_eq!(record.reply.as_deref(), Some("world"));
        assert_eq!(record.reply_audio.as_deref(), Some("/api/audio/world.mp3"));
        assert!(record.replied_at.is_some());
    }

    #[test]
    fn terminal_status_is_never_revived() {
        let conn = test_db();
        submit(&conn, 7, "abc123");

        assert!(resolve_message(&conn, "abc123", &Resolution::Timeout).unwrap());
        let late = resolve_message(
            &conn,
            "abc123",
            &Resolution::Replied {
                reply: "too late".to_string(),
                reply_audio: None,
            },
        )
        .unwrap();
        assert!(!late, "a timed-out message must not accept a reply");

        let record = get_message(&conn, 7, "abc123").unwrap().unwrap();
        assert_eq!(record.status, MessageStatus::Timeout);
        assert!(record.reply.is_none());
    }

    #[test]
    fn resolving_unknown_message_changes_nothing() {
        let conn = test_db();
        assert!(!resolve_message(&conn, "missing", &Resolution::Ignored).unwrap());
    }

    #[test]
    fn list_is_newest_first_and_limited() {
        let conn = test_db();
        submit(&conn, 7, "m1");
        submit(&conn, 7, "m2");
        submit(&conn, 7, "m3");
        submit(&conn, 8, "other");

        let listed = list_messages(&conn, 7, 2).unwrap();
        let ids: Vec<_> = listed.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2"]);
    }

    #[test]
    fn overdue_sent_messages_expire() {
        let conn = test_db();
        submit(&conn, 7, "old");
        submit(&conn, 7, "done");
        submit(&conn, 7, "unarmed");
        assert!(arm_deadline(&conn, "old", Duration::from_secs(60)).unwrap());
        assert!(arm_deadline(&conn, "done", Duration::from_secs(60)).unwrap());
        resolve_message(&conn, "done", &Resolution::Ignored).unwrap();
        conn.execute(
            "UPDATE messages SET deadline = strftime('%Y-%m-%d %H:%M:%f', 'now', '-1 seconds')
             WHERE message_id IN ('old', 'done')",
            [],
        )
        .unwrap();
        submit(&conn, 7, "fresh");
        arm_deadline(&conn, "fresh", Duration::from_secs(60)).unwrap();

        let expired = expire_overdue(&conn, 7).unwrap();
        assert_eq!(expired, 1);

        let old = get_message(&conn, 7, "old").unwrap().unwrap();
        assert_eq!(old.status, MessageStatus::Timeout);
        let fresh = get_message(&conn, 7, "fresh").unwrap().unwrap();
        assert_eq!(fresh.status, MessageStatus::Sent);
        assert!(fresh.deadline.is_some());
        let done = get_message(&conn, 7, "done").unwrap().unwrap();
        assert_eq!(done.status, MessageStatus::Ignored);
        let unarmed = get_message(&conn, 7, "unarmed").unwrap().unwrap();
        assert_eq!(unarmed.status, MessageStatus::Sent);
    }

    #[test]
    fn expiry_ignores_old_sent_at_before_deadline() {
        let conn = test_db();
        submit(&conn, 7, "slow-relay");
        conn.execute(
            "UPDATE messages SET sent_at = datetime('now', '-600 seconds')",
            [],
        )
        .unwrap();
        arm_deadline(&conn, "slow-relay", Duration::from_secs(60)).unwrap();

        assert_eq!(expire_overdue(&conn, 7).unwrap(), 0);
    }

    #[test]
    fn replied_message_survives_expiry_and_takes_audio_later() {
        let conn = test_db();
        submit(&conn, 7, "abc123");
        arm_deadline(&conn, "abc123", Duration::from_millis(1)).unwrap();
        let replied = resolve_message(
            &conn,
            "abc123",
            &Resolution::Replied {
                reply: "world".to_string(),
                reply_audio: None,
            },
        )
        .unwrap();
        assert!(replied);
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(expire_overdue(&conn, 7).unwrap(), 0);
        assert!(attach_reply_audio(&conn, "abc123", "/api/audio/reply-abc123.wav").unwrap());

        let record = get_message(&conn, 7, "abc123").unwrap().unwrap();
        assert_eq!(record.status, MessageStatus::Replied);
        assert_eq!(record.reply.as_deref(), Some("world"));
        assert_eq!(
            record.reply_audio.as_deref(),
            Some("/api/audio/reply-abc123.wav")
        );
    }

    #[test]
    fn audio_is_not_attached_to_unreplied_messages() {
        let conn = test_db();
        submit(&conn, 7, "abc123");
        assert!(!attach_reply_audio(&conn, "abc123", "/api/audio/x.wav").unwrap());
        resolve_message(&conn, "abc123", &Resolution::Timeout).unwrap();
        assert!(!attach_reply_audio(&conn, "abc123", "/api/audio/x.wav").unwrap());
    }
}
