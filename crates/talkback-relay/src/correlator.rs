//! Matching asynchronously arriving replies to the request that caused them.
//!
//! The waiter pops entries off the recipient's inbox until one answers its
//! request or the deadline passes. Consumption is at-most-once: every popped
//! entry is gone for good, whether it matched or not. There is no requeue.
//! Entries are served in the store's front order, so the most recently
//! pushed entry is examined first.
//!
//! Only `pop_front` is used. A separate peek followed by a pop is not
//! atomic and can double-consume when several waiters share an inbox.

use crate::config::EnvelopeFormat;
use crate::envelope::{self, EnvelopeError};
use crate::error::RelayError;
use crate::relay::{InboxMessage, QueueRelay};
use std::time::Duration;
use talkback_types::{Direction, UserId};
use tokio::time::Instant;

/// One outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub user_id: UserId,
    pub msg_id: String,
    pub submitted_at: Instant,
    pub deadline: Instant,
}

impl PendingRequest {
    /// A request submitted now that expires after `timeout`.
    pub fn new(user_id: UserId, msg_id: impl Into<String>, timeout: Duration) -> Self {
        let submitted_at = Instant::now();
        Self {
            user_id,
            msg_id: msg_id.into(),
            submitted_at,
            deadline: submitted_at + timeout,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Terminal result of waiting for a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Replied(String),
    TimedOut,
}

/// Why a consumed entry did not answer the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The stored entry is not an inbox JSON object.
    Undecodable(String),
    Malformed(EnvelopeError),
    /// Well-formed, but addressed to another request.
    Mismatch { user_id: UserId, msg_id: String },
}

/// Classification of a single inbox entry against a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryVerdict {
    Match(String),
    Ignored(IgnoreReason),
}

/// Drives the request/await/timeout lifecycle against one inbox.
#[derive(Clone)]
pub struct Correlator {
    relay: QueueRelay,
    channel: String,
    format: EnvelopeFormat,
    poll_interval: Duration,
}

impl Correlator {
    pub fn new(
        relay: QueueRelay,
        channel: impl Into<String>,
        format: EnvelopeFormat,
        poll_interval: Duration,
    ) -> Self {
        Self {
            relay,
            channel: channel.into(),
            format,
            poll_interval,
        }
    }

    pub fn relay(&self) -> &QueueRelay {
        &self.relay
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn format(&self) -> EnvelopeFormat {
        self.format
    }

    /// Encodes the outbound envelope for a request in the configured format.
    pub fn encode_request(&self, user_id: UserId, msg_id: &str, body: &str) -> String {
        match self.format {
            EnvelopeFormat::Correlated => {
                envelope::encode(Direction::From, &self.channel, user_id, msg_id, body)
            }
            EnvelopeFormat::Legacy => envelope::encode_legacy(Direction::From, &self.channel, body),
        }
    }

    /// Decides whether the raw inbox entry answers `request`.
    ///
    /// In the legacy format any well-formed reply matches, since there is
    /// only one pending slot per recipient.
    pub fn classify(&self, raw: &str, request: &PendingRequest) -> EntryVerdict {
        let entry = match InboxMessage::parse(raw) {
            Ok(entry) => entry,
            Err(e) => return EntryVerdict::Ignored(IgnoreReason::Undecodable(e.to_string())),
        };

        match self.format {
            EnvelopeFormat::Correlated => {
                match envelope::decode(&entry.text, Direction::To, &self.channel) {
                    Ok(env) if env.matches(request.user_id, &request.msg_id) => {
                        EntryVerdict::Match(env.body)
                    }
                    Ok(env) => EntryVerdict::Ignored(IgnoreReason::Mismatch {
                        user_id: env.user_id,
                        msg_id: env.msg_id,
                    }),
                    Err(e) => EntryVerdict::Ignored(IgnoreReason::Malformed(e)),
                }
            }
            EnvelopeFormat::Legacy => {
                match envelope::decode_legacy(&entry.text, Direction::To, &self.channel) {
                    Ok(env) => EntryVerdict::Match(env.body),
                    Err(e) => EntryVerdict::Ignored(IgnoreReason::Malformed(e)),
                }
            }
        }
    }

    /// Waits for the reply to `request` in `recipient`'s inbox.
    ///
    /// Returns [`ReplyOutcome::TimedOut`] once the request's deadline has
    /// passed; nothing is popped after that point.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] as soon as the store cannot
    /// be reached. The request should then be treated as failed.
    pub async fn await_reply(
        &self,
        recipient: &str,
        request: &PendingRequest,
    ) -> Result<ReplyOutcome, RelayError> {
        let key = self.relay.inbox_key(recipient);

        loop {
            let now = Instant::now();
            if now >= request.deadline {
                tracing::info!(
                    user_id = request.user_id,
                    message_id = %request.msg_id,
                    waited_ms = now.duration_since(request.submitted_at).as_millis() as u64,
                    "reply wait timed out"
                );
                return Ok(ReplyOutcome::TimedOut);
            }

            match self.relay.pop_front(&key).await? {
                Some(raw) => match self.classify(&raw, request) {
                    EntryVerdict::Match(body) => {
                        tracing::info!(
                            user_id = request.user_id,
                            message_id = %request.msg_id,
                            "reply matched"
                        );
                        return Ok(ReplyOutcome::Replied(body));
                    }
                    EntryVerdict::Ignored(reason) => {
                        tracing::warn!(
                            user_id = request.user_id,
                            message_id = %request.msg_id,
                            reason = ?reason,
                            "consumed inbox entry that does not answer this request"
                        );
                    }
                },
                None => {
                    let remaining = request.deadline.saturating_duration_since(now);
                    tokio::time::sleep(self.poll_interval.min(remaining)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn correlator(format: EnvelopeFormat) -> Correlator {
        let relay = QueueRelay::new(Arc::new(MemoryStore::new()), "message_queue", "inbox:");
        Correlator::new(relay, "web", format, Duration::from_millis(500))
    }

    fn entry(text: &str) -> String {
        serde_json::to_string(&InboxMessage::now(text)).unwrap()
    }

    #[tokio::test]
    async fn classify_exact_match() {
        let c = correlator(EnvelopeFormat::Correlated);
        let req = PendingRequest::new(7, "abc123", Duration::from_secs(60));
        assert_eq!(
            c.classify(&entry("to-web:7:abc123 world"), &req),
            EntryVerdict::Match("world".to_string())
        );
    }

    #[tokio::test]
    async fn classify_wrong_user_or_message() {
        let c = correlator(EnvelopeFormat::Correlated);
        let req = PendingRequest::new(7, "abc123", Duration::from_secs(60));
        assert_eq!(
            c.classify(&entry("to-web:9:abc123 world"), &req),
            EntryVerdict::Ignored(IgnoreReason::Mismatch {
                user_id: 9,
                msg_id: "abc123".to_string()
            })
        );
        assert!(matches!(
            c.classify(&entry("to-web:7:zzz world"), &req),
            EntryVerdict::Ignored(IgnoreReason::Mismatch { .. })
        ));
    }

    #[tokio::test]
    async fn classify_malformed_and_undecodable() {
        let c = correlator(EnvelopeFormat::Correlated);
        let req = PendingRequest::new(7, "abc123", Duration::from_secs(60));
        assert!(matches!(
            c.classify(&entry("hello world"), &req),
            EntryVerdict::Ignored(IgnoreReason::Malformed(_))
        ));
        assert!(matches!(
            c.classify(&entry("from-web:7:abc123 echo"), &req),
            EntryVerdict::Ignored(IgnoreReason::Malformed(EnvelopeError::DirectionMismatch { .. }))
        ));
        assert!(matches!(
            c.classify("to-web:7:abc123 not json", &req),
            EntryVerdict::Ignored(IgnoreReason::Undecodable(_))
        ));
    }

    #[tokio::test]
    async fn legacy_format_matches_any_reply() {
        let c = correlator(EnvelopeFormat::Legacy);
        let req = PendingRequest::new(7, "abc123", Duration::from_secs(60));
        assert_eq!(
            c.classify(&entry("to-web hi"), &req),
            EntryVerdict::Match("hi".to_string())
        );
        assert!(matches!(
            c.classify(&entry("to-web:7:abc123 hi"), &req),
            EntryVerdict::Ignored(IgnoreReason::Malformed(_))
        ));
        assert_eq!(c.encode_request(7, "abc123", "hello"), "from-web hello");
    }

    #[tokio::test]
    async fn correlated_request_encoding() {
        let c = correlator(EnvelopeFormat::Correlated);
        assert_eq!(c.encode_request(7, "abc123", "hello"), "from-web:7:abc123 hello");
    }
}
