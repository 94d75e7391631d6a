//! The queue relay: a thin adapter over a [`QueueStore`].
//!
//! Outbound requests are pushed onto a shared outbound queue addressed to a
//! recipient; replies accumulate in the recipient's inbox list
//! (`<inbox_prefix><recipient>`). Entries on both sides are JSON objects
//! carrying the envelope text.

use crate::error::RelayError;
use crate::store::QueueStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An entry on the outbound queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub recipient: String,
}

/// An entry in a recipient's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxMessage {
    pub text: String,
    #[serde(default)]
    pub timestamp: String,
}

impl InboxMessage {
    /// Wraps `text` with the current time.
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Parses a raw inbox entry.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Push/peek/pop access to the external store, keyed by recipient.
#[derive(Clone)]
pub struct QueueRelay {
    store: Arc<dyn QueueStore>,
    outbound_queue: String,
    inbox_prefix: String,
}

impl QueueRelay {
    pub fn new(
        store: Arc<dyn QueueStore>,
        outbound_queue: impl Into<String>,
        inbox_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            outbound_queue: outbound_queue.into(),
            inbox_prefix: inbox_prefix.into(),
        }
    }

    /// Store key of `recipient`'s inbox.
    pub fn inbox_key(&self, recipient: &str) -> String {
        format!("{}{}", self.inbox_prefix, recipient)
    }

    pub fn outbound_queue(&self) -> &str {
        &self.outbound_queue
    }

    pub async fn push(&self, key: &str, text: &str) -> Result<(), RelayError> {
        self.store.push_front(key, text).await
    }

    /// The entry a subsequent [`QueueRelay::pop_front`] would remove, if no
    /// one else pops first. Not a reservation.
    pub async fn peek_front(&self, key: &str) -> Result<Option<String>, RelayError> {
        self.store.peek_front(key).await
    }

    pub async fn pop_front(&self, key: &str) -> Result<Option<String>, RelayError> {
        self.store.pop_front(key).await
    }

    /// Non-destructive read of every entry under `key`, newest first.
    pub async fn read_all(&self, key: &str) -> Result<Vec<String>, RelayError> {
        self.store.range_all(key).await
    }

    /// Queues an encoded request envelope for delivery to `recipient`.
    pub async fn send_request(&self, recipient: &str, envelope: &str) -> Result<(), RelayError> {
        let entry = serde_json::to_string(&OutboundMessage {
            text: envelope.to_string(),
            recipient: recipient.to_string(),
        })?;
        self.push(&self.outbound_queue, &entry).await?;
        tracing::debug!(
            queue = %self.outbound_queue,
            recipient,
            "request queued for operator"
        );
        Ok(())
    }

    /// Drops an encoded reply envelope into `recipient`'s inbox.
    ///
    /// This is what the operator side does; it is exposed for the reply
    /// tool and for tests.
    pub async fn deliver_to_inbox(&self, recipient: &str, envelope: &str) -> Result<(), RelayError> {
        let entry = serde_json::to_string(&InboxMessage::now(envelope))?;
        self.push(&self.inbox_key(recipient), &entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn relay(store: &MemoryStore) -> QueueRelay {
        QueueRelay::new(Arc::new(store.clone()), "message_queue", "inbox:")
    }

    #[tokio::test]
    async fn send_request_wraps_envelope_for_recipient() {
        let store = MemoryStore::new();
        let relay = relay(&store);

        relay
            .send_request("VoiceBot", "from-web:7:abc hello")
            .await
            .unwrap();

        let raw = relay.pop_front("message_queue").await.unwrap().unwrap();
        let entry: OutboundMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.text, "from-web:7:abc hello");
        assert_eq!(entry.recipient, "VoiceBot");
    }

    #[tokio::test]
    async fn inbox_entries_carry_text_and_timestamp() {
        let store = MemoryStore::new();
        let relay = relay(&store);
        assert_eq!(relay.inbox_key("VoiceBot"), "inbox:VoiceBot");

        relay
            .deliver_to_inbox("VoiceBot", "to-web:7:abc world")
            .await
            .unwrap();

        let raw = relay.peek_front("inbox:VoiceBot").await.unwrap().unwrap();
        let entry = InboxMessage::parse(&raw).unwrap();
        assert_eq!(entry.text, "to-web:7:abc world");
        assert!(!entry.timestamp.is_empty());
        assert_eq!(store.len("inbox:VoiceBot"), 1, "peek must not consume");
    }

    #[test]
    fn inbox_entry_without_timestamp_parses() {
        let entry = InboxMessage::parse(r#"{"text":"to-web hi"}"#).unwrap();
        assert_eq!(entry.text, "to-web hi");
        assert!(entry.timestamp.is_empty());
    }
}
