//! Non-destructive inbox reading for listener-style delivery.
//!
//! Each scan reads a recipient's whole inbox without removing anything and
//! yields only the entries that arrived since the previous scan. Because
//! nothing is consumed, any number of independent scanners can each observe
//! every message once, unlike the single-consumer pop mode in
//! [`crate::correlator`].
//!
//! Cursors count entries in arrival order. Scanning an inbox that a pop
//! based waiter also drains shifts positions and loses entries, so the two
//! modes must not share a recipient.

use crate::error::RelayError;
use crate::relay::QueueRelay;
use std::collections::HashMap;

/// Tracks, per recipient, how many inbox entries have been processed.
pub struct InboxScanner {
    relay: QueueRelay,
    cursors: HashMap<String, usize>,
}

impl InboxScanner {
    pub fn new(relay: QueueRelay) -> Self {
        Self {
            relay,
            cursors: HashMap::new(),
        }
    }

    /// Marks everything currently in `recipient`'s inbox as processed.
    ///
    /// Returns the number of entries skipped.
    pub async fn prime(&mut self, recipient: &str) -> Result<usize, RelayError> {
        let total = self
            .relay
            .read_all(&self.relay.inbox_key(recipient))
            .await?
            .len();
        self.cursors.insert(recipient.to_string(), total);
        Ok(total)
    }

    /// Number of entries already processed for `recipient`.
    pub fn processed(&self, recipient: &str) -> usize {
        self.cursors.get(recipient).copied().unwrap_or(0)
    }

    /// Returns raw entries that arrived since the last scan, oldest first,
    /// and advances the cursor past them.
    ///
    /// A store error leaves the cursor untouched, so the next successful
    /// scan picks up where this one should have.
    pub async fn scan(&mut self, recipient: &str) -> Result<Vec<String>, RelayError> {
        let mut entries = self.relay.read_all(&self.relay.inbox_key(recipient)).await?;
        // Store order is newest first.
        entries.reverse();

        let cursor = self.cursors.entry(recipient.to_string()).or_insert(0);
        if entries.len() < *cursor {
            tracing::warn!(
                recipient,
                processed = *cursor,
                present = entries.len(),
                "inbox shrank under the scanner; resetting cursor"
            );
            *cursor = entries.len();
            return Ok(Vec::new());
        }

        let fresh = entries.split_off(*cursor);
        *cursor += fresh.len();
        Ok(fresh)
    }
}
