//! Relay endpoints and timing policy.

use serde::Deserialize;
use std::time::Duration;

/// How replies reach browser sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// One pop-based waiter per outstanding request.
    #[default]
    Waiter,
    /// A single background scanner reading the inbox non-destructively.
    Listener,
}

/// Which envelope framing the operator side speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeFormat {
    /// `<direction>-<channel>:<userID>:<msgID> <body>`
    #[default]
    Correlated,
    /// `<direction>-<channel> <body>`; one global pending slot per recipient.
    Legacy,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_channel() -> String {
    "web".to_string()
}

fn default_outbound_queue() -> String {
    "message_queue".to_string()
}

fn default_inbox_prefix() -> String {
    "inbox:".to_string()
}

fn default_recipient() -> String {
    "AlbertVoiceBot".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_reply_timeout_secs() -> u64 {
    60
}

fn default_listener_interval_ms() -> u64 {
    1_000
}

fn default_listener_backoff_ms() -> u64 {
    1_000
}

/// Relay configuration (`[relay]` table).
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Channel tag used in envelopes (`from-<channel>` / `to-<channel>`).
    #[serde(default = "default_channel")]
    pub channel: String,

    /// List that outbound requests are pushed onto.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: String,

    #[serde(default = "default_inbox_prefix")]
    pub inbox_prefix: String,

    /// Bot identity: addressee of requests and owner of the reply inbox.
    #[serde(default = "default_recipient")]
    pub recipient: String,

    /// Sleep between empty inbox polls in waiter mode.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deadline for a reply, measured from submission.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,

    /// Sleep between scans when the listener finds nothing new.
    #[serde(default = "default_listener_interval_ms")]
    pub listener_interval_ms: u64,

    /// Sleep after a failed scan before retrying.
    #[serde(default = "default_listener_backoff_ms")]
    pub listener_backoff_ms: u64,

    #[serde(default)]
    pub delivery: DeliveryMode,

    #[serde(default)]
    pub envelope: EnvelopeFormat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            channel: default_channel(),
            outbound_queue: default_outbound_queue(),
            inbox_prefix: default_inbox_prefix(),
            recipient: default_recipient(),
            poll_interval_ms: default_poll_interval_ms(),
            reply_timeout_secs: default_reply_timeout_secs(),
            listener_interval_ms: default_listener_interval_ms(),
            listener_backoff_ms: default_listener_backoff_ms(),
            delivery: DeliveryMode::default(),
            envelope: EnvelopeFormat::default(),
        }
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    pub fn listener_interval(&self) -> Duration {
        Duration::from_millis(self.listener_interval_ms)
    }

    pub fn listener_backoff(&self) -> Duration {
        Duration::from_millis(self.listener_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_uses_defaults() {
        let config: RelayConfig = toml::from_str("").unwrap();
        assert_eq!(config.channel, "web");
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.reply_timeout(), Duration::from_secs(60));
        assert_eq!(config.delivery, DeliveryMode::Waiter);
        assert_eq!(config.envelope, EnvelopeFormat::Correlated);
    }

    #[test]
    fn modes_parse_lowercase() {
        let config: RelayConfig = toml::from_str(
            r#"
            delivery = "listener"
            envelope = "legacy"
            reply_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.delivery, DeliveryMode::Listener);
        assert_eq!(config.envelope, EnvelopeFormat::Legacy);
        assert_eq!(config.reply_timeout(), Duration::from_secs(5));
    }
}
