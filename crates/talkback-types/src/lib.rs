//! Shared types for the talkback workspace.
//!
//! This crate provides the foundational types used across all talkback
//! crates: the message lifecycle status, the direction tags used in
//! envelope framing, and the payloads pushed to browser sessions.
//!
//! No crate in the workspace depends on anything *except* `talkback-types`
//! for cross-cutting type definitions, which keeps the dependency graph
//! free of cycles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Numeric identity of an authenticated user.
pub type UserId = u64;

/// Push event tag for a delivered operator reply.
pub const EVENT_REPLY: &str = "reply";

/// Push event tag for a lifecycle status change (e.g. timeout).
pub const EVENT_STATUS: &str = "status";

/// Error returned when a tag string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownTag {
    /// What kind of tag was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Which way an envelope travels relative to this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Request leaving the system towards the remote operator.
    From,
    /// Reply arriving from the remote operator.
    To,
}

impl Direction {
    /// Returns the wire tag for this direction.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::From => "from",
            Self::To => "to",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "from" => Ok(Self::From),
            "to" => Ok(Self::To),
            other => Err(UnknownTag {
                kind: "direction",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a submitted message.
///
/// A message starts as [`MessageStatus::Sent`] and moves forward exactly
/// once into one of the terminal states. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Request pushed to the operator; awaiting a verdict.
    Sent,
    /// A matching reply arrived.
    Replied,
    /// The deadline elapsed without a matching reply.
    Timeout,
    /// The wait was abandoned without a verdict.
    Ignored,
}

impl MessageStatus {
    /// Returns the persisted string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Replied => "replied",
            Self::Timeout => "timeout",
            Self::Ignored => "ignored",
        }
    }

    /// Whether this status is final.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Sent)
    }

    /// Whether a message in `self` may move to `next`.
    ///
    /// Only `Sent` may transition, and only to a terminal state.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        self == Self::Sent && next.is_terminal()
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "replied" => Ok(Self::Replied),
            "timeout" => Ok(Self::Timeout),
            "ignored" => Ok(Self::Ignored),
            other => Err(UnknownTag {
                kind: "message status",
                value: other.to_string(),
            }),
        }
    }
}

/// Data pushed with a [`EVENT_REPLY`] event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub message_id: String,
    pub reply: String,
    /// URL of the synthesized audio, when synthesis succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_audio: Option<String>,
}

/// Data pushed with a [`EVENT_STATUS`] event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub message_id: String,
    pub status: MessageStatus,
}
