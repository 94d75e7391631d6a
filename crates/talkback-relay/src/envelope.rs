//! Text framing for messages exchanged with the remote operator.
//!
//! Correlated form: `"<direction>-<channel>:<userID>:<msgID> <body>"`.
//! Legacy form: `"<direction>-<channel> <body>"`, with no identity; it is
//! only meaningful when a single reply is outstanding per recipient.
//!
//! Decoding never panics. Every defect is reported as an [`EnvelopeError`]
//! so the caller can log and drop the entry.

use talkback_types::{Direction, UserId};
use thiserror::Error;

/// Why a piece of text is not a valid envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("envelope has no body")]
    MissingBody,

    #[error("envelope header has {found} ':'-separated parts, expected {expected}")]
    HeaderArity { found: usize, expected: usize },

    #[error("envelope header has an empty segment")]
    EmptySegment,

    #[error("envelope tag {0:?} is not <direction>-<channel>")]
    MalformedTag(String),

    #[error("envelope direction {found:?} does not match expected {expected:?}")]
    DirectionMismatch { expected: Direction, found: String },

    #[error("envelope channel {found:?} does not match expected {expected:?}")]
    ChannelMismatch { expected: String, found: String },

    #[error("envelope user id {0:?} is not a non-negative integer")]
    InvalidUserId(String),
}

/// A correlated envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub direction: Direction,
    pub channel: String,
    pub user_id: UserId,
    pub msg_id: String,
    pub body: String,
}

impl Envelope {
    /// Renders the envelope in its wire form.
    pub fn encode(&self) -> String {
        encode(
            self.direction,
            &self.channel,
            self.user_id,
            &self.msg_id,
            &self.body,
        )
    }

    /// Whether this envelope answers the request `(user_id, msg_id)`.
    pub fn matches(&self, user_id: UserId, msg_id: &str) -> bool {
        self.user_id == user_id && self.msg_id == msg_id
    }
}

/// An id-less envelope in the legacy framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyEnvelope {
    pub direction: Direction,
    pub channel: String,
    pub body: String,
}

/// Encodes a correlated envelope.
///
/// `channel` must not contain `:` or whitespace and `msg_id` must not
/// contain `:` or whitespace, otherwise the result will not decode back to
/// the same values.
pub fn encode(
    direction: Direction,
    channel: &str,
    user_id: UserId,
    msg_id: &str,
    body: &str,
) -> String {
    format!("{}-{}:{}:{} {}", direction, channel, user_id, msg_id, body)
}

/// Encodes a legacy envelope.
pub fn encode_legacy(direction: Direction, channel: &str, body: &str) -> String {
    format!("{}-{} {}", direction, channel, body)
}

/// Decodes a correlated envelope, requiring the given direction and channel.
pub fn decode(
    text: &str,
    direction: Direction,
    channel: &str,
) -> Result<Envelope, EnvelopeError> {
    let (header, body) = split_body(text)?;

    let parts: Vec<&str> = header.split(':').collect();
    if parts.len() != 3 {
        return Err(EnvelopeError::HeaderArity {
            found: parts.len(),
            expected: 3,
        });
    }
    if parts.iter().any(|part| part.is_empty()) {
        return Err(EnvelopeError::EmptySegment);
    }

    check_tag(parts[0], direction, channel)?;

    let user_id = parts[1]
        .parse::<UserId>()
        .map_err(|_| EnvelopeError::InvalidUserId(parts[1].to_string()))?;

    Ok(Envelope {
        direction,
        channel: channel.to_string(),
        user_id,
        msg_id: parts[2].to_string(),
        body: body.to_string(),
    })
}

/// Decodes a legacy envelope, requiring the given direction and channel.
pub fn decode_legacy(
    text: &str,
    direction: Direction,
    channel: &str,
) -> Result<LegacyEnvelope, EnvelopeError> {
    let (header, body) = split_body(text)?;

    if header.contains(':') {
        return Err(EnvelopeError::HeaderArity {
            found: header.split(':').count(),
            expected: 1,
        });
    }
    check_tag(header, direction, channel)?;

    Ok(LegacyEnvelope {
        direction,
        channel: channel.to_string(),
        body: body.to_string(),
    })
}

fn split_body(text: &str) -> Result<(&str, &str), EnvelopeError> {
    text.split_once(' ').ok_or(EnvelopeError::MissingBody)
}

fn check_tag(tag: &str, direction: Direction, channel: &str) -> Result<(), EnvelopeError> {
    let (found_direction, found_channel) = tag
        .split_once('-')
        .filter(|(d, c)| !d.is_empty() && !c.is_empty())
        .ok_or_else(|| EnvelopeError::MalformedTag(tag.to_string()))?;

    if found_direction != direction.as_str() {
        return Err(EnvelopeError::DirectionMismatch {
            expected: direction,
            found: found_direction.to_string(),
        });
    }
    if found_channel != channel {
        return Err(EnvelopeError::ChannelMismatch {
            expected: channel.to_string(),
            found: found_channel.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_correlated_form() {
        assert_eq!(
            encode(Direction::From, "web", 7, "abc123", "hello there"),
            "from-web:7:abc123 hello there"
        );
    }

    #[test]
    fn decodes_reply() {
        let env = decode("to-web:7:abc123 world", Direction::To, "web").unwrap();
        assert_eq!(env.user_id, 7);
        assert_eq!(env.msg_id, "abc123");
        assert_eq!(env.body, "world");
        assert!(env.matches(7, "abc123"));
        assert!(!env.matches(9, "abc123"));
        assert!(!env.matches(7, "other"));
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let cases = [
            (Direction::From, "web", 0, "m", "x"),
            (Direction::To, "web", 42, "0f3a9c", "multi word body: with colons"),
            (Direction::To, "voice-app", u64::MAX, "id-1", "trailing space "),
            (Direction::From, "web", 5, "abc", ""),
        ];
        for (direction, channel, user_id, msg_id, body) in cases {
            let text = encode(direction, channel, user_id, msg_id, body);
            let env = decode(&text, direction, channel).unwrap();
            assert_eq!(
                (env.direction, env.channel.as_str(), env.user_id, env.msg_id.as_str(), env.body.as_str()),
                (direction, channel, user_id, msg_id, body),
                "round trip of {text:?}"
            );
            assert_eq!(env.encode(), text);
        }
    }

    #[test]
    fn text_without_header_is_malformed() {
        assert_eq!(
            decode("hello world", Direction::To, "web"),
            Err(EnvelopeError::HeaderArity { found: 1, expected: 3 })
        );
    }

    #[test]
    fn single_id_segment_is_malformed() {
        assert_eq!(
            decode("to-x:1 body", Direction::To, "x"),
            Err(EnvelopeError::HeaderArity { found: 2, expected: 3 })
        );
    }

    #[test]
    fn non_numeric_user_id_is_malformed() {
        assert_eq!(
            decode("to-web:alice:abc body", Direction::To, "web"),
            Err(EnvelopeError::InvalidUserId("alice".to_string()))
        );
        assert_eq!(
            decode("to-web:-3:abc body", Direction::To, "web"),
            Err(EnvelopeError::InvalidUserId("-3".to_string()))
        );
    }

    #[test]
    fn missing_body_is_malformed() {
        assert_eq!(
            decode("to-web:7:abc", Direction::To, "web"),
            Err(EnvelopeError::MissingBody)
        );
    }

    #[test]
    fn empty_segments_are_malformed() {
        assert_eq!(
            decode("to-web::abc body", Direction::To, "web"),
            Err(EnvelopeError::EmptySegment)
        );
        assert_eq!(
            decode("to-web:7: body", Direction::To, "web"),
            Err(EnvelopeError::EmptySegment)
        );
    }

    #[test]
    fn wrong_direction_or_channel_is_rejected() {
        assert!(matches!(
            decode("from-web:7:abc body", Direction::To, "web"),
            Err(EnvelopeError::DirectionMismatch { .. })
        ));
        assert!(matches!(
            decode("to-sms:7:abc body", Direction::To, "web"),
            Err(EnvelopeError::ChannelMismatch { .. })
        ));
        assert!(matches!(
            decode("toweb:7:abc body", Direction::To, "web"),
            Err(EnvelopeError::MalformedTag(_))
        ));
    }

    #[test]
    fn legacy_round_trip() {
        let text = encode_legacy(Direction::To, "web", "hi there");
        assert_eq!(text, "to-web hi there");
        let env = decode_legacy(&text, Direction::To, "web").unwrap();
        assert_eq!(env.body, "hi there");
    }

    #[test]
    fn legacy_rejects_ids_and_bad_tags() {
        assert!(matches!(
            decode_legacy("to-web:7:abc hi", Direction::To, "web"),
            Err(EnvelopeError::HeaderArity { found: 3, expected: 1 })
        ));
        assert_eq!(
            decode_legacy("to-web", Direction::To, "web"),
            Err(EnvelopeError::MissingBody)
        );
        assert!(matches!(
            decode_legacy("from-web hi", Direction::To, "web"),
            Err(EnvelopeError::DirectionMismatch { .. })
        ));
    }
}
