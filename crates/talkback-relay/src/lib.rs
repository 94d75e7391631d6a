//! Store-and-forward relay between talkback and the remote operator.
//!
//! Requests leave as text envelopes pushed onto an external per-recipient
//! list store (Redis in production); replies come back the same way into
//! the bot's inbox. This crate owns the pieces that make that exchange
//! reliable enough to answer one specific browser request:
//!
//! - [`envelope`]: the `"<direction>-<channel>:<userID>:<msgID> <body>"`
//!   framing, plus the legacy id-less variant.
//! - [`store`] / [`relay`]: push, peek-front, pop-front and full-range read
//!   over a [`QueueStore`], with JSON wrapping of stored entries.
//! - [`correlator`]: the pop-based waiter that turns one outstanding request
//!   into exactly one outcome (replied or timed out).
//! - [`scanner`]: the non-destructive, cursor-tracking inbox reader for
//!   listener-style delivery.
//!
//! # Ordering
//!
//! The store is push-to-front. Peek and pop therefore serve the most
//! recently pushed entry first (a stack discipline). This is part of the
//! protocol and is preserved as is.

pub mod config;
pub mod correlator;
pub mod envelope;
pub mod error;
pub mod relay;
pub mod scanner;
pub mod store;

pub use config::{DeliveryMode, EnvelopeFormat, RelayConfig};
pub use correlator::{Correlator, EntryVerdict, IgnoreReason, PendingRequest, ReplyOutcome};
pub use envelope::{Envelope, EnvelopeError, LegacyEnvelope};
pub use error::RelayError;
pub use relay::{InboxMessage, OutboundMessage, QueueRelay};
pub use scanner::InboxScanner;
pub use store::{MemoryStore, QueueStore, RedisStore};
