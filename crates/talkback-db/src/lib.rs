//! Database layer for talkback.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and the message-status store used by the upload
//! workflow to record each request's terminal outcome.
//!
//! The hub and correlator keep no state here: only the per-message status
//! (sent/replied/timeout/ignored) is persisted, so clients can poll for a
//! verdict they may have missed on the push channel.

mod messages;
mod migrations;
mod pool;

pub use messages::{
    arm_deadline, attach_reply_audio, expire_overdue, get_message, insert_message, list_messages,
    resolve_message, MessageRecord, MessageStoreError, NewMessage, Resolution,
};
pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
