//! Backends for the external per-recipient list store.
//!
//! Every backend is push-to-front: [`QueueStore::peek_front`] and
//! [`QueueStore::pop_front`] observe the most recently pushed entry first,
//! and [`QueueStore::range_all`] lists entries front to back (newest first).
//! `pop_front` must be atomic: two callers never remove the same entry.

use crate::error::RelayError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A keyed list store with push-front / peek-front / pop-front semantics.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn push_front(&self, key: &str, value: &str) -> Result<(), RelayError>;

    async fn peek_front(&self, key: &str) -> Result<Option<String>, RelayError>;

    async fn pop_front(&self, key: &str) -> Result<Option<String>, RelayError>;

    /// Non-destructive read of the whole list, front to back.
    async fn range_all(&self, key: &str) -> Result<Vec<String>, RelayError>;
}

/// Redis lists: `LPUSH`, `LINDEX 0`, `LPOP`, `LRANGE 0 -1`.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects to the Redis server at `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// The connection manager reconnects on its own after transient
    /// failures; individual commands issued while the server is down fail
    /// with [`RelayError::StoreUnavailable`].
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push_front(&self, key: &str, value: &str) -> Result<(), RelayError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn peek_front(&self, key: &str) -> Result<Option<String>, RelayError> {
        let mut conn = self.conn.clone();
        Ok(conn.lindex(key, 0).await?)
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, RelayError> {
        let mut conn = self.conn.clone();
        Ok(conn.lpop(key, None).await?)
    }

    async fn range_all(&self, key: &str) -> Result<Vec<String>, RelayError> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, 0, -1).await?)
    }
}

type Lists = HashMap<String, VecDeque<String>>;

/// In-process store with the same ordering contract as [`RedisStore`].
///
/// Clones share the same lists. An outage can be simulated with
/// [`MemoryStore::set_unavailable`], after which every operation fails with
/// [`RelayError::StoreUnavailable`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    lists: Arc<Mutex<Lists>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of entries currently stored under `key`.
    pub fn len(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    fn lock(&self) -> MutexGuard<'_, Lists> {
        match self.lists.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("memory store lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn check(&self) -> Result<(), RelayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RelayError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn push_front(&self, key: &str, value: &str) -> Result<(), RelayError> {
        self.check()?;
        self.lock()
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn peek_front(&self, key: &str) -> Result<Option<String>, RelayError> {
        self.check()?;
        Ok(self.lock().get(key).and_then(|list| list.front().cloned()))
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, RelayError> {
        self.check()?;
        let mut lists = self.lock();
        let popped = lists.get_mut(key).and_then(VecDeque::pop_front);
        if lists.get(key).is_some_and(VecDeque::is_empty) {
            lists.remove(key);
        }
        Ok(popped)
    }

    async fn range_all(&self, key: &str) -> Result<Vec<String>, RelayError> {
        self.check()?;
        Ok(self
            .lock()
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }
}
