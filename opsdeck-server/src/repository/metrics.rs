//! Metrics store
//!
//! Key-value list storage behind the metrics ring buffer. Values are opaque
//! strings (JSON-encoded samples); the ring buffer owns their format.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use crate::repository::StoreResult;

/// List store with an atomic push-and-trim
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Appends `value` to the list at `key`, then keeps only its last
    /// `max_len` entries. Both steps apply as one unit, so readers never see
    /// the list longer than `max_len`.
    async fn push_capped(&self, key: &str, value: String, max_len: usize) -> StoreResult<()>;

    /// Every entry of the list at `key`, oldest first
    async fn range(&self, key: &str) -> StoreResult<Vec<String>>;
}

/// Redis lists, written with a `MULTI` pipeline of `RPUSH` + `LTRIM`
#[derive(Clone)]
pub struct RedisMetricsStore {
    conn: ConnectionManager,
}

impl RedisMetricsStore {
    /// Connects and verifies the server is reachable
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;

        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl MetricsStore for RedisMetricsStore {
    async fn push_capped(&self, key: &str, value: String, max_len: usize) -> StoreResult<()> {
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .rpush(key, value)
            .ignore()
            .ltrim(key, -(max_len as isize), -1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn range(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn.lrange(key, 0, -1).await?;
        Ok(entries)
    }
}

/// Process-local lists, used when no Redis URL is configured
#[derive(Default)]
pub struct InMemoryMetricsStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn push_capped(&self, key: &str, value: String, max_len: usize) -> StoreResult<()> {
        let mut lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
        let list = lists.entry(key.to_string()).or_default();

        list.push_back(value);
        while list.len() > max_len {
            list.pop_front();
        }

        Ok(())
    }

    async fn range(&self, key: &str) -> StoreResult<Vec<String>> {
        let lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }
}
