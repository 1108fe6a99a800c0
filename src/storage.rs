use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared state store reachable by every process instance.
///
/// Every mutation that must stay consistent across instances goes through
/// one of these primitives; callers never read-modify-write a counter.
#[async_trait]
pub trait Store: Send + Sync {
    /// Adds `member` to a set. Returns `true` if it was not present.
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Atomically increments an integer key, returning the new value.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Sets a value that disappears on its own after `ttl`.
    async fn set_expiring(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;
    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<()>;
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;
    /// Atomically adds `by` to an integer hash field, returning the new value.
    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> StoreResult<i64>;

    /// Pushes to the front of a list, then trims it to `cap` entries so the
    /// oldest (tail) entries are evicted.
    async fn list_push_capped(&self, key: &str, value: &str, cap: usize) -> StoreResult<()>;
    /// Whole list, front (newest) first.
    async fn list_range(&self, key: &str) -> StoreResult<Vec<String>>;
    /// Removes one occurrence of `value`.
    async fn list_remove(&self, key: &str, value: &str) -> StoreResult<()>;
}

/// Namespaced key names for everything the dispatch layer persists.
#[derive(Debug, Clone)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    pub fn credentials(&self) -> String {
        self.key("credentials")
    }

    pub fn credential_cursor(&self) -> String {
        self.key("credential_cursor")
    }

    pub fn penalty(&self, fingerprint: &str) -> String {
        self.key(&format!("credential_penalty:{}", fingerprint))
    }

    pub fn targets(&self) -> String {
        self.key("redirects")
    }

    pub fn target_stats(&self, id: &str) -> String {
        self.key(&format!("redirect_stats:{}", id))
    }

    pub fn failed_deliveries(&self, id: &str) -> String {
        self.key(&format!("failed_deliveries:{}", id))
    }

    pub fn audit_log(&self) -> String {
        self.key("logs")
    }
}

struct Expiring {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct State {
    sets: HashMap<String, BTreeSet<String>>,
    values: HashMap<String, Expiring>,
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
}

impl State {
    fn live_value(&mut self, key: &str) -> Option<&mut Expiring> {
        let expired = match self.values.get(key) {
            Some(entry) => entry.expires_at.map_or(false, |at| at <= Instant::now()),
            None => return None,
        };
        if expired {
            self.values.remove(key);
            return None;
        }
        self.values.get_mut(key)
    }
}

/// In-memory store for single-process deployments and tests.
///
/// Expired values are dropped lazily on access.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn parse_int(key: &str, value: &str) -> StoreResult<i64> {
    value.parse::<i64>().map_err(|e| StoreError::corrupt(key, e))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state.sets.entry(key.to_string()).or_default().insert(member.to_string()))
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(set) = state.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.live_value(key) {
            let next = parse_int(key, &entry.value)? + 1;
            entry.value = next.to_string();
            return Ok(next);
        }
        state.values.insert(
            key.to_string(),
            Expiring { value: "1".to_string(), expires_at: None },
        );
        Ok(1)
    }

    async fn set_expiring(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.values.insert(
            key.to_string(),
            Expiring {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut state = self.state.lock().await;
        Ok(state.live_value(key).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.values.remove(key);
        state.sets.remove(key);
        state.hashes.remove(key);
        state.lists.remove(key);
        Ok(())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let state = self.state.lock().await;
        Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(hash) = state.hashes.get_mut(key) {
            hash.remove(field);
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let state = self.state.lock().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> StoreResult<i64> {
        let mut state = self.state.lock().await;
        let hash = state.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(value) => parse_int(key, value)?,
            None => 0,
        };
        let next = current + by;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn list_push_capped(&self, key: &str, value: &str, cap: usize) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let list = state.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        list.truncate(cap.max(1));
        Ok(())
    }

    async fn list_range(&self, key: &str) -> StoreResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_remove(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(list) = state.lists.get_mut(key) {
            if let Some(index) = list.iter().position(|v| v == value) {
                list.remove(index);
            }
        }
        Ok(())
    }
}
