use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DispatchConfig;
use crate::error::StoreError;
use crate::storage::{Keyspace, Store};
use crate::types::now_secs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
}

/// One operator-visible log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp_secs: u64,
    pub level: AuditLevel,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Store-backed audit log, newest first, capped by count and by age.
///
/// Metadata must never carry raw credentials; callers pass masked values.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn Store>,
    key: String,
    capacity: usize,
    retention: Option<Duration>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn Store>, keys: &Keyspace, capacity: usize) -> Self {
        Self {
            store,
            key: keys.audit_log(),
            capacity: capacity.max(1),
            retention: None,
        }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &DispatchConfig) -> Self {
        Self::new(store, &Keyspace::new(config.key_prefix.clone()), config.audit_log_capacity)
            .with_retention(config.audit_log_retention)
    }

    /// Entries older than `retention` are hidden from [`recent`](Self::recent)
    /// and removed by [`prune_expired`](Self::prune_expired).
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub async fn record(
        &self,
        level: AuditLevel,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<(), StoreError> {
        let entry = AuditEntry {
            timestamp_secs: now_secs(),
            level,
            message: message.into(),
            metadata,
        };
        let encoded = serde_json::to_string(&entry).map_err(|e| StoreError::corrupt(&self.key, e))?;
        self.store
            .list_push_capped(&self.key, &encoded, self.capacity)
            .await
    }

    /// Up to `limit` most recent live entries. Undecodable lines are skipped.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let lines = self.store.list_range(&self.key).await?;
        let cutoff = self.cutoff_secs();
        Ok(lines
            .iter()
            .filter_map(|line| serde_json::from_str::<AuditEntry>(line).ok())
            .filter(|entry| entry.timestamp_secs >= cutoff)
            .take(limit)
            .collect())
    }

    /// Removes entries past the retention window, oldest first, and returns
    /// how many were dropped. Without a retention window nothing expires.
    pub async fn prune_expired(&self) -> Result<usize, StoreError> {
        if self.retention.is_none() {
            return Ok(0);
        }
        let cutoff = self.cutoff_secs();
        let lines = self.store.list_range(&self.key).await?;

        let mut removed = 0;
        for line in lines.iter().rev() {
            let Ok(entry) = serde_json::from_str::<AuditEntry>(line) else {
                continue;
            };
            if entry.timestamp_secs >= cutoff {
                break;
            }
            self.store.list_remove(&self.key, line).await?;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, "expired audit entries pruned");
        }
        Ok(removed)
    }

    fn cutoff_secs(&self) -> u64 {
        self.retention
            .map_or(0, |retention| now_secs().saturating_sub(retention.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn keeps_newest_entries_up_to_capacity() {
        let log = AuditLog::new(Arc::new(InMemoryStore::new()), &Keyspace::new("t"), 2);
        for i in 0..3 {
            log.record(AuditLevel::Info, format!("entry {}", i), json!({ "i": i }))
                .await
                .unwrap();
        }
        let entries = log.recent(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "entry 2");
        assert_eq!(entries[1].metadata["i"], 1);
    }

    async fn push_raw(store: &Arc<dyn Store>, keys: &Keyspace, age_secs: u64, message: &str) {
        let entry = AuditEntry {
            timestamp_secs: now_secs() - age_secs,
            level: AuditLevel::Info,
            message: message.to_string(),
            metadata: serde_json::Value::Null,
        };
        store
            .list_push_capped(&keys.audit_log(), &serde_json::to_string(&entry).unwrap(), 100)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn old_entries_expire() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let keys = Keyspace::new("t");
        push_raw(&store, &keys, 72 * 3600, "three days old").await;
        push_raw(&store, &keys, 49 * 3600, "two days old").await;
        push_raw(&store, &keys, 60, "fresh").await;

        let log = AuditLog::new(store.clone(), &keys, 100).with_retention(Duration::from_secs(48 * 3600));
        let visible = log.recent(10).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].message, "fresh");

        assert_eq!(log.prune_expired().await.unwrap(), 2);
        assert_eq!(store.list_range(&keys.audit_log()).await.unwrap().len(), 1);
        assert_eq!(log.prune_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn without_retention_nothing_expires() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let keys = Keyspace::new("t");
        push_raw(&store, &keys, 365 * 24 * 3600, "ancient").await;

        let log = AuditLog::new(store, &keys, 100);
        assert_eq!(log.recent(10).await.unwrap().len(), 1);
        assert_eq!(log.prune_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn from_config_uses_prefix_capacity_and_retention() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let config = DispatchConfig {
            key_prefix: "ops".to_string(),
            audit_log_capacity: 2,
            audit_log_retention: Duration::from_secs(3600),
            ..Default::default()
        };
        let keys = Keyspace::new("ops");
        push_raw(&store, &keys, 2 * 3600, "stale").await;

        let log = AuditLog::from_config(store.clone(), &config);
        for i in 0..3 {
            log.record(AuditLevel::Warning, format!("entry {}", i), json!({})).await.unwrap();
        }

        assert_eq!(store.list_range(&keys.audit_log()).await.unwrap().len(), 2);
        let entries = log.recent(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "entry 2");
    }
}
