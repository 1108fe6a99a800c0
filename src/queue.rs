use std::sync::Arc;

use crate::error::StoreError;
use crate::storage::{Keyspace, Store};
use crate::types::{now_secs, FailedDelivery, StoredFailedDelivery, TargetId};

/// Bounded per-target log of undelivered payloads, newest first.
///
/// Records are stored as versioned JSON; removal matches the exact stored
/// line, so two identical failures are removed one at a time.
#[derive(Clone)]
pub struct FailedDeliveryQueue {
    store: Arc<dyn Store>,
    keys: Keyspace,
    capacity: usize,
}

impl FailedDeliveryQueue {
    pub fn new(store: Arc<dyn Store>, keys: Keyspace, capacity: usize) -> Self {
        Self {
            store,
            keys,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records a failed payload. Once the queue holds `capacity` records
    /// the oldest one is evicted.
    pub async fn push(&self, target_id: &TargetId, payload: &[u8], retries: u32) -> Result<FailedDelivery, StoreError> {
        let record = FailedDelivery {
            enqueued_at_secs: now_secs(),
            payload: payload.to_vec(),
            retries,
        };
        let key = self.keys.failed_deliveries(target_id.as_str());
        let line = encode(&key, &record)?;
        self.store.list_push_capped(&key, &line, self.capacity).await?;
        Ok(record)
    }

    /// Every record, newest first.
    pub async fn list(&self, target_id: &TargetId) -> Result<Vec<FailedDelivery>, StoreError> {
        let key = self.keys.failed_deliveries(target_id.as_str());
        self.store
            .list_range(&key)
            .await?
            .iter()
            .map(|line| decode(&key, line))
            .collect()
    }

    pub async fn len(&self, target_id: &TargetId) -> Result<usize, StoreError> {
        let key = self.keys.failed_deliveries(target_id.as_str());
        Ok(self.store.list_range(&key).await?.len())
    }

    pub async fn remove(&self, target_id: &TargetId, record: &FailedDelivery) -> Result<(), StoreError> {
        let key = self.keys.failed_deliveries(target_id.as_str());
        let line = encode(&key, record)?;
        self.store.list_remove(&key, &line).await
    }

    pub async fn purge(&self, target_id: &TargetId) -> Result<(), StoreError> {
        self.store
            .delete(&self.keys.failed_deliveries(target_id.as_str()))
            .await
    }
}

fn encode(key: &str, record: &FailedDelivery) -> Result<String, StoreError> {
    serde_json::to_string(&StoredFailedDelivery::from(record)).map_err(|e| StoreError::corrupt(key, e))
}

fn decode(key: &str, line: &str) -> Result<FailedDelivery, StoreError> {
    serde_json::from_str::<StoredFailedDelivery>(line)
        .map(FailedDelivery::from)
        .map_err(|e| StoreError::corrupt(key, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    fn queue(capacity: usize) -> FailedDeliveryQueue {
        FailedDeliveryQueue::new(Arc::new(InMemoryStore::new()), Keyspace::new("t"), capacity)
    }

    #[tokio::test]
    async fn newest_first_and_bounded() {
        let queue = queue(100);
        let id = TargetId::from("a");
        for i in 0..101u32 {
            queue.push(&id, i.to_string().as_bytes(), 0).await.unwrap();
        }
        let records = queue.list(&id).await.unwrap();
        assert_eq!(records.len(), 100);
        assert_eq!(records[0].payload, b"100".to_vec());
        assert_eq!(records[99].payload, b"1".to_vec(), "payload 0 was evicted");
    }

    #[tokio::test]
    async fn remove_takes_one_record() {
        let queue = queue(10);
        let id = TargetId::from("a");
        let first = queue.push(&id, b"{\"x\":1}", 0).await.unwrap();
        queue.push(&id, b"{\"x\":2}", 0).await.unwrap();
        queue.remove(&id, &first).await.unwrap();
        let left = queue.list(&id).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].payload, b"{\"x\":2}".to_vec());
    }

    #[tokio::test]
    async fn queues_are_per_target() {
        let queue = queue(10);
        queue.push(&TargetId::from("a"), b"1", 0).await.unwrap();
        queue.push(&TargetId::from("b"), b"2", 0).await.unwrap();
        queue.purge(&TargetId::from("a")).await.unwrap();
        assert_eq!(queue.len(&TargetId::from("a")).await.unwrap(), 0);
        assert_eq!(queue.len(&TargetId::from("b")).await.unwrap(), 1);
    }
}
