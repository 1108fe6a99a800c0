use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::error::{RegistryError, StoreError};
use crate::queue::FailedDeliveryQueue;
use crate::storage::{Keyspace, Store};
use crate::types::{now_secs, LastError, RedirectTarget, StoredTarget, TargetId, TargetStatus};

const SUCCESS_COUNT: &str = "success_count";
const ERROR_COUNT: &str = "error_count";
const LAST_SUCCESS: &str = "last_success";
const LAST_ERROR: &str = "last_error";

/// Statuses a redirect target may answer with for a delivery to count.
pub(crate) fn is_accepted_status(status: u16) -> bool {
    matches!(status, 200 | 201 | 202)
}

/// Configured forwarding destinations.
///
/// Target configuration lives in one store hash keyed by id; each target's
/// counters live in their own hash and are only ever bumped atomically.
#[derive(Clone)]
pub struct RedirectRegistry {
    store: Arc<dyn Store>,
    keys: Keyspace,
    queue: FailedDeliveryQueue,
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl RedirectRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        keys: Keyspace,
        queue: FailedDeliveryQueue,
        client: reqwest::Client,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            queue,
            client,
            probe_timeout,
        }
    }

    pub fn from_config(store: Arc<dyn Store>, client: reqwest::Client, config: &DispatchConfig) -> Self {
        let keys = Keyspace::new(config.key_prefix.clone());
        let queue = FailedDeliveryQueue::new(store.clone(), keys.clone(), config.failed_queue_capacity);
        Self::new(store, keys, queue, client, config.probe_timeout)
    }

    pub fn queue(&self) -> &FailedDeliveryQueue {
        &self.queue
    }

    /// Probes `url` and, if it answers, registers it as a new target.
    pub async fn register(&self, url: &str, description: &str) -> Result<TargetId, RegistryError> {
        self.register_target(url, description, None).await
    }

    /// Like [`register`](Self::register); deliveries to the target are
    /// signed with `secret`.
    pub async fn register_signed(
        &self,
        url: &str,
        description: &str,
        secret: &[u8],
    ) -> Result<TargetId, RegistryError> {
        self.register_target(url, description, Some(secret)).await
    }

    async fn register_target(
        &self,
        url: &str,
        description: &str,
        secret: Option<&[u8]>,
    ) -> Result<TargetId, RegistryError> {
        let url = validate_url(url)?;
        self.probe(&url).await?;
        let id = self.store_target(&url, description, secret).await?;
        info!(target_id = %id, url = %url, "redirect target registered");
        Ok(id)
    }

    /// Writes a new target record without probing its URL.
    pub(crate) async fn store_target(
        &self,
        url: &str,
        description: &str,
        secret: Option<&[u8]>,
    ) -> Result<TargetId, StoreError> {
        let id = TargetId::generate();
        let stored = StoredTarget::V1 {
            id: id.clone(),
            url: url.to_string(),
            description: description.trim().to_string(),
            created_at_secs: now_secs(),
            status: TargetStatus::Active,
            secret_hex: secret.map(hex::encode),
        };
        let encoded = serde_json::to_string(&stored)
            .map_err(|e| StoreError::corrupt(self.keys.targets(), e))?;
        self.store
            .hash_set(&self.keys.targets(), id.as_str(), &encoded)
            .await?;
        Ok(id)
    }

    /// Removes a target together with its failed-delivery queue and
    /// counters. Unknown ids are a no-op.
    pub async fn deregister(&self, id: &TargetId) -> Result<(), StoreError> {
        self.store.hash_delete(&self.keys.targets(), id.as_str()).await?;
        self.purge_state(id).await?;
        info!(target_id = %id, "redirect target removed");
        Ok(())
    }

    pub(crate) async fn contains(&self, id: &TargetId) -> Result<bool, StoreError> {
        Ok(self
            .store
            .hash_get(&self.keys.targets(), id.as_str())
            .await?
            .is_some())
    }

    /// Drops the counters and failed-delivery queue kept for `id`.
    pub(crate) async fn purge_state(&self, id: &TargetId) -> Result<(), StoreError> {
        self.store.delete(&self.keys.target_stats(id.as_str())).await?;
        self.queue.purge(id).await
    }

    /// Every target with its current counters, oldest first.
    pub async fn list_targets(&self) -> Result<Vec<RedirectTarget>, StoreError> {
        let raw = self.store.hash_get_all(&self.keys.targets()).await?;
        let mut targets = Vec::with_capacity(raw.len());
        for line in raw.values() {
            let target = self.decode(line)?;
            targets.push(self.with_stats(target).await?);
        }
        targets.sort_by(|a, b| {
            a.created_at_secs
                .cmp(&b.created_at_secs)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(targets)
    }

    pub async fn get_target(&self, id: &TargetId) -> Result<Option<RedirectTarget>, StoreError> {
        match self.store.hash_get(&self.keys.targets(), id.as_str()).await? {
            Some(line) => {
                let target = self.decode(&line)?;
                Ok(Some(self.with_stats(target).await?))
            }
            None => Ok(None),
        }
    }

    pub(crate) async fn record_success(&self, id: &TargetId) -> Result<(), StoreError> {
        let key = self.keys.target_stats(id.as_str());
        self.store.hash_incr(&key, SUCCESS_COUNT, 1).await?;
        self.store
            .hash_set(&key, LAST_SUCCESS, &now_secs().to_string())
            .await
    }

    pub(crate) async fn record_failure(&self, id: &TargetId, message: &str) -> Result<(), StoreError> {
        let key = self.keys.target_stats(id.as_str());
        self.store.hash_incr(&key, ERROR_COUNT, 1).await?;
        let last_error = LastError {
            message: message.to_string(),
            at_secs: now_secs(),
        };
        let encoded = serde_json::to_string(&last_error).map_err(|e| StoreError::corrupt(&key, e))?;
        self.store.hash_set(&key, LAST_ERROR, &encoded).await
    }

    async fn probe(&self, url: &str) -> Result<(), RegistryError> {
        let body = serde_json::json!({
            "event": "redirect.test",
            "message": "connection test",
            "timestamp": now_secs(),
        });

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Redirect-Test", "true")
            .body(body.to_string())
            .timeout(self.probe_timeout)
            .send()
            .await;

        match response {
            Ok(resp) if is_accepted_status(resp.status().as_u16()) => Ok(()),
            Ok(resp) => {
                let status = resp.status().as_u16();
                warn!(url = %url, status, "redirect probe rejected");
                Err(RegistryError::UnreachableTarget(format!(
                    "{} answered status {}",
                    url, status
                )))
            }
            Err(err) if err.is_timeout() => {
                warn!(url = %url, "redirect probe timed out");
                Err(RegistryError::UnreachableTarget(format!(
                    "{} timed out after {:?}",
                    url, self.probe_timeout
                )))
            }
            Err(err) => {
                warn!(url = %url, error = %err, "redirect probe failed");
                Err(RegistryError::UnreachableTarget(format!("{}: {}", url, err)))
            }
        }
    }

    fn decode(&self, line: &str) -> Result<RedirectTarget, StoreError> {
        let key = self.keys.targets();
        let stored: StoredTarget = serde_json::from_str(line).map_err(|e| StoreError::corrupt(&key, e))?;
        match stored {
            StoredTarget::V1 {
                id,
                url,
                description,
                created_at_secs,
                status,
                secret_hex,
            } => {
                let secret = match secret_hex {
                    Some(hex_secret) => Some(hex::decode(hex_secret).map_err(|e| StoreError::corrupt(&key, e))?),
                    None => None,
                };
                Ok(RedirectTarget {
                    id,
                    url,
                    description,
                    created_at_secs,
                    status,
                    secret,
                    success_count: 0,
                    error_count: 0,
                    last_success_secs: None,
                    last_error: None,
                })
            }
        }
    }

    async fn with_stats(&self, mut target: RedirectTarget) -> Result<RedirectTarget, StoreError> {
        let key = self.keys.target_stats(target.id.as_str());
        let stats = self.store.hash_get_all(&key).await?;
        target.success_count = counter(&stats, SUCCESS_COUNT);
        target.error_count = counter(&stats, ERROR_COUNT);
        target.last_success_secs = stats.get(LAST_SUCCESS).and_then(|v| v.parse().ok());
        target.last_error = match stats.get(LAST_ERROR) {
            Some(line) => Some(serde_json::from_str(line).map_err(|e| StoreError::corrupt(&key, e))?),
            None => None,
        };
        Ok(target)
    }
}

fn counter(stats: &HashMap<String, String>, field: &str) -> u64 {
    stats.get(field).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn validate_url(url: &str) -> Result<String, RegistryError> {
    let trimmed = url.trim();
    let invalid = |reason: &str| RegistryError::Validation {
        url: trimmed.to_string(),
        reason: reason.to_string(),
    };
    let parsed = reqwest::Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(trimmed.to_string())
}
