use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::error::PoolError;
use crate::storage::{Keyspace, Store};
use crate::telemetry::metric_inc;
use crate::types::{now_millis, Credential};

/// Caller-supplied check that a credential still works upstream.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_alive(&self, credential: &Credential) -> bool;
}

/// Probe that accepts every credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAlive;

#[async_trait]
impl LivenessProbe for AlwaysAlive {
    async fn is_alive(&self, _credential: &Credential) -> bool {
        true
    }
}

/// Rotating pool of interchangeable upstream credentials.
///
/// All state lives in the shared store: the token set, a monotonic rotation
/// cursor and one self-expiring penalty key per penalized credential.
#[derive(Clone)]
pub struct CredentialPool {
    store: Arc<dyn Store>,
    keys: Keyspace,
    required_prefix: String,
    default_penalty: Duration,
}

impl CredentialPool {
    pub fn new(
        store: Arc<dyn Store>,
        keys: Keyspace,
        required_prefix: impl Into<String>,
        default_penalty: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            required_prefix: required_prefix.into(),
            default_penalty,
        }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &DispatchConfig) -> Self {
        Self::new(
            store,
            Keyspace::new(config.key_prefix.clone()),
            config.credential_prefix.clone(),
            config.credential_penalty,
        )
    }

    pub fn default_penalty(&self) -> Duration {
        self.default_penalty
    }

    /// Current pool as a sorted snapshot.
    pub async fn list(&self) -> Result<Vec<Credential>, PoolError> {
        let mut tokens = self.store.set_members(&self.keys.credentials()).await?;
        tokens.sort();
        Ok(tokens.into_iter().map(Credential::new).collect())
    }

    /// Masked form of every credential, for operator display.
    pub async fn list_masked(&self) -> Result<Vec<String>, PoolError> {
        Ok(self.list().await?.iter().map(Credential::masked).collect())
    }

    pub async fn len(&self) -> Result<usize, PoolError> {
        Ok(self.store.set_members(&self.keys.credentials()).await?.len())
    }

    /// Adds a credential. Returns `false` if it was already present.
    pub async fn add(&self, token: &str) -> Result<bool, PoolError> {
        let token = token.trim();
        if !token.starts_with(&self.required_prefix) || token.len() == self.required_prefix.len() {
            return Err(PoolError::Validation {
                required_prefix: self.required_prefix.clone(),
            });
        }
        let added = self.store.set_add(&self.keys.credentials(), token).await?;
        debug!(credential = %Credential::new(token).masked(), added, "credential added");
        Ok(added)
    }

    /// Removes a credential and any penalty it carries.
    pub async fn remove(&self, token: &str) -> Result<(), PoolError> {
        let credential = Credential::new(token.trim());
        self.store
            .set_remove(&self.keys.credentials(), credential.expose())
            .await?;
        self.store
            .delete(&self.keys.penalty(&credential.fingerprint()))
            .await?;
        debug!(credential = %credential.masked(), "credential removed");
        Ok(())
    }

    /// Next credential in rotation, penalized or not.
    ///
    /// The cursor is a monotonic counter taken modulo the pool size at the
    /// time of the read, so pool changes never leave it out of range.
    pub async fn next_credential(&self) -> Result<Credential, PoolError> {
        let snapshot = self.list().await?;
        if snapshot.is_empty() {
            return Err(PoolError::NotAvailable);
        }
        let ticket = self.store.incr(&self.keys.credential_cursor()).await?;
        let index = (ticket - 1).rem_euclid(snapshot.len() as i64) as usize;
        Ok(snapshot[index].clone())
    }

    pub async fn is_penalized(&self, credential: &Credential) -> Result<bool, PoolError> {
        Ok(self.penalty_expiry(credential).await?.is_some())
    }

    /// Epoch milliseconds at which the current penalty ends, if any.
    pub async fn penalty_expiry(&self, credential: &Credential) -> Result<Option<u64>, PoolError> {
        let value = self
            .store
            .get(&self.keys.penalty(&credential.fingerprint()))
            .await?;
        Ok(value.map(|v| v.parse::<u64>().unwrap_or(0)))
    }

    /// Takes a credential out of rotation for `duration`. A new penalty
    /// replaces the old one.
    pub async fn penalize(&self, credential: &Credential, duration: Duration) -> Result<(), PoolError> {
        let until = now_millis() + duration.as_millis() as u64;
        self.store
            .set_expiring(
                &self.keys.penalty(&credential.fingerprint()),
                &until.to_string(),
                duration,
            )
            .await?;
        metric_inc("credential.penalized");
        warn!(
            credential = %credential.masked(),
            penalty_secs = duration.as_secs(),
            "credential penalized"
        );
        Ok(())
    }

    /// First credential in rotation order that is neither penalized nor
    /// failing `probe`.
    ///
    /// Makes at most one pass over the pool. Credentials failing the probe
    /// are penalized for the default duration.
    pub async fn get_working_credential<P>(&self, probe: &P) -> Result<Credential, PoolError>
    where
        P: LivenessProbe + ?Sized,
    {
        let size = self.len().await?;
        if size == 0 {
            return Err(PoolError::NotAvailable);
        }

        for _ in 0..size {
            let credential = self.next_credential().await?;

            if self.is_penalized(&credential).await? {
                debug!(credential = %credential.masked(), "skipping penalized credential");
                continue;
            }

            if !probe.is_alive(&credential).await {
                self.penalize(&credential, self.default_penalty).await?;
                continue;
            }

            return Ok(credential);
        }

        metric_inc("credential.exhausted");
        warn!(pool_size = size, "no working credential available");
        Err(PoolError::Exhausted)
    }
}
