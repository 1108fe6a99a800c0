use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::audit::{AuditLevel, AuditLog};
use crate::config::DispatchConfig;
use crate::error::{CallError, PoolError};
use crate::pool::{AlwaysAlive, CredentialPool, LivenessProbe};
use crate::storage::Store;
use crate::telemetry::metric_inc;
use crate::types::Credential;

/// Status and body of an upstream HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

/// The call never produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

pub type CallResult = Result<UpstreamResponse, TransportError>;

/// Verdict of a caller-supplied classifier on one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Transient; retry on the same credential after the backoff.
    Retryable(String),
    /// The credential itself was rejected; rotate and retry.
    RotateCredential(String),
    /// Non-retryable; surface immediately.
    Fatal(String),
}

/// A call that eventually succeeded.
#[derive(Debug, Clone)]
pub struct CallSuccess {
    pub response: UpstreamResponse,
    pub attempts: u32,
    /// Masked form of the credential that succeeded.
    pub credential: String,
}

/// Runs one upstream call against the credential pool with a bounded
/// attempt loop.
///
/// The attempt budget equals the pool size at the start of the call and
/// is shared by retryable and rotation failures.
pub struct CallExecutor {
    pool: CredentialPool,
    client: reqwest::Client,
    probe: Arc<dyn LivenessProbe>,
    audit: Option<AuditLog>,
    retry_backoff: Duration,
}

impl CallExecutor {
    pub fn new(pool: CredentialPool, client: reqwest::Client) -> Self {
        Self {
            pool,
            client,
            probe: Arc::new(AlwaysAlive),
            audit: None,
            retry_backoff: Duration::from_secs(1),
        }
    }

    /// Pool, audit log and retry backoff all taken from `config`.
    pub fn from_config(store: Arc<dyn Store>, client: reqwest::Client, config: &DispatchConfig) -> Self {
        let pool = CredentialPool::from_config(store.clone(), config);
        Self::new(pool, client)
            .with_audit_log(AuditLog::from_config(store, config))
            .with_retry_backoff(config.retry_backoff)
    }

    /// Liveness probe used when rotating to a new credential.
    pub fn with_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Builds, sends and classifies the call until it succeeds, fails
    /// fatally or runs out of attempts.
    pub async fn execute<B, C>(&self, build: B, classify: C) -> Result<CallSuccess, CallError>
    where
        B: Fn(&reqwest::Client, &Credential) -> reqwest::RequestBuilder,
        C: Fn(&CallResult) -> Classification,
    {
        let budget = self.pool.len().await? as u32;
        if budget == 0 {
            error!("no upstream credential configured");
            return Err(CallError::NotAvailable);
        }

        let mut credential = self.first_credential().await?;
        let mut last_error = String::new();

        for attempt in 1..=budget {
            debug!(attempt, credential = %credential.masked(), "upstream attempt");
            let result = send(build(&self.client, &credential)).await;

            match (classify(&result), result) {
                (Classification::Success, Ok(response)) => {
                    metric_inc("upstream.call.success");
                    return Ok(CallSuccess {
                        response,
                        attempts: attempt,
                        credential: credential.masked(),
                    });
                }
                (Classification::Success, Err(err)) => {
                    return Err(self.fatal(attempt, &credential, err.message).await);
                }
                (Classification::Fatal(reason), _) => {
                    return Err(self.fatal(attempt, &credential, reason).await);
                }
                (Classification::Retryable(reason), _) => {
                    metric_inc("upstream.call.retryable");
                    warn!(attempt, credential = %credential.masked(), error = %reason, "retryable upstream failure");
                    self.audit(
                        AuditLevel::Warning,
                        "retryable upstream failure",
                        json!({ "attempt": attempt, "credential": credential.masked(), "error": reason }),
                    )
                    .await;
                    last_error = reason;
                    if attempt < budget {
                        sleep(self.retry_backoff).await;
                    }
                }
                (Classification::RotateCredential(reason), _) => {
                    metric_inc("upstream.call.rotated");
                    warn!(attempt, credential = %credential.masked(), error = %reason, "credential rejected upstream, rotating");
                    self.audit(
                        AuditLevel::Info,
                        "rotating credential after upstream rejection",
                        json!({ "attempt": attempt, "credential": credential.masked(), "error": reason }),
                    )
                    .await;
                    self.pool.penalize(&credential, self.pool.default_penalty()).await?;
                    last_error = reason;
                    if attempt < budget {
                        credential = self.rotate(attempt, &last_error).await?;
                    }
                }
            }
        }

        metric_inc("upstream.call.exhausted");
        error!(attempts = budget, error = %last_error, "all upstream attempts failed");
        self.audit(
            AuditLevel::Error,
            "all upstream attempts failed",
            json!({ "attempts": budget, "error": last_error }),
        )
        .await;
        Err(CallError::AttemptsExhausted {
            attempts: budget,
            last_error,
        })
    }

    async fn first_credential(&self) -> Result<Credential, CallError> {
        let credential = self.pool.next_credential().await?;
        if !self.pool.is_penalized(&credential).await? {
            return Ok(credential);
        }
        Ok(self.pool.get_working_credential(self.probe.as_ref()).await?)
    }

    async fn rotate(&self, attempt: u32, last_error: &str) -> Result<Credential, CallError> {
        match self.pool.get_working_credential(self.probe.as_ref()).await {
            Ok(next) => Ok(next),
            Err(PoolError::Exhausted) => {
                error!(attempts = attempt, error = %last_error, "no working credential left to rotate to");
                self.audit(
                    AuditLevel::Error,
                    "credential pool exhausted",
                    json!({ "attempts": attempt, "error": last_error }),
                )
                .await;
                Err(CallError::Exhausted {
                    attempts: attempt,
                    last_error: last_error.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fatal(&self, attempt: u32, credential: &Credential, reason: String) -> CallError {
        metric_inc("upstream.call.fatal");
        error!(attempt, credential = %credential.masked(), error = %reason, "upstream call failed");
        self.audit(
            AuditLevel::Error,
            "upstream call failed",
            json!({ "attempt": attempt, "credential": credential.masked(), "error": reason }),
        )
        .await;
        CallError::Fatal {
            attempts: attempt,
            reason,
        }
    }

    async fn audit(&self, level: AuditLevel, message: &str, metadata: serde_json::Value) {
        let Some(audit) = self.audit.as_ref() else { return };
        if let Err(err) = audit.record(level, message, metadata).await {
            warn!(error = %err, "failed to write audit log entry");
        }
    }
}

async fn send(request: reqwest::RequestBuilder) -> CallResult {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.bytes().await?;
    Ok(UpstreamResponse {
        status,
        body: body.to_vec(),
    })
}
