use std::fmt;

use crate::types::TargetId;

/// Failures of the shared state store.
///
/// These are *unexpected* failures: they propagate to the caller, which is
/// expected to degrade gracefully.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the command.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A stored record could not be decoded at the store boundary.
    #[error("corrupt record under {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    pub(crate) fn corrupt(key: impl Into<String>, err: impl fmt::Display) -> Self {
        StoreError::Corrupt {
            key: key.into(),
            reason: err.to_string(),
        }
    }
}

/// Errors returned by the credential pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Token does not carry the required prefix.
    #[error("invalid credential: must start with '{required_prefix}'")]
    Validation { required_prefix: String },

    /// The pool is empty.
    #[error("no credential available")]
    NotAvailable,

    /// Every credential is penalized or failed its liveness probe.
    #[error("all credentials are penalized or failing")]
    Exhausted,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors returned by redirect registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// URL is malformed or not http(s).
    #[error("invalid redirect url '{url}': {reason}")]
    Validation { url: String, reason: String },

    /// The registration probe failed or timed out.
    #[error("redirect target unreachable: {0}")]
    UnreachableTarget(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Terminal failures of the outbound call executor.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("no credential available")]
    NotAvailable,

    /// No credential left to rotate to; `last_error` is the rejection that
    /// drained the pool.
    #[error("all credentials are penalized or failing after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// Non-retryable upstream rejection.
    #[error("upstream rejected the call: {reason}")]
    Fatal { attempts: u32, reason: String },

    /// Attempt budget spent on retryable or rotation failures.
    #[error("all {attempts} attempts failed: {last_error}")]
    AttemptsExhausted { attempts: u32, last_error: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PoolError> for CallError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NotAvailable | PoolError::Validation { .. } => CallError::NotAvailable,
            PoolError::Exhausted => CallError::Exhausted {
                attempts: 0,
                last_error: "all credentials are penalized or failing".to_string(),
            },
            PoolError::Store(e) => CallError::Store(e),
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Final outcome of attempting to deliver a payload to one redirect target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Dropped(DropReason),
    Failed(FailureReason),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Reasons why a delivery was dropped *without* an HTTP attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// No target is registered under the id.
    UnknownTarget(TargetId),
}

/// Reasons why an HTTP delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    Network(String),
    /// Target answered with a status outside {200, 201, 202}.
    Rejected { status: u16 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout =>
                write!(f, "request timed out"),
            FailureReason::Network(msg) =>
                write!(f, "network error: {}", msg),
            FailureReason::Rejected { status } =>
                write!(f, "target returned status {}", status),
        }
    }
}
