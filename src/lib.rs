//! Resilient dispatch layer for inbound event notifications.
//!
//! This crate provides the two pieces of an event relay that talk to
//! untrusted, rate-limited remote endpoints:
//!
//! - a **credential pool** that rotates interchangeable upstream API keys,
//!   penalizes failing ones, and drives a bounded outbound call executor;
//! - a **redirect dispatcher** that forwards every inbound payload to the
//!   operator's configured targets, tracks per-target health, and keeps a
//!   bounded, replayable queue of failed deliveries.
//!
//! ## Guarantees
//! - All durable state lives in one shared [`Store`]; counters are only
//!   touched through its atomic primitives
//! - Bounded retry budgets and bounded failure history
//! - Per-target isolation
//! - At-least-once delivery to redirect targets
//! - Credentials are never logged or displayed unmasked
//!
//! ## Non-Guarantees
//! - Exactly-once delivery
//! - Ordering across different targets
//! - Strictly fair rotation under concurrent callers
//! - Distributed consensus beyond what the store provides

mod audit;
mod config;
mod dispatcher;
mod error;
mod executor;
mod health;
mod pool;
mod provider;
mod queue;
mod registry;
mod signing;
mod storage;
mod telemetry;
mod types;

#[cfg(feature = "redis")]
mod storage_redis;

pub use audit::{AuditEntry, AuditLevel, AuditLog};
pub use config::DispatchConfig;
pub use dispatcher::{RedirectDispatcher, ReplayReport, FORWARDED_HEADER, RETRY_HEADER, TARGET_ID_HEADER};
pub use error::{
    CallError,
    ConfigError,
    DeliveryOutcome,
    DropReason,
    FailureReason,
    PoolError,
    RegistryError,
    StoreError,
};
pub use executor::{
    CallExecutor,
    CallResult,
    CallSuccess,
    Classification,
    TransportError,
    TransportErrorKind,
    UpstreamResponse,
};
pub use health::{Health, HealthSnapshot, CRITICAL_ERROR_RATE, WARNING_ERROR_RATE};
pub use pool::{AlwaysAlive, CredentialPool, LivenessProbe};
pub use provider::{classify_openai_compatible, ModelsProbe, Provider, ResponseShape};
pub use queue::FailedDeliveryQueue;
pub use registry::RedirectRegistry;
pub use signing::{compute_signature, verify_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER};
pub use storage::{InMemoryStore, Keyspace, Store, StoreResult};
pub use types::{Credential, FailedDelivery, LastError, RedirectTarget, TargetId, TargetStatus};

#[cfg(feature = "redis")]
pub use storage_redis::RedisStore;
