use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::{DeliveryOutcome, DropReason, FailureReason, StoreError};
use crate::health::HealthSnapshot;
use crate::registry::{is_accepted_status, RedirectRegistry};
use crate::signing::signature_headers;
use crate::storage::Store;
use crate::telemetry::{metric_inc, metric_inc_target};
use crate::types::{FailedDelivery, RedirectTarget, TargetId};

pub const TARGET_ID_HEADER: &str = "X-Redirect-Id";
pub const FORWARDED_HEADER: &str = "X-Redirect-Forwarded";
pub const RETRY_HEADER: &str = "X-Redirect-Retry";

/// Result of replaying one target's failed-delivery queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub attempted: usize,
    pub succeeded: usize,
}

/// Forwards inbound payloads to redirect targets and keeps their counters
/// and failed-delivery queues up to date.
///
/// A delivery runs on its own task: if the caller stops waiting, the HTTP
/// call still finishes and its outcome is still recorded.
#[derive(Clone)]
pub struct RedirectDispatcher {
    registry: RedirectRegistry,
    client: reqwest::Client,
    delivery_timeout: Duration,
    content_type: Option<String>,
}

impl RedirectDispatcher {
    pub fn new(registry: RedirectRegistry, client: reqwest::Client, delivery_timeout: Duration) -> Self {
        Self {
            registry,
            client,
            delivery_timeout,
            content_type: None,
        }
    }

    /// `Content-Type` sent with every forwarded payload. Unset by default;
    /// the payload bytes are forwarded as they arrived.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn from_config(store: Arc<dyn Store>, config: &DispatchConfig) -> Self {
        let client = reqwest::Client::new();
        let registry = RedirectRegistry::from_config(store, client.clone(), config);
        Self::new(registry, client, config.delivery_timeout)
    }

    pub fn registry(&self) -> &RedirectRegistry {
        &self.registry
    }

    /// Delivers `payload`, unmodified, to one target.
    ///
    /// Expected failures come back as `DeliveryOutcome::Failed`; only store
    /// failures are errors.
    pub async fn dispatch(&self, id: &TargetId, payload: &[u8]) -> Result<DeliveryOutcome, StoreError> {
        let Some(target) = self.registry.get_target(id).await? else {
            metric_inc("redirect.dispatch.unknown_target");
            return Ok(DeliveryOutcome::Dropped(DropReason::UnknownTarget(id.clone())));
        };
        self.attempt(target, payload.to_vec(), None).await
    }

    /// Delivers `payload` to every active target concurrently.
    ///
    /// Each target gets its own result, so a failed accounting write for one
    /// target never hides the outcomes of the others.
    pub async fn forward_to_all(
        &self,
        payload: &[u8],
    ) -> Result<Vec<(TargetId, Result<DeliveryOutcome, StoreError>)>, StoreError> {
        let targets: Vec<RedirectTarget> = self
            .registry
            .list_targets()
            .await?
            .into_iter()
            .filter(RedirectTarget::is_active)
            .collect();

        let deliveries = targets.into_iter().map(|target| {
            let id = target.id.clone();
            let payload = payload.to_vec();
            async move { (id, self.attempt(target, payload, None).await) }
        });

        let outcomes = join_all(deliveries).await;
        for (id, result) in &outcomes {
            if let Err(err) = result {
                warn!(target_id = %id, error = %err, "could not record redirect delivery");
            }
        }
        Ok(outcomes)
    }

    /// Re-delivers every queued payload of a target, oldest first.
    ///
    /// Successfully re-delivered records leave the queue. A record that
    /// fails again is replaced by a fresh one with its retry count bumped.
    pub async fn replay_failed(&self, id: &TargetId) -> Result<ReplayReport, StoreError> {
        let Some(target) = self.registry.get_target(id).await? else {
            return Ok(ReplayReport::default());
        };

        let queue = self.registry.queue();
        let mut records = queue.list(id).await?;
        records.reverse();

        let mut report = ReplayReport::default();
        for record in records {
            report.attempted += 1;
            let outcome = self
                .attempt(target.clone(), record.payload.clone(), Some(record.retries))
                .await?;
            if outcome.is_delivered() {
                report.succeeded += 1;
            }
            queue.remove(id, &record).await?;
        }

        info!(
            target_id = %id,
            attempted = report.attempted,
            succeeded = report.succeeded,
            "failed deliveries replayed"
        );
        Ok(report)
    }

    /// Replays every target's queue; targets run concurrently.
    pub async fn replay_all_failed(&self) -> Result<Vec<(TargetId, ReplayReport)>, StoreError> {
        let targets = self.registry.list_targets().await?;
        let replays = targets.into_iter().map(|target| async move {
            let report = self.replay_failed(&target.id).await;
            (target.id, report)
        });

        let mut reports = Vec::new();
        for (id, report) in join_all(replays).await {
            reports.push((id, report?));
        }
        Ok(reports)
    }

    /// Queued records of a target, newest first, for inspection.
    pub async fn failed_deliveries(&self, id: &TargetId) -> Result<Vec<FailedDelivery>, StoreError> {
        self.registry.queue().list(id).await
    }

    pub async fn health_of(&self, id: &TargetId) -> Result<Option<HealthSnapshot>, StoreError> {
        Ok(self.registry.get_target(id).await?.as_ref().map(HealthSnapshot::of))
    }

    pub async fn health_all(&self) -> Result<Vec<HealthSnapshot>, StoreError> {
        Ok(self
            .registry
            .list_targets()
            .await?
            .iter()
            .map(HealthSnapshot::of)
            .collect())
    }

    /// One delivery plus its accounting, detached from the caller.
    ///
    /// `replay_of` carries the retry count of the record being replayed.
    async fn attempt(
        &self,
        target: RedirectTarget,
        payload: Vec<u8>,
        replay_of: Option<u32>,
    ) -> Result<DeliveryOutcome, StoreError> {
        let registry = self.registry.clone();
        let request = delivery_request(
            &self.client,
            &target,
            &payload,
            replay_of.is_some(),
            self.delivery_timeout,
            self.content_type.as_deref(),
        );

        let task = tokio::spawn(async move {
            let result = deliver(request).await;

            // The target may have been removed while the call was in flight.
            if !registry.contains(&target.id).await? {
                debug!(target_id = %target.id, "target removed during delivery, skipping accounting");
                return Ok::<_, StoreError>(outcome_of(result));
            }

            let outcome = match result {
                Ok(()) => {
                    registry.record_success(&target.id).await?;
                    metric_inc_target("redirect.delivery.success", &target.id);
                    debug!(target_id = %target.id, "redirect delivered");
                    DeliveryOutcome::Delivered
                }
                Err(reason) => {
                    let message = reason.to_string();
                    registry.record_failure(&target.id, &message).await?;
                    let retries = replay_of.map_or(0, |r| r.saturating_add(1));
                    registry.queue().push(&target.id, &payload, retries).await?;
                    metric_inc_target("redirect.delivery.failure", &target.id);
                    warn!(target_id = %target.id, url = %target.url, error = %message, retries, "redirect delivery failed");
                    DeliveryOutcome::Failed(reason)
                }
            };

            // A deregister that raced with the writes above left them behind.
            if !registry.contains(&target.id).await? {
                registry.purge_state(&target.id).await?;
            }
            Ok::<_, StoreError>(outcome)
        });

        task.await
            .map_err(|e| StoreError::Backend(format!("delivery task aborted: {}", e)))?
    }
}

fn outcome_of(result: Result<(), FailureReason>) -> DeliveryOutcome {
    match result {
        Ok(()) => DeliveryOutcome::Delivered,
        Err(reason) => DeliveryOutcome::Failed(reason),
    }
}

fn delivery_request(
    client: &reqwest::Client,
    target: &RedirectTarget,
    payload: &[u8],
    is_replay: bool,
    timeout: Duration,
    content_type: Option<&str>,
) -> reqwest::RequestBuilder {
    let mut request = client
        .post(&target.url)
        .body(payload.to_vec())
        .timeout(timeout)
        .header(TARGET_ID_HEADER, target.id.as_str())
        .header(FORWARDED_HEADER, "true");

    if let Some(content_type) = content_type {
        request = request.header(reqwest::header::CONTENT_TYPE, content_type);
    }
    if is_replay {
        request = request.header(RETRY_HEADER, "true");
    }
    if let Some(secret) = target.secret.as_deref() {
        for (name, value) in signature_headers(secret, payload) {
            request = request.header(name, value);
        }
    }
    request
}

async fn deliver(request: reqwest::RequestBuilder) -> Result<(), FailureReason> {
    match request.send().await {
        Ok(resp) if is_accepted_status(resp.status().as_u16()) => Ok(()),
        Ok(resp) => Err(FailureReason::Rejected {
            status: resp.status().as_u16(),
        }),
        Err(err) if err.is_timeout() => Err(FailureReason::Timeout),
        Err(err) => Err(FailureReason::Network(err.to_string())),
    }
}
