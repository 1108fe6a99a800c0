use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use redirect_dispatcher::{
    verify_signature, DeliveryOutcome, DispatchConfig, DropReason, FailureReason, Health,
    InMemoryStore, RedirectDispatcher, RegistryError, ReplayReport, Store, TargetId,
};

fn dispatcher() -> RedirectDispatcher {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let config = DispatchConfig {
        probe_timeout: Duration::from_millis(500),
        delivery_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    RedirectDispatcher::from_config(store, &config)
}

async fn accept_probes(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hook").header_exists("x-redirect-test");
            then.status(200);
        })
        .await;
}

#[tokio::test]
async fn register_probes_target_and_starts_with_zero_counters() {
    let server = MockServer::start_async().await;
    let probe = server
        .mock_async(|when, then| {
            when.method(POST).path("/hook").header("x-redirect-test", "true");
            then.status(201);
        })
        .await;

    let dispatcher = dispatcher();
    let id = dispatcher
        .registry()
        .register(&server.url("/hook"), "crm mirror")
        .await
        .expect("probe accepted");

    probe.assert_hits_async(1).await;
    let targets = dispatcher.registry().list_targets().await.unwrap();
    assert_eq!(targets.len(), 1);
    let target = &targets[0];
    assert_eq!(target.id, id);
    assert_eq!(target.description, "crm mirror");
    assert!(target.is_active());
    assert_eq!((target.success_count, target.error_count), (0, 0));
    assert!(target.last_success_secs.is_none());
    assert!(target.last_error.is_none());
}

#[tokio::test]
async fn register_rejects_refused_and_failing_probes() {
    let dispatcher = dispatcher();
    let refused = dispatcher.registry().register("http://127.0.0.1:1/hook", "dead").await;
    assert!(matches!(refused, Err(RegistryError::UnreachableTarget(_))));

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hook");
            then.status(204);
        })
        .await;
    let rejected = dispatcher.registry().register(&server.url("/hook"), "wrong status").await;
    assert!(matches!(rejected, Err(RegistryError::UnreachableTarget(_))));

    assert!(dispatcher.registry().list_targets().await.unwrap().is_empty());
}

#[tokio::test]
async fn register_gives_up_on_slow_probe() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hook");
            then.status(200).delay(Duration::from_secs(2));
        })
        .await;

    let result = dispatcher().registry().register(&server.url("/hook"), "slow").await;
    assert!(matches!(result, Err(RegistryError::UnreachableTarget(_))));
}

#[tokio::test]
async fn register_rejects_malformed_url() {
    let result = dispatcher().registry().register("mailto:ops@example.com", "nope").await;
    assert!(matches!(result, Err(RegistryError::Validation { .. })));
}

#[tokio::test]
async fn failed_delivery_is_queued_then_replayed() {
    let server = MockServer::start_async().await;
    accept_probes(&server).await;
    let dispatcher = dispatcher();
    let id = dispatcher.registry().register(&server.url("/hook"), "a").await.unwrap();

    let mut failing = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hook")
                .header("x-redirect-forwarded", "true")
                .header("x-redirect-id", id.as_str())
                .body(r#"{"x":1}"#);
            then.status(500);
        })
        .await;

    let outcome = dispatcher.dispatch(&id, br#"{"x":1}"#).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Failed(FailureReason::Rejected { status: 500 }));
    failing.assert_hits_async(1).await;

    let target = dispatcher.registry().get_target(&id).await.unwrap().unwrap();
    assert_eq!((target.success_count, target.error_count), (0, 1));
    assert_eq!(target.last_error.as_ref().unwrap().message, "target returned status 500");

    let queued = dispatcher.failed_deliveries(&id).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].payload, br#"{"x":1}"#.to_vec());
    assert_eq!(queued[0].retries, 0);

    failing.delete_async().await;
    let replay = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hook")
                .header("x-redirect-retry", "true")
                .body(r#"{"x":1}"#);
            then.status(200);
        })
        .await;

    let report = dispatcher.replay_failed(&id).await.unwrap();
    assert_eq!(report, ReplayReport { attempted: 1, succeeded: 1 });
    replay.assert_hits_async(1).await;

    let target = dispatcher.registry().get_target(&id).await.unwrap().unwrap();
    assert_eq!((target.success_count, target.error_count), (1, 1));
    assert!(target.last_success_secs.is_some());
    assert!(dispatcher.failed_deliveries(&id).await.unwrap().is_empty());

    let again = dispatcher.replay_failed(&id).await.unwrap();
    assert_eq!(again, ReplayReport::default());
    replay.assert_hits_async(1).await;
}

#[tokio::test]
async fn replay_of_k_records_succeeds_k_times() {
    let server = MockServer::start_async().await;
    accept_probes(&server).await;
    let dispatcher = dispatcher();
    let id = dispatcher.registry().register(&server.url("/hook"), "a").await.unwrap();

    let mut failing = server
        .mock_async(|when, then| {
            when.method(POST).path("/hook").header_exists("x-redirect-forwarded");
            then.status(503);
        })
        .await;
    for i in 0..3 {
        let payload = format!(r#"{{"n":{}}}"#, i);
        dispatcher.dispatch(&id, payload.as_bytes()).await.unwrap();
    }
    failing.delete_async().await;

    server
        .mock_async(|when, then| {
            when.method(POST).path("/hook").header_exists("x-redirect-forwarded");
            then.status(202);
        })
        .await;

    let before = dispatcher.registry().get_target(&id).await.unwrap().unwrap();
    let report = dispatcher.replay_failed(&id).await.unwrap();
    let after = dispatcher.registry().get_target(&id).await.unwrap().unwrap();

    assert_eq!(report, ReplayReport { attempted: 3, succeeded: 3 });
    assert_eq!(after.success_count, before.success_count + 3);
    assert_eq!(after.error_count, 3);
}

#[tokio::test]
async fn replay_that_fails_again_bumps_retry_count() {
    let server = MockServer::start_async().await;
    accept_probes(&server).await;
    let dispatcher = dispatcher();
    let id = dispatcher.registry().register(&server.url("/hook"), "a").await.unwrap();

    server
        .mock_async(|when, then| {
            when.method(POST).path("/hook").header_exists("x-redirect-forwarded");
            then.status(500);
        })
        .await;

    dispatcher.dispatch(&id, b"payload").await.unwrap();
    let report = dispatcher.replay_failed(&id).await.unwrap();
    assert_eq!(report, ReplayReport { attempted: 1, succeeded: 0 });

    let queued = dispatcher.failed_deliveries(&id).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].retries, 1);
    assert_eq!(queued[0].payload, b"payload".to_vec());
}

#[tokio::test]
async fn deregister_purges_queue_and_counters() {
    let server = MockServer::start_async().await;
    accept_probes(&server).await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/hook").header_exists("x-redirect-forwarded");
            then.status(500);
        })
        .await;

    let dispatcher = dispatcher();
    let id = dispatcher.registry().register(&server.url("/hook"), "a").await.unwrap();
    dispatcher.dispatch(&id, b"lost").await.unwrap();
    assert_eq!(dispatcher.failed_deliveries(&id).await.unwrap().len(), 1);

    dispatcher.registry().deregister(&id).await.unwrap();
    dispatcher.registry().deregister(&id).await.unwrap();

    assert!(dispatcher.registry().get_target(&id).await.unwrap().is_none());
    assert!(dispatcher.failed_deliveries(&id).await.unwrap().is_empty());
    assert!(dispatcher.health_of(&id).await.unwrap().is_none());
    assert_eq!(
        dispatcher.dispatch(&id, b"late").await.unwrap(),
        DeliveryOutcome::Dropped(DropReason::UnknownTarget(id.clone()))
    );
}

#[tokio::test]
async fn dispatch_to_unknown_target_is_dropped() {
    let id = TargetId::from("missing");
    let outcome = dispatcher().dispatch(&id, b"{}").await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Dropped(DropReason::UnknownTarget(id)));
}

#[tokio::test]
async fn health_follows_counters() {
    let server = MockServer::start_async().await;
    accept_probes(&server).await;
    let dispatcher = dispatcher();
    let id = dispatcher.registry().register(&server.url("/hook"), "a").await.unwrap();

    assert_eq!(dispatcher.health_of(&id).await.unwrap().unwrap().health, Health::Unknown);

    let mut ok = server
        .mock_async(|when, then| {
            when.method(POST).path("/hook").header_exists("x-redirect-forwarded");
            then.status(200);
        })
        .await;
    dispatcher.dispatch(&id, b"1").await.unwrap();
    assert_eq!(dispatcher.health_of(&id).await.unwrap().unwrap().health, Health::Healthy);
    ok.delete_async().await;

    server
        .mock_async(|when, then| {
            when.method(POST).path("/hook").header_exists("x-redirect-forwarded");
            then.status(500);
        })
        .await;
    dispatcher.dispatch(&id, b"2").await.unwrap();
    let snapshot = dispatcher.health_of(&id).await.unwrap().unwrap();
    assert_eq!(snapshot.total, 2);
    assert_eq!(snapshot.error_rate, 0.5);
    assert_eq!(snapshot.health, Health::Critical);
}

#[tokio::test]
async fn forward_to_all_reaches_every_target() {
    let first = MockServer::start_async().await;
    let second = MockServer::start_async().await;
    accept_probes(&first).await;
    accept_probes(&second).await;
    let first_hook = first
        .mock_async(|when, then| {
            when.method(POST).path("/hook").body("event");
            then.status(200);
        })
        .await;
    let second_hook = second
        .mock_async(|when, then| {
            when.method(POST).path("/hook").body("event");
            then.status(500);
        })
        .await;

    let dispatcher = dispatcher();
    let a = dispatcher.registry().register(&first.url("/hook"), "a").await.unwrap();
    let b = dispatcher.registry().register(&second.url("/hook"), "b").await.unwrap();

    let outcomes = dispatcher.forward_to_all(b"event").await.unwrap();
    assert_eq!(outcomes.len(), 2);
    for (id, outcome) in outcomes {
        let outcome = outcome.unwrap();
        if id == a {
            assert!(outcome.is_delivered());
        } else {
            assert_eq!(id, b);
            assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
        }
    }
    first_hook.assert_hits_async(1).await;
    second_hook.assert_hits_async(1).await;
    assert!(dispatcher.failed_deliveries(&a).await.unwrap().is_empty());
    assert_eq!(dispatcher.failed_deliveries(&b).await.unwrap().len(), 1);
}

#[tokio::test]
async fn signed_targets_receive_verifiable_signature() {
    let server = MockServer::start_async().await;
    accept_probes(&server).await;
    let signed = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hook")
                .header_exists("x-redirect-signature")
                .header_exists("x-redirect-timestamp");
            then.status(200);
        })
        .await;

    let dispatcher = dispatcher();
    let id = dispatcher
        .registry()
        .register_signed(&server.url("/hook"), "signed", b"shh")
        .await
        .unwrap();
    let target = dispatcher.registry().get_target(&id).await.unwrap().unwrap();
    assert_eq!(target.secret.as_deref(), Some(&b"shh"[..]));

    assert!(dispatcher.dispatch(&id, b"{}").await.unwrap().is_delivered());
    signed.assert_hits_async(1).await;

    let sig = redirect_dispatcher::compute_signature(b"shh", b"{}", "1");
    assert!(verify_signature(b"shh", b"{}", "1", &sig));
}
