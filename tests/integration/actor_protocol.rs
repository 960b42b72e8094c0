//! Integration tests for the actor request/response protocol
//!
//! Tests cover:
//! - Correlation of out-of-order responses
//! - Cancellation before and after a handler starts
//! - Protocol and handler errors, including handler panics
//! - Forced queuing on an immediate actor
//! - Routing by map id and by origin

use super::test_utils::{actor_pair, actor_pair_with_configs, settle, wait_until};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tilework::actor::{Actor, ProcessingMode, SendOptions};
use tilework::channel::MessageChannel;
use tilework::config::ActorConfig;
use tilework::error::ActorError;
use tilework::protocol::{
    ClusterParams, GetClusterExpansionZoom, GetResource, ResourceRequest, ResourceResponse,
    SetReferrer,
};
use tilework::transfer::TransferBuffer;
use tilework::types::MapId;
use tokio::sync::Notify;

fn cluster(id: u64) -> GetClusterExpansionZoom {
    GetClusterExpansionZoom(ClusterParams {
        source: "points".to_string(),
        cluster_id: id,
    })
}

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    let pair = actor_pair("map");
    let gates: Arc<[Notify; 2]> = Arc::new([Notify::new(), Notify::new()]);
    let handler_gates = Arc::clone(&gates);
    pair.worker
        .register_handler::<GetClusterExpansionZoom, _, _>(move |_, params, _| {
            let gates = Arc::clone(&handler_gates);
            async move {
                gates[params.0.cluster_id as usize].notified().await;
                Ok(params.0.cluster_id as u32 * 10 + 1)
            }
        })
        .unwrap();

    let first = pair.coordinator.request(cluster(0));
    let second = pair.coordinator.request(cluster(1));
    assert_ne!(first.id(), second.id());

    gates[1].notify_one();
    assert_eq!(second.await.unwrap(), 11);
    gates[0].notify_one();
    assert_eq!(first.await.unwrap(), 1);
    assert_eq!(pair.coordinator.pending_requests(), 0);
}

#[tokio::test]
async fn test_cancel_before_drain_never_invokes_handler() {
    let pair = actor_pair("map");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    pair.worker
        .register_handler::<SetReferrer, _, _>(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .unwrap();

    let handle = pair
        .coordinator
        .request(SetReferrer("https://example.com".to_string()));
    handle.cancel();
    assert_eq!(pair.coordinator.pending_requests(), 0);

    let outcome = tokio::time::timeout(Duration::from_millis(50), handle).await;
    assert!(outcome.is_err(), "a cancelled request must never settle");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(pair.worker.queued_tasks(), 0);
}

#[tokio::test]
async fn test_cancel_while_running_fires_hook_once() {
    let pair = actor_pair("map");
    let started = Arc::new(Notify::new());
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let (handler_started, handler_hooks) = (Arc::clone(&started), Arc::clone(&hook_calls));
    pair.worker
        .register_handler::<GetClusterExpansionZoom, _, _>(move |_, _, token| {
            let started = Arc::clone(&handler_started);
            let hooks = Arc::clone(&handler_hooks);
            async move {
                started.notify_one();
                token.cancelled().await;
                hooks.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("aborted")
            }
        })
        .unwrap();

    let handle = pair.coordinator.request(cluster(7));
    started.notified().await;
    assert_eq!(pair.worker.running_tasks(), 1);

    handle.cancel();
    handle.cancel();
    assert!(wait_until(Duration::from_secs(1), || hook_calls.load(Ordering::SeqCst) == 1).await);

    let outcome = tokio::time::timeout(Duration::from_millis(50), handle).await;
    assert!(outcome.is_err(), "a cancelled request must never settle");
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pair.worker.running_tasks(), 0);
}

#[tokio::test]
async fn test_missing_handler_is_reported_to_caller() {
    let pair = actor_pair("map");
    pair.worker
        .register_handler::<SetReferrer, _, _>(|_, _, _| async { Ok(()) })
        .unwrap();

    let err = pair.coordinator.request(cluster(1)).await.unwrap_err();
    match &err {
        ActorError::NoHandler {
            operation,
            map_id,
            available,
        } => {
            assert_eq!(operation, "geojson.getClusterExpansionZoom");
            assert!(map_id.is_none());
            assert_eq!(available, "setReferrer");
        }
        other => panic!("expected NoHandler, got {:?}", other),
    }
    assert!(err
        .to_string()
        .starts_with("Could not find a registered handler for geojson.getClusterExpansionZoom"));

    // The worker keeps serving after a protocol error.
    pair.coordinator
        .request(SetReferrer("https://example.com".to_string()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_handler_failure_becomes_error_response() {
    let pair = actor_pair("map");
    pair.worker
        .register_handler::<GetClusterExpansionZoom, _, _>(|_, params, _| async move {
            anyhow::ensure!(params.0.cluster_id != 0, "cluster {} does not exist", params.0.cluster_id);
            Ok(4)
        })
        .unwrap();

    let err = pair.coordinator.request(cluster(0)).await.unwrap_err();
    assert!(matches!(&err, ActorError::Handler(msg) if msg == "cluster 0 does not exist"));
    assert_eq!(pair.coordinator.request(cluster(3)).await.unwrap(), 4);
}

#[tokio::test]
async fn test_handler_panic_becomes_error_response() {
    let pair = actor_pair("map");
    pair.worker
        .register_handler::<SetReferrer, _, _>(|_, referrer, _| async move {
            if referrer.0.is_empty() {
                panic!("boom");
            }
            Ok(())
        })
        .unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        pair.coordinator.request(SetReferrer(String::new())),
    )
    .await
    .expect("a panicking handler still answers");
    assert!(matches!(&outcome, Err(ActorError::Handler(msg)) if msg == "handler panicked: boom"));
    assert_eq!(pair.worker.running_tasks(), 0);
    assert_eq!(pair.coordinator.pending_requests(), 0);

    // The worker keeps serving after the panic.
    pair.coordinator
        .request(SetReferrer("https://example.com".to_string()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_must_queue_lets_cancel_win_on_immediate_actor() {
    let (caller_port, peer_port) = MessageChannel::new().into_ports();
    let config = ActorConfig::default();
    let caller = Actor::new(
        Arc::new(caller_port),
        Some(MapId::from("map")),
        ProcessingMode::Immediate,
        &config,
    )
    .unwrap();
    let peer = Actor::new(Arc::new(peer_port), None, ProcessingMode::Immediate, &config).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    peer.register_handler::<SetReferrer, _, _>(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    })
    .unwrap();

    let first = caller.send(
        SetReferrer("first".to_string()),
        SendOptions::default().queued(),
    );
    let abort = first.abort_handle();
    abort.abort();
    assert!(abort.is_aborted());

    caller
        .send(SetReferrer("second".to_string()), SendOptions::default().queued())
        .await
        .unwrap();
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(peer.queued_tasks(), 0);
    assert_eq!(caller.pending_requests(), 0);
    let outcome = tokio::time::timeout(Duration::from_millis(50), first).await;
    assert!(outcome.is_err(), "a cancelled request must never settle");
}

#[tokio::test]
async fn test_handler_receives_sender_map_id() {
    let pair = actor_pair("map-7");
    pair.worker
        .register_handler::<GetClusterExpansionZoom, _, _>(|map_id, _, _| async move {
            Ok(map_id.map(|id| id.as_str().len() as u32).unwrap_or(0))
        })
        .unwrap();
    assert_eq!(pair.coordinator.request(cluster(1)).await.unwrap(), 5);
}

#[tokio::test]
async fn test_notify_runs_handler_without_response() {
    let pair = actor_pair("map");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    pair.worker
        .register_handler::<SetReferrer, _, _>(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .unwrap();

    pair.coordinator
        .notify(SetReferrer("https://example.com".to_string()), SendOptions::default())
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || calls.load(Ordering::SeqCst) == 1).await);
    assert_eq!(pair.coordinator.pending_requests(), 0);
}

#[tokio::test]
async fn test_worker_request_is_routed_to_target_map() {
    let (coordinator_port, worker_port) = MessageChannel::new().into_ports();
    let config = ActorConfig::default();
    let map_a = Actor::new(
        Arc::new(coordinator_port.clone()),
        Some(MapId::from("a")),
        ProcessingMode::Immediate,
        &config,
    )
    .unwrap();
    let map_b = Actor::new(
        Arc::new(coordinator_port),
        Some(MapId::from("b")),
        ProcessingMode::Immediate,
        &config,
    )
    .unwrap();
    let worker = Actor::new(Arc::new(worker_port), None, ProcessingMode::Queued, &config).unwrap();

    for (actor, body) in [(&map_a, "from a"), (&map_b, "from b")] {
        actor
            .register_handler::<GetResource, _, _>(move |_, _, _| async move {
                Ok(ResourceResponse {
                    body: TransferBuffer::copy_from_slice(body.as_bytes()),
                    content_type: None,
                })
            })
            .unwrap();
    }

    let response = worker
        .send(
            GetResource(ResourceRequest {
                url: "https://tiles.example.com/style.json".to_string(),
            }),
            SendOptions::to(MapId::from("b")),
        )
        .await
        .unwrap();
    assert_eq!(response.body.as_bytes(), b"from b");
    assert_eq!(worker.pending_requests(), 0);
}

#[tokio::test]
async fn test_foreign_origin_is_silently_dropped() {
    let worker_config = ActorConfig {
        origin: "https://elsewhere.example".to_string(),
        trusted_origins: Vec::new(),
    };
    let pair = actor_pair_with_configs("map", &ActorConfig::default(), &worker_config);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    pair.worker
        .register_handler::<SetReferrer, _, _>(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .unwrap();

    let handle = pair.coordinator.request(SetReferrer("x".to_string()));
    let outcome = tokio::time::timeout(Duration::from_millis(50), handle).await;
    assert!(outcome.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_removed_actor_disconnects_pending_requests() {
    let pair = actor_pair("map");
    let gate = Arc::new(Notify::new());
    let handler_gate = Arc::clone(&gate);
    pair.worker
        .register_handler::<SetReferrer, _, _>(move |_, _, _| {
            let gate = Arc::clone(&handler_gate);
            async move {
                gate.notified().await;
                Ok(())
            }
        })
        .unwrap();

    let handle = pair.coordinator.request(SetReferrer("x".to_string()));
    settle().await;
    pair.coordinator.remove();
    assert!(matches!(handle.await, Err(ActorError::Disconnected)));
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let pair = actor_pair("map");
    pair.worker
        .register_handler::<SetReferrer, _, _>(|_, _, _| async { Ok(()) })
        .unwrap();
    let err = pair
        .worker
        .register_handler::<SetReferrer, _, _>(|_, _, _| async { Ok(()) })
        .unwrap_err();
    assert!(matches!(err, ActorError::DuplicateHandler(_)));
}
