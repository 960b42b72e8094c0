//! Integration tests for the worker pool and dispatcher
//!
//! These run real worker threads, each with its own runtime, behind the
//! coordinator's actors.

use super::test_utils::wait_until;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tilework::actor::{Actor, SendOptions};
use tilework::config::{ActorConfig, PoolConfig};
use tilework::error::ActorError;
use tilework::pool::{Dispatcher, WorkerPool};
use tilework::protocol::{
    ClusterParams, GetClusterExpansionZoom, GetResource, LoadTile, ResourceRequest,
    ResourceResponse, SetReferrer, TileParameters, WorkerTileParameters, WorkerTileResult,
};
use tilework::tile::CanonicalTileId;
use tilework::transfer::TransferBuffer;
use tilework::types::MapId;

fn register_worker_handlers(worker: &Arc<Actor>) -> Result<(), ActorError> {
    worker.register_handler::<SetReferrer, _, _>(|_, _, _| async { Ok(()) })?;

    // Answer with the length of the requesting map's id, to check routing.
    worker.register_handler::<GetClusterExpansionZoom, _, _>(|map_id, _, _| async move {
        Ok(map_id.map(|id| id.as_str().len() as u32).unwrap_or(0))
    })?;

    // Loading a tile asks the owning map for the raw bytes first.
    let weak = Arc::downgrade(worker);
    worker.register_handler::<LoadTile, _, _>(move |map_id, params, _| {
        load_tile(weak.clone(), map_id, params)
    })?;
    Ok(())
}

async fn load_tile(
    worker: Weak<Actor>,
    map_id: Option<MapId>,
    params: LoadTile,
) -> anyhow::Result<Option<WorkerTileResult>> {
    let actor = worker
        .upgrade()
        .ok_or_else(|| anyhow::anyhow!("worker actor is gone"))?;
    let options = SendOptions {
        target_map_id: map_id,
        must_queue: false,
    };
    let url = params.0.url.unwrap_or_default();
    let resource = actor
        .send(GetResource(ResourceRequest { url }), options)
        .await?;
    Ok(Some(WorkerTileResult {
        buckets: resource.body,
        layer_ids: vec!["water".to_string()],
        ..WorkerTileResult::default()
    }))
}

fn create_pool(workers: usize) -> Arc<WorkerPool> {
    let config = PoolConfig {
        worker_count: Some(workers),
        ..PoolConfig::default()
    };
    Arc::new(WorkerPool::new(
        config,
        ActorConfig::default(),
        register_worker_handlers,
    ))
}

fn tile_request(url: &str) -> LoadTile {
    LoadTile(WorkerTileParameters {
        tile: TileParameters {
            source: "composite".to_string(),
            source_type: "vector".to_string(),
            uid: 1,
            tile_id: CanonicalTileId::new(3, 2, 5),
        },
        url: Some(url.to_string()),
        tile_size: 512,
        pixel_ratio: 2.0,
        overscaling: 1,
        collect_resource_timing: false,
    })
}

#[tokio::test]
async fn test_dispatcher_round_trip_through_worker_thread() {
    let pool = create_pool(2);
    let dispatcher = Dispatcher::new(Arc::clone(&pool), MapId::from("abc"), &ActorConfig::default())
        .unwrap();
    assert_eq!(dispatcher.actors().len(), 2);

    let actor = dispatcher.get_actor().unwrap();
    let zoom = actor
        .request(GetClusterExpansionZoom(ClusterParams {
            source: "points".to_string(),
            cluster_id: 9,
        }))
        .await
        .unwrap();
    assert_eq!(zoom, 3);
}

#[tokio::test]
async fn test_worker_calls_back_into_its_map() {
    let pool = create_pool(1);
    let dispatcher = Dispatcher::new(Arc::clone(&pool), MapId::from("map"), &ActorConfig::default())
        .unwrap();
    dispatcher
        .register_handler::<GetResource, _, _>(|_, request, _| async move {
            Ok(ResourceResponse {
                body: TransferBuffer::new(request.0.url.into_bytes()),
                content_type: Some("application/x-protobuf".to_string()),
            })
        })
        .unwrap();

    let result = dispatcher
        .get_actor()
        .unwrap()
        .request(tile_request("https://tiles.example.com/3/2/5.pbf"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.buckets.as_bytes(), b"https://tiles.example.com/3/2/5.pbf");
    assert_eq!(result.layer_ids, vec!["water".to_string()]);
}

#[tokio::test]
async fn test_broadcast_reaches_every_worker() {
    let pool = create_pool(3);
    let dispatcher = Dispatcher::new(Arc::clone(&pool), MapId::from("map"), &ActorConfig::default())
        .unwrap();
    let responses = dispatcher
        .broadcast(SetReferrer("https://example.com".to_string()))
        .await
        .unwrap();
    assert_eq!(responses.len(), 3);
}

#[tokio::test]
async fn test_get_actor_is_round_robin() {
    let pool = create_pool(2);
    let dispatcher = Dispatcher::new(Arc::clone(&pool), MapId::from("map"), &ActorConfig::default())
        .unwrap();
    let first = dispatcher.get_actor().unwrap() as *const Actor;
    let second = dispatcher.get_actor().unwrap() as *const Actor;
    let third = dispatcher.get_actor().unwrap() as *const Actor;
    assert_ne!(first, second);
    assert_eq!(first, third);
}

#[tokio::test]
async fn test_maps_sharing_workers_get_their_own_responses() {
    let pool = create_pool(1);
    let short = Dispatcher::new(Arc::clone(&pool), MapId::from("a"), &ActorConfig::default())
        .unwrap();
    let long = Dispatcher::new(Arc::clone(&pool), MapId::from("bbbb"), &ActorConfig::default())
        .unwrap();
    assert_eq!(pool.active_instances(), 2);

    let params = |id| {
        GetClusterExpansionZoom(ClusterParams {
            source: "points".to_string(),
            cluster_id: id,
        })
    };
    let from_short = short.get_actor().unwrap().request(params(1));
    let from_long = long.get_actor().unwrap().request(params(2));
    assert_eq!(from_long.await.unwrap(), 4);
    assert_eq!(from_short.await.unwrap(), 1);
}

#[tokio::test]
async fn test_dropping_last_dispatcher_tears_down_pool() {
    let pool = create_pool(2);
    let first = Dispatcher::new(Arc::clone(&pool), MapId::from("a"), &ActorConfig::default())
        .unwrap();
    let mut second = Dispatcher::new(Arc::clone(&pool), MapId::from("b"), &ActorConfig::default())
        .unwrap();

    second.remove(true);
    assert!(second.get_actor().is_none());
    assert!(pool.is_active());

    drop(first);
    assert!(!pool.is_active());
    assert_eq!(pool.active_instances(), 0);

    // The next dispatcher starts a fresh set of workers.
    let third = Dispatcher::new(Arc::clone(&pool), MapId::from("c"), &ActorConfig::default())
        .unwrap();
    third
        .get_actor()
        .unwrap()
        .request(SetReferrer("again".to_string()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_remove_without_map_removal_keeps_reference() {
    let pool = create_pool(1);
    let mut dispatcher = Dispatcher::new(Arc::clone(&pool), MapId::from("a"), &ActorConfig::default())
        .unwrap();
    dispatcher.remove(false);
    assert!(pool.is_active());
    assert_eq!(pool.active_instances(), 1);

    // Dropping after a partial removal still releases the map.
    drop(dispatcher);
    assert!(!pool.is_active());
}

#[tokio::test]
async fn test_prewarmed_pool_outlives_maps() {
    let booted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&booted);
    let config = PoolConfig {
        worker_count: Some(2),
        ..PoolConfig::default()
    };
    let pool = Arc::new(WorkerPool::new(
        config,
        ActorConfig::default(),
        move |worker: &Arc<Actor>| -> Result<(), ActorError> {
            counter.fetch_add(1, Ordering::SeqCst);
            register_worker_handlers(worker)
        },
    ));
    pool.prewarm().unwrap();
    assert!(wait_until(Duration::from_secs(2), || booted.load(Ordering::SeqCst) == 2).await);

    for name in ["one", "two", "three"] {
        let dispatcher =
            Dispatcher::new(Arc::clone(&pool), MapId::from(name), &ActorConfig::default()).unwrap();
        dispatcher
            .broadcast(SetReferrer(name.to_string()))
            .await
            .unwrap();
    }
    assert!(pool.is_active());
    assert_eq!(booted.load(Ordering::SeqCst), 2);

    pool.clear_prewarmed();
    assert!(!pool.is_active());
}
