//! Per-map access to the shared worker pool.

use crate::actor::{Actor, ProcessingMode, SendHandle};
use crate::config::ActorConfig;
use crate::error::{ActorError, PoolError};
use crate::pool::WorkerPool;
use crate::protocol::Request;
use crate::types::MapId;
use futures::future::try_join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One coordinator actor per worker context, all bound to the same map instance.
///
/// Creating a dispatcher acquires the pool for its map; removing or dropping it
/// releases that reference.
pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    map_id: MapId,
    actors: Vec<Actor>,
    next: AtomicUsize,
    released: bool,
}

impl Dispatcher {
    /// Must be called from within a Tokio runtime; the coordinator actors run on it.
    pub fn new(
        pool: Arc<WorkerPool>,
        map_id: MapId,
        actor_config: &ActorConfig,
    ) -> Result<Self, PoolError> {
        let workers = pool.acquire(map_id.clone())?;
        let actors = workers
            .iter()
            .map(|worker| {
                Actor::new(
                    Arc::new(worker.port().clone()),
                    Some(map_id.clone()),
                    ProcessingMode::Immediate,
                    actor_config,
                )
            })
            .collect::<Result<Vec<_>, _>>();
        let actors = match actors {
            Ok(actors) => actors,
            Err(err) => {
                pool.release(&map_id);
                return Err(err.into());
            }
        };

        debug!(map_id = %map_id, actors = actors.len(), "Dispatcher created");
        Ok(Self {
            pool,
            map_id,
            actors,
            next: AtomicUsize::new(0),
            released: false,
        })
    }

    pub fn map_id(&self) -> &MapId {
        &self.map_id
    }

    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    /// Next actor in round-robin order, or `None` once removed.
    pub fn get_actor(&self) -> Option<&Actor> {
        if self.actors.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.actors.len();
        self.actors.get(index)
    }

    /// Send `params` to every worker. Resolves with the responses in worker order,
    /// or the first failure.
    pub fn broadcast<R>(
        &self,
        params: R,
    ) -> impl Future<Output = Result<Vec<R::Response>, ActorError>>
    where
        R: Request + Clone,
    {
        let handles: Vec<SendHandle<R::Response>> = self
            .actors
            .iter()
            .map(|actor| actor.request(params.clone()))
            .collect();
        try_join_all(handles)
    }

    /// Register `handler` on every actor, for requests workers send back to this map.
    pub fn register_handler<R, F, Fut>(&self, handler: F) -> Result<(), ActorError>
    where
        R: Request,
        F: Fn(Option<MapId>, R, CancellationToken) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R::Response>> + Send + 'static,
    {
        for actor in &self.actors {
            actor.register_handler::<R, F, Fut>(handler.clone())?;
        }
        Ok(())
    }

    /// Tear down this map's actors. Releases the pool reference when `map_removed`.
    pub fn remove(&mut self, map_removed: bool) {
        for actor in self.actors.drain(..) {
            actor.remove();
        }
        if map_removed && !self.released {
            self.released = true;
            self.pool.release(&self.map_id);
        }
        debug!(map_id = %self.map_id, map_removed, "Dispatcher removed");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.remove(true);
    }
}
