//! Worker Pool
//!
//! A fixed-size set of worker contexts shared by every map instance. Instances hold
//! a reference through [`WorkerPool::acquire`]; the contexts are started on the
//! first acquire and terminated when the last reference is released. The
//! [`MapId::preload`] pseudo instance keeps the pool warm between real maps.

mod dispatcher;
mod worker;

use crate::config::{ActorConfig, PoolConfig};
use crate::error::PoolError;
use crate::types::MapId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use worker::WorkerContext;

pub use dispatcher::Dispatcher;
pub use worker::{WorkerBootstrap, WorkerHandle};

#[derive(Default)]
struct PoolState {
    active: HashSet<MapId>,
    workers: Vec<WorkerContext>,
}

pub struct WorkerPool {
    config: PoolConfig,
    actor_config: ActorConfig,
    bootstrap: Arc<dyn WorkerBootstrap>,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        actor_config: ActorConfig,
        bootstrap: impl WorkerBootstrap,
    ) -> Self {
        Self {
            config,
            actor_config,
            bootstrap: Arc::new(bootstrap),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Mark `map_id` active and return the shared worker contexts, starting them if
    /// this is the first reference.
    pub fn acquire(&self, map_id: MapId) -> Result<Vec<WorkerHandle>, PoolError> {
        let mut state = self.state.lock();
        if state.workers.is_empty() {
            state.workers = self.spawn_workers()?;
        }
        if state.active.insert(map_id.clone()) {
            debug!(map_id = %map_id, active = state.active.len(), "Acquired worker pool");
        }
        Ok(state.workers.iter().map(|w| w.handle().clone()).collect())
    }

    /// Drop `map_id`'s reference. The last release terminates every worker.
    pub fn release(&self, map_id: &MapId) {
        let retired = {
            let mut state = self.state.lock();
            if !state.active.remove(map_id) {
                return;
            }
            debug!(map_id = %map_id, active = state.active.len(), "Released worker pool");
            if !state.active.is_empty() {
                return;
            }
            std::mem::take(&mut state.workers)
        };
        // Join outside the lock so a slow worker cannot block acquire().
        if !retired.is_empty() {
            info!(workers = retired.len(), "Terminating worker pool");
        }
        drop(retired);
    }

    /// Hold the pool open with the preload pseudo instance.
    pub fn prewarm(&self) -> Result<(), PoolError> {
        self.acquire(MapId::preload()).map(|_| ())
    }

    pub fn clear_prewarmed(&self) {
        self.release(&MapId::preload());
    }

    pub fn is_prewarmed(&self) -> bool {
        self.state.lock().active.contains(&MapId::preload())
    }

    /// Whether any worker context is running.
    pub fn is_active(&self) -> bool {
        !self.state.lock().workers.is_empty()
    }

    pub fn active_instances(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Size the pool has, or will have once started.
    pub fn worker_count(&self) -> usize {
        self.config.effective_worker_count()
    }

    fn spawn_workers(&self) -> Result<Vec<WorkerContext>, PoolError> {
        let count = self.config.effective_worker_count();
        if count == 0 {
            return Err(PoolError::ZeroWorkers);
        }
        let workers = (0..count)
            .map(|index| {
                WorkerContext::spawn(
                    index,
                    &self.config.thread_name_prefix,
                    &self.actor_config,
                    Arc::clone(&self.bootstrap),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(workers = count, "Started worker pool");
        Ok(workers)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.active.clear();
        state.workers.clear();
    }
}
