//! Physical worker contexts.
//!
//! A worker is a dedicated OS thread driving a current-thread Tokio runtime. All of
//! its traffic goes through one [`MessagePort`]; the coordinator keeps the peer port.

use crate::actor::{Actor, ProcessingMode};
use crate::channel::{MessageChannel, MessagePort};
use crate::config::ActorConfig;
use crate::error::{ActorError, PoolError};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Runs once inside every new worker context to register its handlers.
///
/// Implemented for any `Fn(&Arc<Actor>) -> Result<(), ActorError>` closure. Handlers
/// that send back to the coordinator should hold the actor through a `Weak`; a
/// strong reference inside its own handler table is never freed.
pub trait WorkerBootstrap: Send + Sync + 'static {
    fn bootstrap(&self, worker: &Arc<Actor>) -> Result<(), ActorError>;
}

impl<F> WorkerBootstrap for F
where
    F: Fn(&Arc<Actor>) -> Result<(), ActorError> + Send + Sync + 'static,
{
    fn bootstrap(&self, worker: &Arc<Actor>) -> Result<(), ActorError> {
        self(worker)
    }
}

/// Coordinator-side view of one worker context. Cheap to clone.
#[derive(Clone)]
pub struct WorkerHandle {
    index: usize,
    name: Arc<str>,
    port: MessagePort,
}

impl WorkerHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The coordinator's end of the worker's channel.
    pub fn port(&self) -> &MessagePort {
        &self.port
    }
}

/// An owned, running worker context. Terminated on drop.
pub(crate) struct WorkerContext {
    handle: WorkerHandle,
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl WorkerContext {
    pub(crate) fn spawn(
        index: usize,
        name_prefix: &str,
        actor_config: &ActorConfig,
        bootstrap: Arc<dyn WorkerBootstrap>,
    ) -> Result<Self, PoolError> {
        let name: Arc<str> = format!("{}-{}", name_prefix, index).into();
        let (coordinator, worker) = MessageChannel::new().into_ports();
        let shutdown = CancellationToken::new();

        let thread = {
            let name = Arc::clone(&name);
            let shutdown = shutdown.clone();
            let actor_config = actor_config.clone();
            std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || run_worker(&name, worker, &actor_config, bootstrap, shutdown))
                .map_err(|e| PoolError::Spawn(e.to_string()))?
        };

        debug!(worker = %name, "Spawned worker context");
        Ok(Self {
            handle: WorkerHandle {
                index,
                name,
                port: coordinator,
            },
            shutdown,
            thread: Some(thread),
        })
    }

    pub(crate) fn handle(&self) -> &WorkerHandle {
        &self.handle
    }

    /// Stop the worker's event loop and close its channel.
    pub(crate) fn terminate(&mut self) {
        self.shutdown.cancel();
        self.handle.port.close();
        let Some(thread) = self.thread.take() else {
            return;
        };
        // A worker that drops the last pool reference cannot join itself.
        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!(worker = %self.handle.name, "Worker context panicked");
        }
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run_worker(
    name: &str,
    port: MessagePort,
    actor_config: &ActorConfig,
    bootstrap: Arc<dyn WorkerBootstrap>,
    shutdown: CancellationToken,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(worker = %name, error = %err, "Failed to build worker runtime");
            return;
        }
    };

    runtime.block_on(async {
        let actor = Arc::new(Actor::with_runtime(
            tokio::runtime::Handle::current(),
            Arc::new(port),
            None,
            ProcessingMode::Queued,
            actor_config,
        ));
        // Keep serving after a failed bootstrap so callers get no-handler errors
        // instead of requests that never settle.
        match bootstrap.bootstrap(&actor) {
            Ok(()) => info!(worker = %name, "Worker context ready"),
            Err(err) => error!(worker = %name, error = %err, "Worker bootstrap failed"),
        }
        shutdown.cancelled().await;
        actor.remove();
        info!(worker = %name, "Worker context stopped");
    });
}
