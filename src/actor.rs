//! Actor
//!
//! Bidirectional, multiplexed request/response over one [`ActorTarget`]. An actor
//! sends typed requests and matches the responses back purely by correlation id,
//! and it dispatches incoming requests to the handler registered for their
//! [`Operation`](crate::protocol::Operation).
//!
//! Two processing modes exist. The coordinator processes envelopes as they arrive
//! ([`ProcessingMode::Immediate`]) so partial results from different workers never
//! interleave. Workers ([`ProcessingMode::Queued`]) park requests in an ordered queue
//! drained one task per scheduler tick, which gives a `<cancel>` for a task that
//! has not started yet the chance to remove it before its handler ever runs.

pub mod correlation;
mod handler;
pub mod message;
mod scheduler;
mod send;

use crate::channel::ActorTarget;
use crate::config::ActorConfig;
use crate::error::ActorError;
use crate::protocol::Request;
use crate::transfer::Payload;
use crate::types::MapId;
use correlation::{CorrelationId, CorrelationRegistry};
use handler::HandlerRegistry;
use message::{Envelope, MessageKind, RemoteError};
use parking_lot::Mutex;
use scheduler::ThrottledInvoker;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

pub use send::{AbortHandle, SendHandle, SendOptions};

/// How an actor treats incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Dispatch each envelope as soon as it is received.
    Immediate,
    /// Queue envelopes and drain them one per scheduler tick.
    Queued,
}

/// Tasks waiting for the scheduler, in arrival order.
#[derive(Default)]
struct TaskQueue {
    tasks: HashMap<CorrelationId, Envelope>,
    order: VecDeque<CorrelationId>,
}

impl TaskQueue {
    fn push(&mut self, envelope: Envelope) {
        self.order.push_back(envelope.id);
        self.tasks.insert(envelope.id, envelope);
    }

    /// Forget a task that has not started. Its id stays in `order` and is skipped.
    fn cancel(&mut self, id: CorrelationId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    /// Next id in order with its task, if the task was not cancelled, and whether
    /// more ids remain.
    fn pop(&mut self) -> Option<(Option<Envelope>, bool)> {
        let id = self.order.pop_front()?;
        let task = self.tasks.remove(&id);
        Some((task, !self.order.is_empty()))
    }
}

pub(crate) struct ActorInner {
    target: Arc<dyn ActorTarget>,
    map_id: Option<MapId>,
    origin: String,
    trusted_origins: Vec<String>,
    mode: ProcessingMode,
    runtime: Handle,
    pending: CorrelationRegistry,
    queue: Mutex<TaskQueue>,
    running: Mutex<HashMap<CorrelationId, CancellationToken>>,
    handlers: HandlerRegistry,
    invoker: ThrottledInvoker,
}

impl ActorInner {
    fn post(&self, id: CorrelationId, kind: MessageKind, target_map_id: Option<MapId>) {
        self.post_envelope(Envelope {
            id,
            kind,
            origin: self.origin.clone(),
            source_map_id: self.map_id.clone(),
            target_map_id,
            must_queue: false,
            has_callback: false,
        });
    }

    fn post_envelope(&self, envelope: Envelope) {
        trace!(
            id = %envelope.id,
            kind = envelope.kind.label(),
            target_map_id = ?envelope.target_map_id,
            "Posting envelope"
        );
        self.target.post_message(envelope);
    }

    fn accepts_origin(&self, origin: &str) -> bool {
        origin == self.origin
            || self.trusted_origins.iter().any(|trusted| trusted == origin)
            || self.trusted_origins.iter().any(|trusted| *trusted == self.origin)
    }

    /// Entry point for every envelope arriving from the target.
    fn receive(self: &Arc<Self>, envelope: Envelope) {
        if !self.accepts_origin(&envelope.origin) {
            debug!(
                id = %envelope.id,
                origin = %envelope.origin,
                expected = %self.origin,
                "Dropping envelope from foreign origin"
            );
            return;
        }
        if let Some(target) = &envelope.target_map_id {
            if self.map_id.as_ref() != Some(target) {
                trace!(
                    id = %envelope.id,
                    target_map_id = %target,
                    map_id = ?self.map_id,
                    "Ignoring envelope addressed to another map"
                );
                return;
            }
        }

        if matches!(envelope.kind, MessageKind::Cancel) {
            self.cancel_task(envelope.id);
            return;
        }

        if self.mode == ProcessingMode::Queued || envelope.must_queue {
            self.queue.lock().push(envelope);
            self.invoker.trigger();
            return;
        }
        self.process_task(envelope, None);
    }

    fn cancel_task(&self, id: CorrelationId) {
        let dequeued = self.queue.lock().cancel(id);
        let token = self.running.lock().remove(&id);
        debug!(
            id = %id,
            map_id = ?self.map_id,
            dequeued,
            running = token.is_some(),
            "Received cancel"
        );
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Drain one queued task. Called by the throttled invoker.
    fn process(self: &Arc<Self>) {
        let Some((task, more)) = self.claim_next() else {
            return;
        };
        // Reschedule before running so a failing task cannot stall the queue.
        if more {
            self.invoker.trigger();
        }
        if let Some((task, token)) = task {
            self.process_task(task, token);
        }
    }

    /// Pop the next queued task. A request gets its cancel token registered before
    /// the queue lock is released, so its id is always either queued or running.
    fn claim_next(&self) -> Option<(Option<(Envelope, Option<CancellationToken>)>, bool)> {
        let mut queue = self.queue.lock();
        let (task, more) = queue.pop()?;
        let task = task.map(|task| {
            let token = matches!(task.kind, MessageKind::Request { .. }).then(|| {
                let token = CancellationToken::new();
                self.running.lock().insert(task.id, token.clone());
                token
            });
            (task, token)
        });
        Some((task, more))
    }

    fn process_task(self: &Arc<Self>, envelope: Envelope, claimed: Option<CancellationToken>) {
        let Envelope {
            id,
            kind,
            source_map_id,
            has_callback,
            ..
        } = envelope;
        match kind {
            MessageKind::Response(result) => match self.pending.take(id) {
                Some(completion) => {
                    let _ = completion.send(result);
                }
                None => trace!(id = %id, "Response for a cancelled or settled request"),
            },
            MessageKind::Request { operation, payload } => {
                let Some(handler) = self.handlers.get(operation) else {
                    let available = self.handlers.names();
                    warn!(
                        id = %id,
                        operation = %operation,
                        map_id = ?self.map_id,
                        available = %available.join(", "),
                        "No handler registered"
                    );
                    let error = RemoteError::NoHandler {
                        operation: operation.as_str().to_string(),
                        map_id: self.map_id.clone(),
                        available,
                    };
                    self.complete_task(id, source_map_id, has_callback, Err(error));
                    return;
                };

                let token = claimed.unwrap_or_else(|| {
                    let token = CancellationToken::new();
                    self.running.lock().insert(id, token.clone());
                    token
                });
                if token.is_cancelled() {
                    debug!(id = %id, operation = %operation, "Task cancelled before it started");
                    self.running.lock().remove(&id);
                    return;
                }
                let actor = Arc::clone(self);
                let source = source_map_id.clone();
                self.runtime.spawn(async move {
                    let result = handler(source, payload, token).await;
                    if let Err(err) = &result {
                        debug!(id = %id, operation = %operation, error = %err, "Handler failed");
                    }
                    actor.complete_task(id, source_map_id, has_callback, result);
                });
            }
            MessageKind::Cancel => self.cancel_task(id),
        }
    }

    fn complete_task(
        &self,
        id: CorrelationId,
        reply_to: Option<MapId>,
        has_callback: bool,
        result: Result<Payload, RemoteError>,
    ) {
        self.running.lock().remove(&id);
        if has_callback {
            self.post(id, MessageKind::Response(result), reply_to);
        }
    }

    pub(crate) fn cancel_request(&self, id: CorrelationId, target_map_id: Option<MapId>) {
        self.pending.take(id);
        debug!(id = %id, map_id = ?self.map_id, "Cancelling request");
        self.post(id, MessageKind::Cancel, target_map_id);
    }

    fn shutdown(&self) {
        self.invoker.remove();
        self.pending.clear();
        for (_, token) in self.running.lock().drain() {
            token.cancel();
        }
    }
}

/// One endpoint of the request/response protocol.
pub struct Actor {
    inner: Arc<ActorInner>,
    listener: JoinHandle<()>,
}

impl Actor {
    /// Create an actor on the current Tokio runtime.
    pub fn new(
        target: Arc<dyn ActorTarget>,
        map_id: Option<MapId>,
        mode: ProcessingMode,
        config: &ActorConfig,
    ) -> Result<Self, ActorError> {
        let runtime = Handle::try_current().map_err(|_| ActorError::NoRuntime)?;
        Ok(Self::with_runtime(runtime, target, map_id, mode, config))
    }

    /// Create an actor whose listener and handlers run on `runtime`.
    pub fn with_runtime(
        runtime: Handle,
        target: Arc<dyn ActorTarget>,
        map_id: Option<MapId>,
        mode: ProcessingMode,
        config: &ActorConfig,
    ) -> Self {
        let mut incoming = target.listen();
        let inner = Arc::new_cyclic(|weak: &Weak<ActorInner>| {
            let drain = weak.clone();
            let invoker = ThrottledInvoker::new(&runtime, move || match drain.upgrade() {
                Some(actor) => {
                    actor.process();
                    true
                }
                None => false,
            });
            ActorInner {
                target,
                map_id,
                origin: config.origin.clone(),
                trusted_origins: config.trusted_origins.clone(),
                mode,
                runtime: runtime.clone(),
                pending: CorrelationRegistry::default(),
                queue: Mutex::new(TaskQueue::default()),
                running: Mutex::new(HashMap::new()),
                handlers: HandlerRegistry::default(),
                invoker,
            }
        });

        let weak = Arc::downgrade(&inner);
        let listener = runtime.spawn(async move {
            while let Some(envelope) = incoming.recv().await {
                let Some(actor) = weak.upgrade() else {
                    break;
                };
                actor.receive(envelope);
            }
        });

        debug!(map_id = ?inner.map_id, mode = ?mode, "Actor created");
        Self { inner, listener }
    }

    pub fn map_id(&self) -> Option<&MapId> {
        self.inner.map_id.as_ref()
    }

    pub fn mode(&self) -> ProcessingMode {
        self.inner.mode
    }

    /// Register the handler for `R`. Each operation takes exactly one handler.
    ///
    /// The handler receives the sender's map id, the decoded request and a token that
    /// is cancelled if the sender cancels the request.
    pub fn register_handler<R, F, Fut>(&self, handler: F) -> Result<(), ActorError>
    where
        R: Request,
        F: Fn(Option<MapId>, R, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R::Response>> + Send + 'static,
    {
        self.inner.handlers.register::<R, F, Fut>(handler)
    }

    /// Send a request and get a future for its response.
    pub fn send<R: Request>(&self, params: R, options: SendOptions) -> SendHandle<R::Response> {
        let (completion, receiver) = oneshot::channel();
        let id = self.inner.pending.register(completion);
        let abort = AbortHandle::new(
            Arc::downgrade(&self.inner),
            id,
            options.target_map_id.clone(),
        );

        let payload = match Payload::encode(params) {
            Ok(payload) => payload,
            Err(err) => {
                self.inner.pending.take(id);
                return SendHandle::failed(id, err.into(), abort);
            }
        };

        self.inner.post_envelope(Envelope {
            id,
            kind: MessageKind::Request {
                operation: R::OPERATION,
                payload,
            },
            origin: self.inner.origin.clone(),
            source_map_id: self.inner.map_id.clone(),
            target_map_id: options.target_map_id,
            must_queue: options.must_queue,
            has_callback: true,
        });
        SendHandle::waiting(id, receiver, abort)
    }

    /// Send a request with default routing.
    pub fn request<R: Request>(&self, params: R) -> SendHandle<R::Response> {
        self.send(params, SendOptions::default())
    }

    /// Fire-and-forget: the receiver runs the handler but sends no response.
    pub fn notify<R: Request>(&self, params: R, options: SendOptions) -> Result<(), ActorError> {
        let payload = Payload::encode(params)?;
        self.inner.post_envelope(Envelope {
            id: CorrelationId::random(),
            kind: MessageKind::Request {
                operation: R::OPERATION,
                payload,
            },
            origin: self.inner.origin.clone(),
            source_map_id: self.inner.map_id.clone(),
            target_map_id: options.target_map_id,
            must_queue: options.must_queue,
            has_callback: false,
        });
        Ok(())
    }

    /// Feed an envelope as if it had arrived from the target.
    pub fn receive(&self, envelope: Envelope) {
        self.inner.receive(envelope);
    }

    /// Requests sent by this actor still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Received tasks not yet drained by the scheduler.
    pub fn queued_tasks(&self) -> usize {
        self.inner.queue.lock().tasks.len()
    }

    /// Handlers currently running.
    pub fn running_tasks(&self) -> usize {
        self.inner.running.lock().len()
    }

    /// Stop listening and drop all pending state. Outstanding sends resolve with
    /// [`ActorError::Disconnected`].
    pub fn remove(&self) {
        self.listener.abort();
        self.inner.shutdown();
        debug!(map_id = ?self.inner.map_id, "Actor removed");
    }
}

impl Drop for Actor {
    fn drop(&mut self) {
        self.remove();
    }
}
