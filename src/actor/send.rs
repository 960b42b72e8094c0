//! Caller side of a request: the future that settles with the response, and the
//! handle that cancels it.

use crate::actor::correlation::CorrelationId;
use crate::actor::message::RemoteError;
use crate::actor::ActorInner;
use crate::error::ActorError;
use crate::transfer::{Payload, Transferable};
use crate::types::MapId;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Routing options for one send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Only the actor with this map id on the far side will handle the message.
    pub target_map_id: Option<MapId>,
    /// Force the receiver to queue the message even if it normally processes inline.
    pub must_queue: bool,
}

impl SendOptions {
    pub fn to(map_id: MapId) -> Self {
        Self {
            target_map_id: Some(map_id),
            must_queue: false,
        }
    }

    pub fn queued(mut self) -> Self {
        self.must_queue = true;
        self
    }
}

/// Cancels an in-flight request. Cheap to clone; only the first call has an effect.
#[derive(Clone)]
pub struct AbortHandle {
    actor: Weak<ActorInner>,
    id: CorrelationId,
    target_map_id: Option<MapId>,
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub(crate) fn new(
        actor: Weak<ActorInner>,
        id: CorrelationId,
        target_map_id: Option<MapId>,
    ) -> Self {
        Self {
            actor,
            id,
            target_map_id,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Drop the local completion and tell the remote side to stop.
    ///
    /// The request's future never settles afterwards; a late response is ignored.
    pub fn abort(&self) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(actor) = self.actor.upgrade() {
            actor.cancel_request(self.id, self.target_map_id.clone());
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

enum HandleState {
    Waiting(oneshot::Receiver<Result<Payload, RemoteError>>),
    Failed(Option<ActorError>),
}

/// Future for the response to one request.
///
/// Resolves with the decoded response or the remote failure. Once cancelled it stays
/// pending forever: cancellation is silence, not an error.
pub struct SendHandle<T> {
    id: CorrelationId,
    state: HandleState,
    abort: AbortHandle,
    _response: PhantomData<fn() -> T>,
}

impl<T> SendHandle<T> {
    pub(crate) fn waiting(
        id: CorrelationId,
        receiver: oneshot::Receiver<Result<Payload, RemoteError>>,
        abort: AbortHandle,
    ) -> Self {
        Self {
            id,
            state: HandleState::Waiting(receiver),
            abort,
            _response: PhantomData,
        }
    }

    pub(crate) fn failed(id: CorrelationId, error: ActorError, abort: AbortHandle) -> Self {
        Self {
            id,
            state: HandleState::Failed(Some(error)),
            abort,
            _response: PhantomData,
        }
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

impl<T> Future for SendHandle<T>
where
    T: DeserializeOwned + Transferable,
{
    type Output = Result<T, ActorError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.abort.is_aborted() {
            return Poll::Pending;
        }
        match &mut this.state {
            HandleState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(ActorError::Disconnected)))
            }
            HandleState::Waiting(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(Ok(payload))) => {
                    Poll::Ready(payload.decode::<T>().map_err(ActorError::from))
                }
                Poll::Ready(Ok(Err(remote))) => Poll::Ready(Err(remote.into())),
                Poll::Ready(Err(_)) if this.abort.is_aborted() => Poll::Pending,
                Poll::Ready(Err(_)) => Poll::Ready(Err(ActorError::Disconnected)),
            },
        }
    }
}
