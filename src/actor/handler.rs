//! Registry of typed operation handlers.

use crate::actor::message::RemoteError;
use crate::error::ActorError;
use crate::protocol::{Operation, Request};
use crate::transfer::Payload;
use crate::types::MapId;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) type BoxedHandler = Arc<
    dyn Fn(Option<MapId>, Payload, CancellationToken) -> BoxFuture<'static, Result<Payload, RemoteError>>
        + Send
        + Sync,
>;

/// Erase a typed handler into one that speaks payloads.
///
/// Decode failures, handler errors and handler panics all become [`RemoteError`]s
/// so they travel back to the caller instead of stopping the receiving actor.
fn erase<R, F, Fut>(handler: F) -> BoxedHandler
where
    R: Request,
    F: Fn(Option<MapId>, R, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R::Response>> + Send + 'static,
{
    Arc::new(move |source, payload, token| {
        let params = match payload.decode::<R>() {
            Ok(params) => params,
            Err(err) => return future::ready(Err(RemoteError::Transfer(err.to_string()))).boxed(),
        };
        let running = match panic::catch_unwind(AssertUnwindSafe(|| handler(source, params, token))) {
            Ok(running) => running,
            Err(panic) => return future::ready(Err(panicked(panic))).boxed(),
        };
        async move {
            match AssertUnwindSafe(running).catch_unwind().await {
                Ok(Ok(response)) => {
                    Payload::encode(response).map_err(|e| RemoteError::Transfer(e.to_string()))
                }
                Ok(Err(err)) => Err(RemoteError::Handler(format!("{err:#}"))),
                Err(panic) => Err(panicked(panic)),
            }
        }
        .boxed()
    })
}

fn panicked(panic: Box<dyn Any + Send>) -> RemoteError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    RemoteError::Handler(format!("handler panicked: {message}"))
}

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: RwLock<HashMap<Operation, BoxedHandler>>,
}

impl HandlerRegistry {
    pub(crate) fn register<R, F, Fut>(&self, handler: F) -> Result<(), ActorError>
    where
        R: Request,
        F: Fn(Option<MapId>, R, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R::Response>> + Send + 'static,
    {
        match self.handlers.write().entry(R::OPERATION) {
            Entry::Occupied(_) => Err(ActorError::DuplicateHandler(R::OPERATION)),
            Entry::Vacant(slot) => {
                slot.insert(erase::<R, F, Fut>(handler));
                Ok(())
            }
        }
    }

    pub(crate) fn get(&self, operation: Operation) -> Option<BoxedHandler> {
        self.handlers.read().get(&operation).cloned()
    }

    /// Registered operation names, sorted.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut operations: Vec<Operation> = self.handlers.read().keys().copied().collect();
        operations.sort();
        operations.iter().map(|op| op.as_str().to_string()).collect()
    }
}
