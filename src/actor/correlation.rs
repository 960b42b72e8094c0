//! Correlation ids and the registry of requests awaiting a response.

use crate::actor::message::RemoteError;
use crate::transfer::Payload;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::oneshot;

/// Opaque id linking a request to its response.
///
/// Ids are random rather than sequential: one actor can receive traffic from
/// several independent senders sharing a channel, and counters would collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub fn random() -> Self {
        CorrelationId(rand::thread_rng().gen())
    }

    pub fn from_raw(raw: u64) -> Self {
        CorrelationId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

pub(crate) type Completion = oneshot::Sender<Result<Payload, RemoteError>>;

/// Pending requests keyed by correlation id.
#[derive(Default)]
pub(crate) struct CorrelationRegistry {
    pending: Mutex<HashMap<CorrelationId, Completion>>,
}

impl CorrelationRegistry {
    /// Allocate a fresh id and park `completion` under it.
    pub(crate) fn register(&self, completion: Completion) -> CorrelationId {
        let mut pending = self.pending.lock();
        let mut id = CorrelationId::random();
        while pending.contains_key(&id) {
            id = CorrelationId::random();
        }
        pending.insert(id, completion);
        id
    }

    /// Remove the entry for `id`, if it is still waiting.
    pub(crate) fn take(&self, id: CorrelationId) -> Option<Completion> {
        self.pending.lock().remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.pending.lock().clear();
    }
}
