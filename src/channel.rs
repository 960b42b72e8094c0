//! Message Channel
//!
//! In-process analogue of the boundary between the coordinator and a worker
//! context. A [`MessageChannel`] yields two connected [`MessagePort`]s; whatever one
//! port posts arrives at every listener of the other. Several coordinator actors
//! (one per map instance) may listen on the same worker port, which is why
//! envelopes carry a target map id.
//!
//! Envelopes posted before the peer has ever listened are held and handed to the
//! first listener, so a worker that is still starting up misses nothing.

use crate::actor::message::Envelope;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::trace;

/// Endpoint an actor talks through.
pub trait ActorTarget: Send + Sync + 'static {
    /// Deliver `envelope` to the other side.
    fn post_message(&self, envelope: Envelope);

    /// Subscribe to envelopes arriving from the other side.
    fn listen(&self) -> UnboundedReceiver<Envelope>;
}

#[derive(Default)]
struct Inbox {
    listeners: Vec<UnboundedSender<Envelope>>,
    backlog: Vec<Envelope>,
    attached_once: bool,
    closed: bool,
}

impl Inbox {
    fn deliver(&mut self, envelope: Envelope) {
        if self.closed {
            trace!(id = %envelope.id, "Dropping envelope posted to a closed port");
            return;
        }
        self.listeners.retain(|listener| !listener.is_closed());
        let Some((last, rest)) = self.listeners.split_last() else {
            if !self.attached_once {
                self.backlog.push(envelope);
            }
            return;
        };
        for listener in rest {
            let _ = listener.send(envelope.clone());
        }
        let _ = last.send(envelope);
    }

    fn attach(&mut self) -> UnboundedReceiver<Envelope> {
        let (tx, rx) = unbounded_channel();
        if !self.closed {
            for envelope in self.backlog.drain(..) {
                let _ = tx.send(envelope);
            }
            self.listeners.push(tx);
            self.attached_once = true;
        }
        rx
    }

    fn close(&mut self) {
        self.closed = true;
        self.listeners.clear();
        self.backlog.clear();
    }
}

/// One end of a [`MessageChannel`]. Cloning yields another handle to the same end.
#[derive(Clone)]
pub struct MessagePort {
    local: Arc<Mutex<Inbox>>,
    remote: Arc<Mutex<Inbox>>,
}

impl MessagePort {
    /// Close both directions. Listeners see their streams end; later posts are dropped.
    pub fn close(&self) {
        self.local.lock().close();
        self.remote.lock().close();
    }

    pub fn is_closed(&self) -> bool {
        self.local.lock().closed
    }

    /// Number of live listeners on this end.
    pub fn listener_count(&self) -> usize {
        let mut local = self.local.lock();
        local.listeners.retain(|listener| !listener.is_closed());
        local.listeners.len()
    }
}

impl ActorTarget for MessagePort {
    fn post_message(&self, envelope: Envelope) {
        self.remote.lock().deliver(envelope);
    }

    fn listen(&self) -> UnboundedReceiver<Envelope> {
        self.local.lock().attach()
    }
}

/// A pair of connected ports.
pub struct MessageChannel {
    pub port1: MessagePort,
    pub port2: MessagePort,
}

impl MessageChannel {
    pub fn new() -> Self {
        let a = Arc::new(Mutex::new(Inbox::default()));
        let b = Arc::new(Mutex::new(Inbox::default()));
        Self {
            port1: MessagePort {
                local: Arc::clone(&a),
                remote: Arc::clone(&b),
            },
            port2: MessagePort {
                local: b,
                remote: a,
            },
        }
    }

    pub fn into_ports(self) -> (MessagePort, MessagePort) {
        (self.port1, self.port2)
    }
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}
