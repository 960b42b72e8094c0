//! Envelope carried between two actor endpoints.

use crate::actor::correlation::CorrelationId;
use crate::error::ActorError;
use crate::protocol::Operation;
use crate::transfer::Payload;
use crate::types::MapId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What an envelope asks the receiving actor to do.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// Run the handler registered for `operation`.
    Request {
        operation: Operation,
        payload: Payload,
    },
    /// Drop the queued task or cancel the running handler with the same id.
    Cancel,
    /// Settle the pending request with the same id.
    Response(Result<Payload, RemoteError>),
}

impl MessageKind {
    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::Request { operation, .. } => operation.as_str(),
            MessageKind::Cancel => "<cancel>",
            MessageKind::Response(_) => "<response>",
        }
    }
}

/// Unit of cross-context communication.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: CorrelationId,
    pub kind: MessageKind,
    pub origin: String,
    pub source_map_id: Option<MapId>,
    pub target_map_id: Option<MapId>,
    pub must_queue: bool,
    pub has_callback: bool,
}

/// Why a remote request failed, in a form that survives the context boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteError {
    NoHandler {
        operation: String,
        map_id: Option<MapId>,
        available: Vec<String>,
    },
    Handler(String),
    Transfer(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::NoHandler { operation, .. } => {
                write!(f, "no handler registered for {}", operation)
            }
            RemoteError::Handler(message) => f.write_str(message),
            RemoteError::Transfer(message) => write!(f, "transfer failed: {}", message),
        }
    }
}

impl From<RemoteError> for ActorError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NoHandler {
                operation,
                map_id,
                available,
            } => ActorError::NoHandler {
                operation,
                map_id,
                available: available.join(", "),
            },
            RemoteError::Handler(message) => ActorError::Handler(message),
            RemoteError::Transfer(message) => {
                ActorError::Transfer(crate::error::TransferError::Decode(message))
            }
        }
    }
}
