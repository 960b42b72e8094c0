//! Error types for the worker RPC substrate.

use crate::protocol::Operation;
use crate::types::MapId;
use thiserror::Error;

/// Payload encoding errors
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Failed to encode payload: {0}")]
    Encode(String),

    #[error("Failed to decode payload: {0}")]
    Decode(String),

    #[error("Transfer buffer count mismatch: expected {expected}, got {actual}")]
    BufferCount { expected: usize, actual: usize },
}

impl From<bincode::Error> for TransferError {
    fn from(err: bincode::Error) -> Self {
        TransferError::Decode(err.to_string())
    }
}

/// Errors surfaced to callers of an actor
#[derive(Debug, Error)]
pub enum ActorError {
    #[error(
        "Could not find a registered handler for {operation}, map ID: {}, available handlers: {available}",
        map_id.as_ref().map(MapId::as_str).unwrap_or("none")
    )]
    NoHandler {
        operation: String,
        map_id: Option<MapId>,
        available: String,
    },

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("A handler is already registered for {0}")]
    DuplicateHandler(Operation),

    #[error("Actor disconnected before a response arrived")]
    Disconnected,

    #[error("Actors must be created from within a Tokio runtime")]
    NoRuntime,

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),
}

/// Worker pool lifecycle errors
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool must have at least one worker")]
    ZeroWorkers,

    #[error("Failed to spawn worker context: {0}")]
    Spawn(String),

    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),
}

/// Configuration and logging setup errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Configuration validation failed:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}
