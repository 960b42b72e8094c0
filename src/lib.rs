//! Tilework: worker-pool RPC and tile invalidation for map rendering
//!
//! A coordinator talks to a fixed pool of worker contexts through actors that
//! multiplex typed, cancellable requests over one message channel per worker. The
//! tile bitmask records which regions of the tile pyramid changed so only affected
//! tiles are reloaded.

pub mod actor;
pub mod bitmask;
pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod tile;
pub mod transfer;
pub mod types;
