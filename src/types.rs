//! Shared identifiers used across the actor, pool and dispatcher layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one logical map instance.
///
/// Several map instances may share one physical worker context; the id is what
/// keeps their traffic apart on the shared channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapId(String);

impl MapId {
    const PRELOAD: &'static str = "preload";

    pub fn new(id: impl Into<String>) -> Self {
        MapId(id.into())
    }

    /// Pseudo instance that keeps the worker pool warm between real maps.
    pub fn preload() -> Self {
        MapId(Self::PRELOAD.to_string())
    }

    pub fn is_preload(&self) -> bool {
        self.0 == Self::PRELOAD
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MapId {
    fn from(value: &str) -> Self {
        MapId(value.to_string())
    }
}

impl From<String> for MapId {
    fn from(value: String) -> Self {
        MapId(value)
    }
}

impl From<u64> for MapId {
    fn from(value: u64) -> Self {
        MapId(value.to_string())
    }
}
