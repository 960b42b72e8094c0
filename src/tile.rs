//! Canonical tile coordinates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(zoom, x, y)` address of one tile in the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalTileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl CanonicalTileId {
    pub const fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Whether `x` and `y` fit in the `2^z` grid of this zoom.
    pub fn is_valid(&self) -> bool {
        let dim = 1u64 << self.z.min(32);
        u64::from(self.x) < dim && u64::from(self.y) < dim
    }

    pub fn parent(&self) -> Option<Self> {
        if self.z == 0 {
            return None;
        }
        Some(Self::new(self.z - 1, self.x >> 1, self.y >> 1))
    }

    /// The four tiles one zoom deeper, or `None` when they do not fit the coordinate
    /// types.
    pub fn children(&self) -> Option<[Self; 4]> {
        let z = self.z.checked_add(1)?;
        let x = self.x.checked_mul(2)?;
        let y = self.y.checked_mul(2)?;
        // x and y are even here, so the +1 cannot overflow.
        Some([
            Self::new(z, x, y),
            Self::new(z, x + 1, y),
            Self::new(z, x, y + 1),
            Self::new(z, x + 1, y + 1),
        ])
    }

    /// This tile's ancestor at `zoom`, or itself when `zoom` is not shallower.
    pub fn scaled_to(&self, zoom: u8) -> Self {
        if zoom >= self.z {
            return *self;
        }
        let shift = u32::from(self.z - zoom);
        Self::new(zoom, self.x >> shift, self.y >> shift)
    }
}

impl fmt::Display for CanonicalTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}
