//! Tile Bitmask
//!
//! A sparse quadtree over tile coordinates recording which regions of a data source
//! have been invalidated. Incremental source updates mark every tile a changed feature
//! touches, then ask [`TileBitmask::is_marked`] which loaded tiles need a reload.
//!
//! Each entry is keyed by a packed `(zoom, x, y)` coordinate and tagged either
//! [`Composition::Marked`] (the whole region is invalidated) or
//! [`Composition::Mixed`] (some descendants are). The tree keeps three invariants:
//!
//! - a marked node has no descendant entries;
//! - four marked siblings are collapsed into a marked parent;
//! - every ancestor of an entry has an entry of its own.
//!
//! Zooms deeper than [`TileBitmask::MAX_ZOOM`] are coarsened to it on insert.

use crate::tile::CanonicalTileId;
use crate::transfer::Transferable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TREE_DEPTH: u32 = 7;
const COORD_MASK: u32 = (1 << TREE_DEPTH) - 1;

fn pack_tile_coord(zoom: u8, x: u32, y: u32) -> u32 {
    (u32::from(zoom) << (2 * TREE_DEPTH)) | ((x & COORD_MASK) << TREE_DEPTH) | (y & COORD_MASK)
}

fn unpack_tile_coord(key: u32) -> CanonicalTileId {
    CanonicalTileId::new(
        (key >> (2 * TREE_DEPTH)) as u8,
        (key >> TREE_DEPTH) & COORD_MASK,
        key & COORD_MASK,
    )
}

fn zoomed(coord: u32, from_zoom: u8, to_zoom: u8) -> u32 {
    coord
        .checked_shr(u32::from(from_zoom - to_zoom))
        .unwrap_or(0)
}

/// Composition tag stored per quadtree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Composition {
    Mixed = 0,
    Marked = 1,
}

impl Composition {
    fn from_bits(bits: u32) -> Self {
        if bits & 3 == Composition::Marked as u32 {
            Composition::Marked
        } else {
            Composition::Mixed
        }
    }
}

/// Flat packed form of a bitmask, one integer per entry.
pub type SerializedTileBitmask = Vec<i32>;

/// Stores a mask of tile coordinates as a quadtree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "SerializedTileBitmask", from = "SerializedTileBitmask")]
pub struct TileBitmask {
    tree: HashMap<u32, Composition>,
}

impl TileBitmask {
    /// Deepest zoom tracked by the tree, inclusive.
    pub const MAX_ZOOM: u8 = (TREE_DEPTH - 1) as u8;
    /// Tiles along one axis at [`Self::MAX_ZOOM`].
    pub const MAX_ZOOM_TILES: u32 = 1 << Self::MAX_ZOOM;

    pub fn new() -> Self {
        Self::default()
    }

    /// Number of explicit entries, mixed and marked.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Whether `tile` lies in an invalidated region.
    ///
    /// A tile whose own node exists is reported as marked even when the node is only
    /// mixed: some of its descendants changed, so its content is stale.
    ///
    /// `tile` must lie inside its zoom's grid. Out-of-grid coordinates wrap onto the
    /// grid in release builds.
    pub fn is_marked(&self, tile: CanonicalTileId) -> bool {
        debug_assert!(tile.is_valid(), "tile {} is outside its zoom's grid", tile);
        let depth = tile.z.min(Self::MAX_ZOOM);
        for z in 0..depth {
            let key = pack_tile_coord(z, zoomed(tile.x, tile.z, z), zoomed(tile.y, tile.z, z));
            match self.tree.get(&key) {
                None => return false,
                Some(Composition::Marked) => return true,
                Some(Composition::Mixed) => {}
            }
        }
        let key = pack_tile_coord(
            depth,
            zoomed(tile.x, tile.z, depth),
            zoomed(tile.y, tile.z, depth),
        );
        self.tree.contains_key(&key)
    }

    /// Mark the region covered by `(zoom, x, y)`.
    ///
    /// Same grid requirement as [`Self::is_marked`].
    pub fn mark(&mut self, zoom: u8, x: u32, y: u32) {
        debug_assert!(
            CanonicalTileId::new(zoom, x, y).is_valid(),
            "tile {}/{}/{} is outside its zoom's grid",
            zoom,
            x,
            y
        );
        let insert_zoom = zoom.min(Self::MAX_ZOOM);
        for z in 0..insert_zoom {
            let key = pack_tile_coord(z, zoomed(x, zoom, z), zoomed(y, zoom, z));
            match self.tree.get(&key) {
                // Subtree already covered.
                Some(Composition::Marked) => return,
                Some(Composition::Mixed) => {}
                None => {
                    self.tree.insert(key, Composition::Mixed);
                }
            }
        }

        let target_x = zoomed(x, zoom, insert_zoom);
        let target_y = zoomed(y, zoom, insert_zoom);
        let key = pack_tile_coord(insert_zoom, target_x, target_y);
        if self.tree.get(&key) == Some(&Composition::Marked) {
            return;
        }
        self.tree.insert(key, Composition::Marked);
        self.clear_descendants(insert_zoom, target_x, target_y);
        self.compact_ancestors(insert_zoom, target_x, target_y);
    }

    /// Mark a tile by its canonical id.
    pub fn mark_tile(&mut self, tile: CanonicalTileId) {
        self.mark(tile.z, tile.x, tile.y);
    }

    /// Remove every entry below `(zoom, x, y)`; they are implied by a marked parent.
    fn clear_descendants(&mut self, zoom: u8, x: u32, y: u32) {
        if zoom >= Self::MAX_ZOOM {
            return;
        }
        let root_x = x << 1;
        let root_y = y << 1;
        for child_x in root_x..=root_x + 1 {
            for child_y in root_y..=root_y + 1 {
                if self
                    .tree
                    .remove(&pack_tile_coord(zoom + 1, child_x, child_y))
                    .is_some()
                {
                    self.clear_descendants(zoom + 1, child_x, child_y);
                }
            }
        }
    }

    /// Collapse four marked siblings into a marked parent, repeating upwards.
    fn compact_ancestors(&mut self, mut zoom: u8, mut x: u32, mut y: u32) {
        while zoom > 0 {
            let root_x = x & !1;
            let root_y = y & !1;
            let siblings = [
                pack_tile_coord(zoom, root_x, root_y),
                pack_tile_coord(zoom, root_x + 1, root_y),
                pack_tile_coord(zoom, root_x, root_y + 1),
                pack_tile_coord(zoom, root_x + 1, root_y + 1),
            ];
            if !siblings
                .iter()
                .all(|key| self.tree.get(key) == Some(&Composition::Marked))
            {
                return;
            }
            for key in &siblings {
                self.tree.remove(key);
            }
            zoom -= 1;
            x >>= 1;
            y >>= 1;
            self.tree
                .insert(pack_tile_coord(zoom, x, y), Composition::Marked);
        }
    }

    /// Every definitively marked tile. Slow; meant for debugging.
    pub fn marked_tiles(&self) -> Vec<CanonicalTileId> {
        let mut tiles: Vec<CanonicalTileId> = self
            .tree
            .iter()
            .filter(|(_, composition)| **composition == Composition::Marked)
            .map(|(key, _)| unpack_tile_coord(*key))
            .collect();
        tiles.sort();
        tiles
    }

    /// Pack each entry into one integer: `key << 2 | composition`.
    pub fn serialize(&self) -> SerializedTileBitmask {
        let mut packed: Vec<i32> = self
            .tree
            .iter()
            .map(|(key, composition)| ((key << 2) | *composition as u32) as i32)
            .collect();
        packed.sort_unstable();
        packed
    }

    pub fn deserialize(packed: &[i32]) -> Self {
        let tree = packed
            .iter()
            .map(|value| {
                let value = *value as u32;
                (value >> 2, Composition::from_bits(value))
            })
            .collect();
        Self { tree }
    }
}

impl From<TileBitmask> for SerializedTileBitmask {
    fn from(bitmask: TileBitmask) -> Self {
        bitmask.serialize()
    }
}

impl From<SerializedTileBitmask> for TileBitmask {
    fn from(packed: SerializedTileBitmask) -> Self {
        TileBitmask::deserialize(&packed)
    }
}

impl Transferable for TileBitmask {}
