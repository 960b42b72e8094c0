//! Operation Protocol
//!
//! The closed set of operations exchanged between the coordinator and worker
//! contexts. Every operation has one typed request and one typed response; the
//! [`Request`] trait ties them together so handler registration and sends are
//! checked at compile time.
//!
//! Request bodies are interface types only. The loaders that give them meaning
//! (vector tile parsing, GeoJSON indexing, DEM decoding) live outside this crate.

use crate::bitmask::TileBitmask;
use crate::error::TransferError;
use crate::tile::CanonicalTileId;
use crate::transfer::{expect_buffers, TransferBuffer, Transferable};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every operation an actor can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    LoadTile,
    ReloadTile,
    AbortTile,
    RemoveTile,
    RemoveSource,
    LoadDemTile,
    RemoveDemTile,
    LoadGeoJson,
    GetClusterExpansionZoom,
    GetClusterChildren,
    GetClusterLeaves,
    SetReferrer,
    SetImages,
    SetLayers,
    UpdateLayers,
    SyncRtlPluginState,
    LoadWorkerSource,
    GetResource,
    GetImages,
    GetGlyphs,
}

impl Operation {
    /// Stable name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::LoadTile => "loadTile",
            Operation::ReloadTile => "reloadTile",
            Operation::AbortTile => "abortTile",
            Operation::RemoveTile => "removeTile",
            Operation::RemoveSource => "removeSource",
            Operation::LoadDemTile => "loadDEMTile",
            Operation::RemoveDemTile => "removeDEMTile",
            Operation::LoadGeoJson => "geojson.loadData",
            Operation::GetClusterExpansionZoom => "geojson.getClusterExpansionZoom",
            Operation::GetClusterChildren => "geojson.getClusterChildren",
            Operation::GetClusterLeaves => "geojson.getClusterLeaves",
            Operation::SetReferrer => "setReferrer",
            Operation::SetImages => "setImages",
            Operation::SetLayers => "setLayers",
            Operation::UpdateLayers => "updateLayers",
            Operation::SyncRtlPluginState => "syncRTLPluginState",
            Operation::LoadWorkerSource => "loadWorkerSource",
            Operation::GetResource => "getResource",
            Operation::GetImages => "getImages",
            Operation::GetGlyphs => "getGlyphs",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed request bound to exactly one [`Operation`].
pub trait Request: Serialize + DeserializeOwned + Transferable + Send + 'static {
    const OPERATION: Operation;
    type Response: Serialize + DeserializeOwned + Transferable + Send + 'static;
}

/// Identifies one tile of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileParameters {
    pub source: String,
    pub source_type: String,
    pub uid: u64,
    pub tile_id: CanonicalTileId,
}

impl Transferable for TileParameters {}

/// Request to fetch and parse a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTileParameters {
    pub tile: TileParameters,
    pub url: Option<String>,
    pub tile_size: u32,
    pub pixel_ratio: f32,
    pub overscaling: u32,
    pub collect_resource_timing: bool,
}

impl Transferable for WorkerTileParameters {}

/// Parsed tile returned to the coordinator; `buckets` carries the packed geometry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerTileResult {
    pub buckets: TransferBuffer,
    pub feature_index: TransferBuffer,
    pub glyph_atlas: Option<TransferBuffer>,
    pub layer_ids: Vec<String>,
}

impl Transferable for WorkerTileResult {
    fn detach_buffers(&mut self) -> Vec<Bytes> {
        let mut buffers = self.buckets.detach_buffers();
        buffers.extend(self.feature_index.detach_buffers());
        buffers.extend(self.glyph_atlas.detach_buffers());
        buffers
    }

    fn attach_buffers(&mut self, buffers: Vec<Bytes>) -> Result<(), TransferError> {
        let expected = if self.glyph_atlas.is_some() { 3 } else { 2 };
        expect_buffers(&buffers, expected)?;
        let mut buffers = buffers.into_iter();
        self.buckets.restore(buffers.next().unwrap_or_default());
        self.feature_index.restore(buffers.next().unwrap_or_default());
        if let Some(atlas) = self.glyph_atlas.as_mut() {
            atlas.restore(buffers.next().unwrap_or_default());
        }
        Ok(())
    }
}

/// Raw DEM image to decode on a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemTileParameters {
    pub tile: TileParameters,
    pub encoding: String,
    pub width: u32,
    pub height: u32,
    pub pixels: TransferBuffer,
}

impl Transferable for DemTileParameters {
    fn detach_buffers(&mut self) -> Vec<Bytes> {
        self.pixels.detach_buffers()
    }

    fn attach_buffers(&mut self, buffers: Vec<Bytes>) -> Result<(), TransferError> {
        self.pixels.attach_buffers(buffers)
    }
}

/// Decoded elevation data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemData {
    pub uid: u64,
    pub dim: u32,
    pub elevations: TransferBuffer,
}

impl Transferable for DemData {
    fn detach_buffers(&mut self) -> Vec<Bytes> {
        self.elevations.detach_buffers()
    }

    fn attach_buffers(&mut self, buffers: Vec<Bytes>) -> Result<(), TransferError> {
        self.elevations.attach_buffers(buffers)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveSourceParams {
    pub source: String,
    pub source_type: String,
}

impl Transferable for RemoveSourceParams {}

/// GeoJSON data or a diff to apply to the worker's copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadGeoJsonParams {
    pub source: String,
    pub data: Option<String>,
    pub url: Option<String>,
    pub diff: Option<String>,
    pub cluster: bool,
}

impl Transferable for LoadGeoJsonParams {}

/// Result of (re)loading GeoJSON. `affected` holds the tiles touched by a diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoJsonLoadResult {
    pub feature_count: u64,
    pub affected: Option<TileBitmask>,
}

impl Transferable for GeoJsonLoadResult {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterParams {
    pub source: String,
    pub cluster_id: u64,
}

impl Transferable for ClusterParams {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLeavesParams {
    pub source: String,
    pub cluster_id: u64,
    pub limit: u32,
    pub offset: u32,
}

impl Transferable for ClusterLeavesParams {}

/// Features serialized as GeoJSON text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCollection {
    pub features: Vec<String>,
}

impl Transferable for FeatureCollection {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerUpdate {
    pub layers: Vec<String>,
    pub removed_ids: Vec<String>,
}

impl Transferable for LayerUpdate {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtlPluginState {
    pub status: String,
    pub url: Option<String>,
}

impl Transferable for RtlPluginState {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub url: String,
}

impl Transferable for ResourceRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub body: TransferBuffer,
    pub content_type: Option<String>,
}

impl Transferable for ResourceResponse {
    fn detach_buffers(&mut self) -> Vec<Bytes> {
        self.body.detach_buffers()
    }

    fn attach_buffers(&mut self, buffers: Vec<Bytes>) -> Result<(), TransferError> {
        self.body.attach_buffers(buffers)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagesRequest {
    pub source: Option<String>,
    pub tile_id: Option<CanonicalTileId>,
    pub icons: Vec<String>,
}

impl Transferable for ImagesRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlyphsRequest {
    pub tile_id: CanonicalTileId,
    pub stacks: Vec<(String, Vec<u32>)>,
}

impl Transferable for GlyphsRequest {}

/// Rasterized images or glyphs packed into one buffer with named offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAtlas {
    pub entries: Vec<(String, u32, u32)>,
    pub pixels: TransferBuffer,
}

impl Transferable for ImageAtlas {
    fn detach_buffers(&mut self) -> Vec<Bytes> {
        self.pixels.detach_buffers()
    }

    fn attach_buffers(&mut self, buffers: Vec<Bytes>) -> Result<(), TransferError> {
        self.pixels.attach_buffers(buffers)
    }
}

/// Declares a request newtype over `$params` bound to `$operation`.
macro_rules! operation_request {
    ($(#[$meta:meta])* $name:ident($params:ty) => $operation:ident, $response:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name(pub $params);

        impl Transferable for $name {
            fn detach_buffers(&mut self) -> Vec<Bytes> {
                self.0.detach_buffers()
            }

            fn attach_buffers(&mut self, buffers: Vec<Bytes>) -> Result<(), TransferError> {
                self.0.attach_buffers(buffers)
            }
        }

        impl Request for $name {
            const OPERATION: Operation = Operation::$operation;
            type Response = $response;
        }
    };
}

operation_request!(LoadTile(WorkerTileParameters) => LoadTile, Option<WorkerTileResult>);
operation_request!(ReloadTile(WorkerTileParameters) => ReloadTile, Option<WorkerTileResult>);
operation_request!(AbortTile(TileParameters) => AbortTile, ());
operation_request!(RemoveTile(TileParameters) => RemoveTile, ());
operation_request!(RemoveSource(RemoveSourceParams) => RemoveSource, ());
operation_request!(LoadDemTile(DemTileParameters) => LoadDemTile, DemData);
operation_request!(RemoveDemTile(TileParameters) => RemoveDemTile, ());
operation_request!(LoadGeoJson(LoadGeoJsonParams) => LoadGeoJson, GeoJsonLoadResult);
operation_request!(GetClusterExpansionZoom(ClusterParams) => GetClusterExpansionZoom, u32);
operation_request!(GetClusterChildren(ClusterParams) => GetClusterChildren, FeatureCollection);
operation_request!(GetClusterLeaves(ClusterLeavesParams) => GetClusterLeaves, FeatureCollection);
operation_request!(SetReferrer(String) => SetReferrer, ());
operation_request!(SetImages(Vec<String>) => SetImages, ());
operation_request!(SetLayers(Vec<String>) => SetLayers, ());
operation_request!(UpdateLayers(LayerUpdate) => UpdateLayers, ());
operation_request!(SyncRtlPluginState(RtlPluginState) => SyncRtlPluginState, bool);
operation_request!(
    /// Load an extra worker source implementation by URL.
    LoadWorkerSource(String) => LoadWorkerSource, ()
);
operation_request!(
    /// Worker asks its map instance to fetch a resource.
    GetResource(ResourceRequest) => GetResource, ResourceResponse
);
operation_request!(GetImages(ImagesRequest) => GetImages, ImageAtlas);
operation_request!(GetGlyphs(GlyphsRequest) => GetGlyphs, ImageAtlas);
