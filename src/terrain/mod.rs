//! The terrain geometry: a fixed quadtree of sections per tile, whose levels of detail
//! are selected by their projected screen size, and the per frame instance batches
//! they are drawn with.

mod batch;
mod section;
mod sector;
mod textures;
mod tile;

pub use crate::terrain::{
    batch::{
        BucketRange, TerrainBatch, TerrainBatchCollector, TerrainBatchInitializer,
        TerrainBuffer, TerrainDrawCommand, MAX_SURFACE_LAYERS,
    },
    section::{Neighbor, TerrainSection},
    sector::TerrainSector,
    textures::{
        TerrainTextureArrays, TextureArray, TextureArrayDescriptor, TextureCopy, TileTextures,
        LAYER_TEXTURE_SIZE,
    },
    tile::TerrainTile,
};

/// The number of lods and thus of quad grid meshes and instance buckets.
pub const LOD_COUNT: usize = 7;
