//! This crate renders large height-field landscapes with two cooperating systems.
//!
//! # Terrain geometry
//! Every [`TerrainTile`](terrain::TerrainTile) covers a square heightmap and is split into a
//! grid of sections, which are drawn as instances of seven pre-built grid meshes, one per
//! level of detail. Each frame the sections are culled against the view frustum, a lod is
//! picked from the projected screen size of their bounds and the fraction towards the
//! next coarser lod is handed to the shader, so that edges can morph into their neighbors.
//! The resulting instances are gathered into the [`TerrainDrawList`](landscape::TerrainDrawList)
//! by the [`LandscapePlugin`](plugin::LandscapePlugin).
//!
//! # Virtual texturing
//! The surface of the terrain is baked into a clipmap shaped virtual texture around a
//! [`VirtualTextureVolume`](virtual_texture::VirtualTextureVolume). Pages are requested from
//! a feedback readback, produced into a fixed atlas of tiles within a per frame budget and
//! evicted in least recently used order. See the [`virtual_texture`] module for details.
//!
//! The crate does not own a render graph. It produces plain data (instance buffers, texture
//! copies, page productions and page table rewrites) for the host render pipeline to submit.

pub mod config;
pub mod debug;
pub mod landscape;
pub mod math;
pub mod plugin;
pub mod terrain;
pub mod virtual_texture;

mod util;

pub use crate::util::R16Image;

pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        config::{LandscapeSettings, LodConfig, VirtualTextureConfig},
        debug::LandscapeDebug,
        landscape::{
            LandscapeContext, LandscapeLayerTextures, LandscapeMeshes, LandscapeView,
            TerrainDrawList,
        },
        plugin::{LandscapeDebugPlugin, LandscapePlugin},
        terrain::{TerrainTile, TileTextures},
        virtual_texture::{VirtualTextureCommands, VirtualTextureVolume},
        R16Image,
    };
}
