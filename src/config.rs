use anyhow::{ensure, Context, Result};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// The lod thresholds of one terrain tile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// The number of lods, the quad grid halves its resolution with every lod.
    pub lod_count: u32,
    /// The squared screen radius fraction at which lod 0 is fully reached.
    pub lod0_screen_size: f32,
    /// Distance factor between the lod 0 and lod 1 thresholds.
    pub lod0_distribution: f32,
    /// Distance factor between all further thresholds.
    pub lod_distribution: f32,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            lod_count: 7,
            lod0_screen_size: 0.5,
            lod0_distribution: 1.25,
            lod_distribution: 2.8,
        }
    }
}

impl LodConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=crate::terrain::LOD_COUNT as u32).contains(&self.lod_count),
            "lod_count must lie in [1, {}], got {}",
            crate::terrain::LOD_COUNT,
            self.lod_count
        );
        ensure!(
            self.lod0_screen_size > 0.0,
            "lod0_screen_size must be positive, got {}",
            self.lod0_screen_size
        );

        Ok(())
    }
}

/// The layout of the virtual texture atlas and its page tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualTextureConfig {
    /// The number of tiles along each side of the atlas.
    pub tile_block: u32,
    /// The size of one tile in texels, without its border.
    pub tile_size: u32,
    /// The number of pages along each side of the finest page table.
    pub page_size: u32,
    /// The number of border texels on each side of a tile.
    pub tile_border: u32,
}

impl Default for VirtualTextureConfig {
    fn default() -> Self {
        Self {
            tile_block: 32,
            tile_size: 256,
            page_size: 256,
            tile_border: 1,
        }
    }
}

impl VirtualTextureConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (16..=32).contains(&self.tile_block),
            "tile_block must lie in [16, 32], got {}",
            self.tile_block
        );
        ensure!(
            (128..=512).contains(&self.tile_size),
            "tile_size must lie in [128, 512], got {}",
            self.tile_size
        );
        ensure!(
            (128..=512).contains(&self.page_size) && self.page_size.is_power_of_two(),
            "page_size must be a power of two in [128, 512], got {}",
            self.page_size
        );
        ensure!(
            (1..=4).contains(&self.tile_border),
            "tile_border must lie in [1, 4], got {}",
            self.tile_border
        );

        Ok(())
    }

    /// The size of one tile including its border on both sides.
    pub fn tile_size_padding(&self) -> u32 {
        self.tile_size + self.tile_border * 2
    }

    /// The size of the whole atlas texture.
    pub fn atlas_size(&self) -> u32 {
        self.tile_block * self.tile_size_padding()
    }

    /// The index of the coarsest page table, whose single cell spans all pages.
    pub fn max_mip(&self) -> u32 {
        self.page_size.max(1).ilog2()
    }
}

/// Global configuration of the landscape renderer.
///
/// Can be loaded from a RON file, every missing field falls back to its default.
#[derive(Clone, Debug, PartialEq, Resource, Serialize, Deserialize)]
#[serde(default)]
pub struct LandscapeSettings {
    /// The resolution of the tile textures.
    pub texture_size: u32,
    /// The number of slices of the shared texture arrays, bounds the registered tiles.
    pub texture_slice: u32,
    /// The number of quads along each side of a section at lod 0.
    pub section_quad_count: u32,
    pub lod: LodConfig,
    pub virtual_texture: VirtualTextureConfig,
    /// The maximum number of page requests serviced per frame.
    pub pages_per_frame: usize,
    /// The names of the terrain layers, in the order of their texture array slices.
    pub terrain_layers: Vec<String>,
}

impl Default for LandscapeSettings {
    fn default() -> Self {
        Self {
            texture_size: 1024,
            texture_slice: 4,
            section_quad_count: 64,
            lod: default(),
            virtual_texture: default(),
            pages_per_frame: 2,
            terrain_layers: Vec::new(),
        }
    }
}

impl LandscapeSettings {
    pub fn from_ron(source: &str) -> Result<Self> {
        let settings: Self =
            ron::from_str(source).context("Failed to parse the landscape settings.")?;
        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.texture_size > 0, "texture_size must be positive");
        ensure!(self.texture_slice > 0, "texture_slice must be positive");
        ensure!(
            self.section_quad_count.is_power_of_two(),
            "section_quad_count must be a power of two, got {}",
            self.section_quad_count
        );
        ensure!(self.pages_per_frame > 0, "pages_per_frame must be positive");

        self.lod.validate().context("Invalid lod configuration.")?;
        self.virtual_texture
            .validate()
            .context("Invalid virtual texture configuration.")?;

        Ok(())
    }
}
