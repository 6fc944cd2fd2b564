use crate::{
    config::{LandscapeSettings, LodConfig},
    terrain::{TerrainSector, TileTextures},
    util::R16Image,
};
use anyhow::{ensure, Result};
use bevy::prelude::*;

/// A single terrain tile, the unit registered with the landscape renderer.
///
/// Spawning an entity with this component registers the tile, despawning it
/// (or removing the component) deregisters it again.
#[derive(Clone, Component)]
pub struct TerrainTile {
    pub lod: LodConfig,
    /// The number of quads along each side of the tile.
    pub terrain_size: u32,
    /// The height of a fully white heightmap texel.
    pub scale_y: f32,
    /// The world position of the tile corner with the smallest coordinates.
    pub position: Vec3,
    pub sector: TerrainSector,
    pub height: Handle<Image>,
    pub tangent: Handle<Image>,
    pub splat: Vec<Handle<Image>>,
    /// The names of the terrain layers painted by the splat maps, four per splat map.
    pub layers: Vec<String>,
}

impl TerrainTile {
    /// Builds the quadtree of a tile from its heightmap.
    ///
    /// The heightmap stores one texel per quad corner, so a tile of `n` quads
    /// uses a heightmap of `n + 1` texels along each side.
    pub fn serialize(
        position: Vec3,
        heightmap: &R16Image,
        scale_y: f32,
        section_quad_count: u32,
        lod: LodConfig,
    ) -> Result<Self> {
        let (width, height) = heightmap.dimensions();

        ensure!(width == height, "The heightmap of a tile has to be square.");
        ensure!(width > 1, "The heightmap of a tile is too small.");
        ensure!(section_quad_count > 0, "Sections need at least one quad.");

        let terrain_size = width - 1;

        ensure!(
            terrain_size % section_quad_count == 0,
            "The tile size {terrain_size} is not a multiple of the section size {section_quad_count}."
        );

        let section_count = terrain_size / section_quad_count;

        let mut sector = TerrainSector::new(
            terrain_size,
            section_count,
            section_quad_count,
            position,
            scale_y,
        );
        sector.init_sections(&lod);
        sector.correct_bounds(heightmap, scale_y)?;

        Ok(Self {
            lod,
            terrain_size,
            scale_y,
            position,
            sector,
            height: default(),
            tangent: default(),
            splat: Vec::new(),
            layers: Vec::new(),
        })
    }

    /// Builds a tile with the section size and lod configuration of the landscape.
    pub fn from_settings(
        position: Vec3,
        heightmap: &R16Image,
        scale_y: f32,
        settings: &LandscapeSettings,
    ) -> Result<Self> {
        Self::serialize(
            position,
            heightmap,
            scale_y,
            settings.section_quad_count,
            settings.lod,
        )
    }

    pub fn with_textures(mut self, height: Handle<Image>, tangent: Handle<Image>) -> Self {
        self.height = height;
        self.tangent = tangent;
        self
    }

    pub fn with_splat(mut self, splat: Vec<Handle<Image>>, layers: Vec<String>) -> Self {
        self.splat = splat;
        self.layers = layers;
        self
    }

    /// Rebuilds the quadtree, e.g. after the heightmap has been edited.
    pub fn reserialize(&mut self, heightmap: &R16Image) -> Result<()> {
        let section_quad_count = self.sector.section_size;
        let tile = Self::serialize(
            self.position,
            heightmap,
            self.scale_y,
            section_quad_count,
            self.lod,
        )?;

        self.terrain_size = tile.terrain_size;
        self.sector = tile.sector;

        Ok(())
    }

    /// The textures this tile contributes to the shared texture arrays.
    pub fn textures(&self) -> TileTextures {
        let mut textures = TileTextures::HEIGHT | TileTextures::TANGENT;

        if !self.splat.is_empty() {
            textures |= TileTextures::SPLAT;
        }

        textures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn serialize_tile() {
        let heightmap = R16Image::from_pixel(257, 257, Luma([u16::MAX / 2]));
        let tile = TerrainTile::serialize(
            Vec3::new(256.0, 0.0, 0.0),
            &heightmap,
            200.0,
            64,
            LodConfig::default(),
        )
        .unwrap();

        assert_eq!(tile.terrain_size, 256);
        assert_eq!(tile.sector.section_count, 4);
        assert_eq!(tile.sector.sections.len(), 16);
        assert_eq!(tile.sector.sections[0].pivot, Vec3::new(256.0, 0.0, 0.0));
        assert!((tile.sector.bounds.max().y - 100.0).abs() < 0.01);
        assert_eq!(tile.textures(), TileTextures::HEIGHT | TileTextures::TANGENT);
    }

    #[test]
    fn tile_from_settings() {
        let settings = LandscapeSettings {
            section_quad_count: 32,
            lod: LodConfig {
                lod0_screen_size: 0.8,
                ..default()
            },
            ..default()
        };

        let tile =
            TerrainTile::from_settings(Vec3::ZERO, &R16Image::new(129, 129), 10.0, &settings)
                .unwrap();

        assert_eq!(tile.sector.section_size, 32);
        assert_eq!(tile.sector.section_count, 4);
        assert_eq!(tile.lod, settings.lod);
    }

    #[test]
    fn reject_invalid_heightmaps() {
        let lod = LodConfig::default();

        let rectangle = R16Image::new(257, 129);
        assert!(TerrainTile::serialize(Vec3::ZERO, &rectangle, 1.0, 64, lod).is_err());

        let uneven = R16Image::new(101, 101);
        assert!(TerrainTile::serialize(Vec3::ZERO, &uneven, 1.0, 64, lod).is_err());
    }

    #[test]
    fn reserialize_keeps_the_layout() {
        let flat = R16Image::new(129, 129);
        let mut tile = TerrainTile::serialize(Vec3::ZERO, &flat, 50.0, 64, LodConfig::default())
            .unwrap()
            .with_splat(vec![Handle::default()], vec!["grass".into()]);

        let raised = R16Image::from_pixel(129, 129, Luma([u16::MAX]));
        tile.reserialize(&raised).unwrap();

        assert_eq!(tile.sector.sections.len(), 4);
        assert!((tile.sector.bounds.min().y - 50.0).abs() < 0.01);
        assert!(tile.textures().contains(TileTextures::SPLAT));
    }
}
