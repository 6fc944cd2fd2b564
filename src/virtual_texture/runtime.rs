use crate::{config::VirtualTextureConfig, virtual_texture::TileTexturePool};
use anyhow::Result;
use bevy::{
    prelude::*,
    render::render_resource::{
        Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
    },
};

/// The tile atlas of a virtual texture and the pool managing its slots.
#[derive(Clone, Debug)]
pub struct RuntimeVirtualTexture {
    pub config: VirtualTextureConfig,
    pool: TileTexturePool,
}

impl RuntimeVirtualTexture {
    pub fn new(config: VirtualTextureConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            pool: TileTexturePool::new(config.tile_block * config.tile_block),
            config,
        })
    }

    pub fn pool(&self) -> &TileTexturePool {
        &self.pool
    }

    #[inline]
    pub fn id_to_tile(&self, id: u32) -> UVec2 {
        UVec2::new(id % self.config.tile_block, id / self.config.tile_block)
    }

    #[inline]
    pub fn tile_to_id(&self, tile: UVec2) -> u32 {
        tile.y * self.config.tile_block + tile.x
    }

    /// The atlas slot that should receive the next produced page.
    pub fn request_tile(&self) -> UVec2 {
        self.id_to_tile(self.pool.first())
    }

    /// Marks the atlas slot as most recently used.
    pub fn set_active(&mut self, tile: UVec2) -> bool {
        if tile.cmpge(UVec2::splat(self.config.tile_block)).any() {
            return false;
        }

        self.pool.set_active(self.tile_to_id(tile))
    }

    /// The texel rectangle of the atlas slot, including its border.
    pub fn tile_rect(&self, tile: UVec2) -> URect {
        let size = self.config.tile_size_padding();
        let min = tile * size;

        URect::from_corners(min, min + size)
    }

    /// The two atlas layers, surface color and packed normals.
    pub fn atlas_descriptors(&self) -> [TextureDescriptor<'static>; 2] {
        let size = self.config.atlas_size();

        [TextureFormat::Rgba8Unorm, TextureFormat::Rgb10a2Unorm].map(|format| {
            texture_descriptor(size, format, TextureUsages::RENDER_ATTACHMENT)
        })
    }

    /// The page table texture, one texel per page of the finest mip.
    pub fn page_table_descriptor(&self) -> TextureDescriptor<'static> {
        texture_descriptor(
            self.config.page_size,
            TextureFormat::Rgba8Unorm,
            TextureUsages::RENDER_ATTACHMENT,
        )
    }
}

fn texture_descriptor(
    size: u32,
    format: TextureFormat,
    usage: TextureUsages,
) -> TextureDescriptor<'static> {
    TextureDescriptor {
        label: None,
        size: Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format,
        usage: usage | TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_ids() {
        let texture = RuntimeVirtualTexture::new(default()).unwrap();

        assert_eq!(texture.pool().len(), 32 * 32);
        assert_eq!(texture.tile_to_id(UVec2::new(3, 2)), 67);
        assert_eq!(texture.id_to_tile(67), UVec2::new(3, 2));
        assert_eq!(texture.request_tile(), UVec2::ZERO);
    }

    #[test]
    fn activation_advances_the_next_tile() {
        let mut texture = RuntimeVirtualTexture::new(default()).unwrap();

        assert!(texture.set_active(UVec2::ZERO));
        assert_eq!(texture.request_tile(), UVec2::new(1, 0));

        assert!(!texture.set_active(UVec2::new(32, 0)));
    }

    #[test]
    fn atlas_layout() {
        let texture = RuntimeVirtualTexture::new(VirtualTextureConfig {
            tile_block: 16,
            tile_size: 128,
            page_size: 128,
            tile_border: 2,
        })
        .unwrap();

        assert_eq!(
            texture.tile_rect(UVec2::new(1, 2)),
            URect::new(132, 264, 264, 396)
        );
        assert_eq!(texture.atlas_descriptors()[0].size.width, 16 * 132);
        assert_eq!(texture.page_table_descriptor().size.width, 128);
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        let config = VirtualTextureConfig {
            page_size: 300,
            ..default()
        };

        assert!(RuntimeVirtualTexture::new(config).is_err());
    }
}
