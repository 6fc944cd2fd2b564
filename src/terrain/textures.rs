use bevy::{
    prelude::*,
    render::render_resource::{
        Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
    },
};
use derive_more::Display;

/// The resolution of the albedo and normal texture of a terrain layer.
pub const LAYER_TEXTURE_SIZE: u32 = 256;

bitflags::bitflags! {
    /// The per tile textures that are copied into the shared texture arrays.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TileTextures: u32 {
        const HEIGHT  = 1 << 0;
        const TANGENT = 1 << 1;
        const SPLAT   = 1 << 2;
    }
}

/// One of the texture arrays shared by every terrain instance.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum TextureArray {
    #[display("terrain_height_array")]
    Height,
    #[display("terrain_tangent_array")]
    Tangent,
    #[display("terrain_splat_array")]
    Splat,
    #[display("terrain_albedo_array")]
    Albedo,
    #[display("terrain_normal_array")]
    Normal,
}

/// The layout of one shared texture array.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureArrayDescriptor {
    pub array: TextureArray,
    pub size: u32,
    pub slices: u32,
    pub format: TextureFormat,
    pub mip_level_count: u32,
}

impl TextureArrayDescriptor {
    pub fn descriptor(&self) -> TextureDescriptor<'static> {
        TextureDescriptor {
            label: None,
            size: Extent3d {
                width: self.size,
                height: self.size,
                depth_or_array_layers: self.slices.max(1),
            },
            mip_level_count: self.mip_level_count,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: self.format,
            usage: TextureUsages::COPY_DST | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        }
    }
}

/// The descriptors of all shared texture arrays.
#[derive(Clone, Debug)]
pub struct TerrainTextureArrays {
    pub height: TextureArrayDescriptor,
    pub tangent: TextureArrayDescriptor,
    pub splat: TextureArrayDescriptor,
    pub albedo: TextureArrayDescriptor,
    pub normal: TextureArrayDescriptor,
}

impl TerrainTextureArrays {
    /// Heights and tangents store one extra row and column for the shared tile edge.
    pub fn new(texture_size: u32, texture_slice: u32, layer_count: u32) -> Self {
        let layer_mips = LAYER_TEXTURE_SIZE.ilog2() + 1;

        Self {
            height: TextureArrayDescriptor {
                array: TextureArray::Height,
                size: texture_size + 1,
                slices: texture_slice,
                format: TextureFormat::R16Unorm,
                mip_level_count: 1,
            },
            tangent: TextureArrayDescriptor {
                array: TextureArray::Tangent,
                size: texture_size + 1,
                slices: texture_slice,
                format: TextureFormat::Rgb10a2Unorm,
                mip_level_count: 1,
            },
            splat: TextureArrayDescriptor {
                array: TextureArray::Splat,
                size: texture_size,
                slices: texture_slice,
                format: TextureFormat::Rgba8Unorm,
                mip_level_count: 1,
            },
            albedo: TextureArrayDescriptor {
                array: TextureArray::Albedo,
                size: LAYER_TEXTURE_SIZE,
                slices: layer_count,
                format: TextureFormat::Rgba8UnormSrgb,
                mip_level_count: layer_mips,
            },
            normal: TextureArrayDescriptor {
                array: TextureArray::Normal,
                size: LAYER_TEXTURE_SIZE,
                slices: layer_count,
                format: TextureFormat::Rgba8Unorm,
                mip_level_count: layer_mips,
            },
        }
    }

    pub fn get(&self, array: TextureArray) -> &TextureArrayDescriptor {
        match array {
            TextureArray::Height => &self.height,
            TextureArray::Tangent => &self.tangent,
            TextureArray::Splat => &self.splat,
            TextureArray::Albedo => &self.albedo,
            TextureArray::Normal => &self.normal,
        }
    }
}

/// A whole texture copied into one slice of a shared texture array.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureCopy {
    pub source: Handle<Image>,
    pub target: TextureArray,
    pub slice: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_array_layout() {
        let arrays = TerrainTextureArrays::new(1024, 4, 3);

        let height = arrays.get(TextureArray::Height).descriptor();
        assert_eq!(height.size.width, 1025);
        assert_eq!(height.size.depth_or_array_layers, 4);
        assert_eq!(height.format, TextureFormat::R16Unorm);

        let tangent = arrays.get(TextureArray::Tangent).descriptor();
        assert_eq!(tangent.size.height, 1025);
        assert_eq!(tangent.format, TextureFormat::Rgb10a2Unorm);

        assert_eq!(arrays.splat.size, 1024);

        let albedo = arrays.get(TextureArray::Albedo).descriptor();
        assert_eq!(albedo.size.width, 256);
        assert_eq!(albedo.size.depth_or_array_layers, 3);
        assert_eq!(albedo.mip_level_count, 9);
    }

    #[test]
    fn array_without_layers_keeps_one_slice() {
        let arrays = TerrainTextureArrays::new(512, 4, 0);
        assert_eq!(arrays.normal.descriptor().size.depth_or_array_layers, 1);
    }

    #[test]
    fn array_labels() {
        assert_eq!(TextureArray::Height.to_string(), "terrain_height_array");
        assert_eq!(TextureArray::Normal.to_string(), "terrain_normal_array");
    }
}
