use crate::{
    math::{bounds_radius, compute_bounds_screen_radius_squared, lod_from_screen_size, LodSettings},
    terrain::{TerrainBatch, TerrainBatchInitializer, LOD_COUNT},
};
use bevy::{prelude::*, render::primitives::Aabb};

/// The four edge neighbours of a section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Neighbor {
    /// Towards +Z.
    Top,
    /// Towards -Z.
    Bottom,
    /// Towards -X.
    Left,
    /// Towards +X.
    Right,
}

impl Neighbor {
    pub const ALL: [Neighbor; 4] = [
        Neighbor::Top,
        Neighbor::Bottom,
        Neighbor::Left,
        Neighbor::Right,
    ];

    /// The grid offset to the neighbour.
    pub fn offset(self) -> IVec2 {
        match self {
            Neighbor::Top => IVec2::new(0, 1),
            Neighbor::Bottom => IVec2::new(0, -1),
            Neighbor::Left => IVec2::new(-1, 0),
            Neighbor::Right => IVec2::new(1, 0),
        }
    }
}

/// A leaf of the terrain quadtree, rendered as one instance of a quad grid.
///
/// Sections live in the flat arena of their [`TerrainSector`](super::TerrainSector)
/// and refer to their neighbours by index into that arena.
#[derive(Clone, Debug)]
pub struct TerrainSection {
    /// The grid resolution at the current lod.
    pub num_quad: u32,
    pub lod_index: u32,
    /// The continuous lod, used to morph the edges towards the neighbours.
    pub fraction_lod: f32,
    pub bounds: Aabb,
    /// The world position of the section corner with the smallest coordinates.
    pub pivot: Vec3,
    pub center: Vec3,
    pub(crate) lod_settings: LodSettings,
    /// Indexed by [`Neighbor`], `None` at the sector edges.
    pub(crate) neighbors: [Option<usize>; 4],
}

impl TerrainSection {
    pub(crate) fn new(pivot: Vec3, section_size: u32) -> Self {
        let half_size = section_size as f32 / 2.0;
        let center = pivot + Vec3::new(half_size, 0.0, half_size);

        Self {
            num_quad: section_size,
            lod_index: 0,
            fraction_lod: 0.0,
            bounds: Aabb {
                center: center.into(),
                half_extents: Vec3::new(half_size, 0.5, half_size).into(),
            },
            pivot,
            center,
            lod_settings: default(),
            neighbors: [None; 4],
        }
    }

    pub fn neighbor(&self, neighbor: Neighbor) -> Option<usize> {
        self.neighbors[neighbor as usize]
    }

    /// Recomputes the lod from the projected size of the section bounds.
    pub(crate) fn update_lod(&mut self, base_quad_count: u32, initializer: &TerrainBatchInitializer) {
        let screen_size = compute_bounds_screen_radius_squared(
            bounds_radius(&self.bounds),
            self.bounds.center.into(),
            initializer.view_origin,
            &initializer.projection,
        );

        let (lod_index, fraction_lod) = lod_from_screen_size(
            &self.lod_settings,
            screen_size,
            initializer.view_lod_scale,
        );

        let last_lod = (LOD_COUNT - 1) as u32;
        let base_quad_count = base_quad_count.max(1);

        self.lod_index = lod_index.min(last_lod);
        self.fraction_lod = fraction_lod.min(last_lod as f32);
        self.num_quad = (base_quad_count >> self.lod_index).clamp(1, base_quad_count);
    }

    /// Assembles the instance record of this section.
    ///
    /// `neighbor_fractions` are ordered like [`Neighbor::ALL`].
    pub(crate) fn batch(
        &self,
        neighbor_fractions: [f32; 4],
        initializer: &TerrainBatchInitializer,
    ) -> TerrainBatch {
        let [top, bottom, left, right] = neighbor_fractions;

        TerrainBatch {
            num_quad: self.num_quad as i32,
            lod_index: self.lod_index as i32,
            height_index: initializer.height_index,
            splat_index: initializer.splat_index,
            splat_count: initializer.splat_count,
            surface_count: initializer.surface_count,
            surface_indices_a: initializer.surface_indices_a(),
            surface_indices_b: initializer.surface_indices_b(),
            scale_y: initializer.scale_y,
            fraction_lod: self.fraction_lod,
            top_fraction_lod: top,
            bottom_fraction_lod: bottom,
            left_fraction_lod: left,
            right_fraction_lod: right,
            sector_pivot: initializer.sector_pivot.to_array(),
            section_pivot: self.pivot.to_array(),
        }
    }
}
