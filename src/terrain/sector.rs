use crate::{
    config::LodConfig,
    math::LodSettings,
    terrain::{Neighbor, TerrainBatchCollector, TerrainBatchInitializer, TerrainSection},
    util::R16Image,
};
use anyhow::{ensure, Result};
use bevy::{prelude::*, render::primitives::Aabb};
use itertools::iproduct;

/// The full quadtree of one terrain tile, a flat `section_count` x `section_count` grid
/// of [`TerrainSection`]s.
///
/// Sections are stored row by row (`index = z * section_count + x`).
#[derive(Clone, Debug)]
pub struct TerrainSector {
    /// The bounds of the whole tile, vertically tight to the sampled heights.
    pub bounds: Aabb,
    pub sections: Vec<TerrainSection>,
    /// The count of sections along each side.
    pub section_count: u32,
    /// The count of quads along each side of a section at lod 0.
    pub section_size: u32,
    /// Scratch list of the sections visible this frame.
    visible: Vec<usize>,
}

impl TerrainSector {
    /// Lays out the sections of a tile with `terrain_size` quads along each side,
    /// positioned at `position` and extending `height` upwards.
    pub fn new(
        terrain_size: u32,
        section_count: u32,
        section_size: u32,
        position: Vec3,
        height: f32,
    ) -> Self {
        let half_size = terrain_size as f32 / 2.0;
        let bounds = Aabb {
            center: Vec3::new(
                position.x + half_size,
                position.y + height / 2.0,
                position.z + half_size,
            )
            .into(),
            half_extents: Vec3::new(half_size, height / 2.0, half_size).into(),
        };

        let sections = iproduct!(0..section_count, 0..section_count)
            .map(|(z, x)| {
                let pivot = position
                    + Vec3::new((section_size * x) as f32, 0.0, (section_size * z) as f32);

                TerrainSection::new(pivot, section_size)
            })
            .collect();

        Self {
            bounds,
            sections,
            section_count,
            section_size,
            visible: Vec::new(),
        }
    }

    #[inline]
    pub fn section_index(&self, x: u32, z: u32) -> usize {
        (z * self.section_count + x) as usize
    }

    /// Precomputes the lod thresholds of all sections and links their neighbours.
    pub fn init_sections(&mut self, lod: &LodConfig) {
        let settings = LodSettings::new(
            lod.lod_count,
            lod.lod0_screen_size,
            lod.lod0_distribution,
            lod.lod_distribution,
        );

        let count = self.section_count as i32;

        for (index, section) in self.sections.iter_mut().enumerate() {
            section.lod_settings = settings;

            let position = IVec2::new(index as i32 % count, index as i32 / count);

            section.neighbors = Neighbor::ALL.map(|neighbor| {
                let neighbor = position + neighbor.offset();

                (neighbor.cmpge(IVec2::ZERO).all() && neighbor.cmplt(IVec2::splat(count)).all())
                    .then(|| (neighbor.y * count + neighbor.x) as usize)
            });
        }
    }

    /// Fits the vertical extent of every section and of the sector itself to the heights
    /// sampled from the heightmap of the tile.
    ///
    /// Heightmap pixels map to quads one to one, row `z` covers world `position.z + z`.
    /// Heights are normalized to `[0, 1]` and scaled by `scale_y`.
    pub fn correct_bounds(&mut self, heightmap: &R16Image, scale_y: f32) -> Result<()> {
        let (width, height) = heightmap.dimensions();
        ensure!(width > 0 && height > 0, "The heightmap of the tile is empty.");

        let section_size = self.section_size;
        let count = self.section_count;
        let base_y = self.bounds.min().y;

        let mut sector_min = f32::MAX;
        let mut sector_max = f32::MIN;

        for (index, section) in self.sections.iter_mut().enumerate() {
            let x0 = (index as u32 % count) * section_size;
            let z0 = (index as u32 / count) * section_size;

            let mut min_height = f32::MAX;
            let mut max_height = f32::MIN;

            for (z, x) in iproduct!(z0..=z0 + section_size, x0..=x0 + section_size) {
                let value = heightmap.get_pixel(x.min(width - 1), z.min(height - 1)).0[0];
                let value = value as f32 / u16::MAX as f32;

                min_height = min_height.min(value);
                max_height = max_height.max(value);
            }

            let min_y = section.center.y + min_height * scale_y;
            let max_y = section.center.y + max_height * scale_y;

            section.bounds = Aabb::from_min_max(
                Vec3::new(section.pivot.x, min_y, section.pivot.z),
                Vec3::new(
                    section.pivot.x + section_size as f32,
                    max_y,
                    section.pivot.z + section_size as f32,
                ),
            );

            sector_min = sector_min.min(min_height);
            sector_max = sector_max.max(max_height);
        }

        if !self.sections.is_empty() {
            let min = self.bounds.min();
            let max = self.bounds.max();

            self.bounds = Aabb::from_min_max(
                Vec3::new(min.x, base_y + sector_min * scale_y, min.z),
                Vec3::new(max.x, base_y + sector_max * scale_y, max.z),
            );
        }

        Ok(())
    }

    /// Culls the sector and its sections and appends a batch for every visible section.
    ///
    /// The lods of all visible sections are computed before any batch is emitted,
    /// so that the neighbour fractions refer to the current frame.
    /// Culled sections keep their last lod.
    pub fn collect_batches(
        &mut self,
        collector: &mut TerrainBatchCollector,
        initializer: &TerrainBatchInitializer,
    ) {
        self.visible.clear();

        if !initializer.frustum.intersects_aabb(&self.bounds) {
            return;
        }

        for (index, section) in self.sections.iter_mut().enumerate() {
            if initializer.frustum.intersects_aabb(&section.bounds) {
                section.update_lod(self.section_size, initializer);
                self.visible.push(index);
            }
        }

        for &index in &self.visible {
            let section = &self.sections[index];

            let neighbor_fractions = section.neighbors.map(|neighbor| {
                neighbor.map_or(section.fraction_lod, |neighbor| {
                    self.sections[neighbor].fraction_lod
                })
            });

            collector.add(
                section.lod_index,
                section.batch(neighbor_fractions, initializer),
            );
        }
    }

    /// The number of sections visible during the last [`Self::collect_batches`].
    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        math::{lod_projection, FrustumPlanes},
        terrain::{TerrainBatch, MAX_SURFACE_LAYERS},
    };
    use bevy::render::primitives::HalfSpace;
    use image::Luma;

    fn frustum(min: Vec3, max: Vec3) -> FrustumPlanes {
        FrustumPlanes([
            HalfSpace::new(Vec4::new(1.0, 0.0, 0.0, -min.x)),
            HalfSpace::new(Vec4::new(-1.0, 0.0, 0.0, max.x)),
            HalfSpace::new(Vec4::new(0.0, 1.0, 0.0, -min.y)),
            HalfSpace::new(Vec4::new(0.0, -1.0, 0.0, max.y)),
            HalfSpace::new(Vec4::new(0.0, 0.0, 1.0, -min.z)),
            HalfSpace::new(Vec4::new(0.0, 0.0, -1.0, max.z)),
        ])
    }

    fn initializer(view_origin: Vec3, frustum: FrustumPlanes) -> TerrainBatchInitializer {
        TerrainBatchInitializer {
            height_index: 0,
            splat_index: 0,
            splat_count: 1,
            surface_count: 0,
            surface_indices: [-1; MAX_SURFACE_LAYERS],
            scale_y: 100.0,
            sector_pivot: Vec3::ZERO,
            view_origin,
            view_lod_scale: 1.0,
            projection: lod_projection(0.5, 1920.0, 1080.0, 0.1, 10000.0),
            frustum,
        }
    }

    fn everything() -> FrustumPlanes {
        frustum(Vec3::splat(-1e6), Vec3::splat(1e6))
    }

    fn sector() -> TerrainSector {
        let mut sector = TerrainSector::new(1024, 16, 64, Vec3::ZERO, 100.0);
        sector.init_sections(&LodConfig::default());
        sector
    }

    fn all_batches(collector: &TerrainBatchCollector) -> Vec<TerrainBatch> {
        collector
            .buckets()
            .flat_map(|(_, bucket)| bucket.iter().copied())
            .collect()
    }

    #[test]
    fn sections_are_laid_out_row_by_row() {
        let sector = TerrainSector::new(256, 4, 64, Vec3::new(100.0, 5.0, 200.0), 50.0);

        assert_eq!(sector.sections.len(), 16);

        let section = &sector.sections[sector.section_index(2, 1)];
        assert_eq!(section.pivot, Vec3::new(228.0, 5.0, 264.0));
        assert_eq!(section.center, Vec3::new(260.0, 5.0, 296.0));

        assert_eq!(Vec3::from(sector.bounds.center), Vec3::new(228.0, 30.0, 328.0));
    }

    #[test]
    fn neighbors_are_linked_inside_the_sector() {
        let sector = sector();

        let corner = &sector.sections[sector.section_index(0, 0)];
        assert_eq!(corner.neighbor(Neighbor::Left), None);
        assert_eq!(corner.neighbor(Neighbor::Bottom), None);
        assert_eq!(corner.neighbor(Neighbor::Right), Some(sector.section_index(1, 0)));
        assert_eq!(corner.neighbor(Neighbor::Top), Some(sector.section_index(0, 1)));

        let inner = &sector.sections[sector.section_index(5, 7)];
        for neighbor in Neighbor::ALL {
            let index = inner.neighbor(neighbor).unwrap();
            let offset = neighbor.offset();
            assert_eq!(
                index,
                sector.section_index((5 + offset.x) as u32, (7 + offset.y) as u32)
            );
        }
    }

    #[test]
    fn bounds_are_fitted_to_the_heightmap() {
        let mut sector = TerrainSector::new(128, 2, 64, Vec3::ZERO, 100.0);

        // the heights rise along x: the left column is flat at 0.25, the right one at 0.75
        let heightmap = R16Image::from_fn(129, 129, |x, _| {
            if x < 64 {
                Luma([u16::MAX / 4])
            } else {
                Luma([u16::MAX / 4 * 3])
            }
        });

        sector.correct_bounds(&heightmap, 100.0).unwrap();

        let left = &sector.sections[sector.section_index(0, 0)];
        assert!((left.bounds.min().y - 25.0).abs() < 0.01);
        assert!((left.bounds.max().y - 75.0).abs() < 0.01);

        let right = &sector.sections[sector.section_index(1, 1)];
        assert!((right.bounds.min().y - 75.0).abs() < 0.01);
        assert!((right.bounds.max().y - 75.0).abs() < 0.01);

        assert!((sector.bounds.min().y - 25.0).abs() < 0.01);
        assert!((sector.bounds.max().y - 75.0).abs() < 0.01);
    }

    #[test]
    fn empty_heightmap_is_rejected() {
        let mut sector = sector();
        assert!(sector.correct_bounds(&R16Image::new(0, 0), 1.0).is_err());
    }

    #[test]
    fn culled_sector_emits_nothing() {
        let mut sector = sector();
        let mut collector = TerrainBatchCollector::default();

        let initializer = initializer(
            Vec3::ZERO,
            frustum(Vec3::splat(5000.0), Vec3::splat(6000.0)),
        );

        sector.collect_batches(&mut collector, &initializer);

        assert!(collector.is_empty());
        assert_eq!(sector.visible_count(), 0);
    }

    #[test]
    fn culled_sections_skip_lod_computation() {
        let mut sector = sector();
        let mut collector = TerrainBatchCollector::default();

        for section in &mut sector.sections {
            section.fraction_lod = -1.0;
        }

        // only the first column of sections (x in [0, 64]) is inside
        let initializer = initializer(
            Vec3::new(32.0, 10.0, 32.0),
            frustum(Vec3::new(-10.0, -10.0, -10.0), Vec3::new(60.0, 200.0, 2000.0)),
        );

        sector.collect_batches(&mut collector, &initializer);

        assert_eq!(collector.len(), 16);

        for (index, section) in sector.sections.iter().enumerate() {
            if index % 16 == 0 {
                assert!(section.fraction_lod >= 0.0);
            } else {
                assert_eq!(section.fraction_lod, -1.0);
            }
        }
    }

    #[test]
    fn batches_carry_neighbor_fractions() {
        let mut sector = sector();
        let mut collector = TerrainBatchCollector::default();

        let initializer = initializer(Vec3::new(10.0, 50.0, 10.0), everything());
        sector.collect_batches(&mut collector, &initializer);

        let batches = all_batches(&collector);
        assert_eq!(batches.len(), 256);

        for batch in batches {
            let pivot = Vec3::from_array(batch.section_pivot);
            let x = (pivot.x / 64.0) as u32;
            let z = (pivot.z / 64.0) as u32;
            let section = &sector.sections[sector.section_index(x, z)];

            assert_eq!(batch.fraction_lod, section.fraction_lod);
            assert_eq!(batch.lod_index as u32, section.lod_index);
            assert_eq!(batch.num_quad as u32, section.num_quad);

            let fractions = [
                batch.top_fraction_lod,
                batch.bottom_fraction_lod,
                batch.left_fraction_lod,
                batch.right_fraction_lod,
            ];

            for (neighbor, fraction) in Neighbor::ALL.into_iter().zip(fractions) {
                let expected = section
                    .neighbor(neighbor)
                    .map_or(section.fraction_lod, |index| sector.sections[index].fraction_lod);

                assert_eq!(fraction, expected);
            }
        }
    }

    #[test]
    fn lod_grows_with_distance() {
        let mut sector = sector();
        let mut collector = TerrainBatchCollector::default();

        let initializer = initializer(Vec3::new(0.0, 20.0, 0.0), everything());
        sector.collect_batches(&mut collector, &initializer);

        let near = &sector.sections[sector.section_index(0, 0)];
        let far = &sector.sections[sector.section_index(15, 15)];

        assert!(near.fraction_lod <= far.fraction_lod);
        assert!(near.num_quad >= far.num_quad);

        for section in &sector.sections {
            assert!(section.lod_index <= 6);
            assert!(section.num_quad.is_power_of_two());
            assert!((1..=64).contains(&section.num_quad));
            assert_eq!(section.num_quad, (64 >> section.lod_index).max(1));
        }
    }
}
