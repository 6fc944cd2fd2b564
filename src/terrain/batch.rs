use crate::{math::FrustumPlanes, terrain::LOD_COUNT};
use bevy::prelude::*;
use bytemuck::{Pod, Zeroable};

/// The maximum number of surface layers a single tile can reference.
pub const MAX_SURFACE_LAYERS: usize = 8;

/// Capacity hints per lod bucket, finer lods are rarer.
const BUCKET_CAPACITY: [usize; LOD_COUNT] = [16, 128, 256, 512, 512, 1024, 1024];

/// The initial instance capacity of the [`TerrainBuffer`].
const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// One instance of a terrain section draw.
///
/// The layout is consumed by the vertex stage as is, do not reorder the fields.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
pub struct TerrainBatch {
    pub num_quad: i32,
    pub lod_index: i32,
    pub height_index: i32,
    pub splat_index: i32,
    pub splat_count: i32,
    pub surface_count: i32,
    pub surface_indices_a: [i32; 4],
    pub surface_indices_b: [i32; 4],
    pub scale_y: f32,
    pub fraction_lod: f32,
    pub top_fraction_lod: f32,
    pub bottom_fraction_lod: f32,
    pub left_fraction_lod: f32,
    pub right_fraction_lod: f32,
    pub sector_pivot: [f32; 3],
    pub section_pivot: [f32; 3],
}

/// Per tile inputs shared by all sections of a sector during batch collection.
#[derive(Clone, Debug)]
pub struct TerrainBatchInitializer {
    pub height_index: i32,
    pub splat_index: i32,
    pub splat_count: i32,
    pub surface_count: i32,
    /// Texture array slices of the surface layers, `-1` for unused slots.
    pub surface_indices: [i32; MAX_SURFACE_LAYERS],
    pub scale_y: f32,
    pub sector_pivot: Vec3,
    pub view_origin: Vec3,
    pub view_lod_scale: f32,
    pub projection: Mat4,
    pub frustum: FrustumPlanes,
}

impl TerrainBatchInitializer {
    pub(crate) fn surface_indices_a(&self) -> [i32; 4] {
        [
            self.surface_indices[0],
            self.surface_indices[1],
            self.surface_indices[2],
            self.surface_indices[3],
        ]
    }

    pub(crate) fn surface_indices_b(&self) -> [i32; 4] {
        [
            self.surface_indices[4],
            self.surface_indices[5],
            self.surface_indices[6],
            self.surface_indices[7],
        ]
    }
}

/// Buckets the visible sections of all tiles by their lod.
///
/// The buckets are cleared at the start of every frame, no batch outlives one frame.
pub struct TerrainBatchCollector {
    buckets: [Vec<TerrainBatch>; LOD_COUNT],
}

impl Default for TerrainBatchCollector {
    fn default() -> Self {
        Self {
            buckets: BUCKET_CAPACITY.map(Vec::with_capacity),
        }
    }
}

impl TerrainBatchCollector {
    pub fn reset(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }

    /// Appends the batch to the bucket of `lod`, lods past the last bucket land in it.
    #[inline]
    pub fn add(&mut self, lod: u32, batch: TerrainBatch) {
        let lod = (lod as usize).min(LOD_COUNT - 1);
        self.buckets[lod].push(batch);
    }

    pub fn bucket(&self, lod: u32) -> &[TerrainBatch] {
        &self.buckets[lod as usize]
    }

    pub fn buckets(&self) -> impl Iterator<Item = (u32, &[TerrainBatch])> {
        self.buckets
            .iter()
            .enumerate()
            .map(|(lod, bucket)| (lod as u32, bucket.as_slice()))
    }

    /// The total number of batches over all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The region `[offset, offset + count)` of the instance buffer used by one lod bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketRange {
    pub lod: u32,
    pub offset: u32,
    pub count: u32,
}

/// One instanced draw of the quad grid of a lod.
#[derive(Clone, Debug, PartialEq)]
pub struct TerrainDrawCommand {
    pub lod: u32,
    pub mesh: Handle<Mesh>,
    pub material: Option<UntypedHandle>,
    pub instance_count: u32,
    /// The index of the first instance of this draw inside the instance buffer.
    pub buffer_offset: u32,
}

/// CPU staging copy of the structured instance buffer shared by all terrain draws.
pub struct TerrainBuffer {
    instances: Vec<TerrainBatch>,
    capacity: usize,
    resized: bool,
}

impl Default for TerrainBuffer {
    fn default() -> Self {
        Self {
            instances: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
            capacity: INITIAL_BUFFER_CAPACITY,
            resized: true,
        }
    }
}

impl TerrainBuffer {
    /// Concatenates all non-empty buckets in lod order and returns their regions.
    pub fn upload(&mut self, collector: &TerrainBatchCollector) -> Vec<BucketRange> {
        self.instances.clear();
        self.resized = false;

        let mut ranges = Vec::with_capacity(LOD_COUNT);

        for (lod, bucket) in collector.buckets() {
            if bucket.is_empty() {
                continue;
            }

            ranges.push(BucketRange {
                lod,
                offset: self.instances.len() as u32,
                count: bucket.len() as u32,
            });

            self.instances.extend_from_slice(bucket);
        }

        if self.instances.len() > self.capacity {
            self.capacity = self.instances.len().next_power_of_two();
            self.resized = true;
        }

        ranges
    }

    pub fn instances(&self) -> &[TerrainBatch] {
        &self.instances
    }

    /// The raw bytes to write into the GPU buffer.
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.instances)
    }

    /// The number of instances the GPU buffer has to hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the GPU buffer has to be (re)created before the next upload.
    pub fn resized(&self) -> bool {
        self.resized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    fn batch(num_quad: i32) -> TerrainBatch {
        TerrainBatch {
            num_quad,
            ..default()
        }
    }

    #[test]
    fn batch_layout() {
        assert_eq!(mem::size_of::<TerrainBatch>(), 104);

        let record = TerrainBatch {
            num_quad: 64,
            lod_index: 1,
            height_index: 2,
            splat_index: 3,
            splat_count: 4,
            surface_count: 5,
            surface_indices_a: [6, 7, 8, 9],
            surface_indices_b: [10, 11, 12, 13],
            scale_y: 14.0,
            fraction_lod: 15.0,
            top_fraction_lod: 16.0,
            bottom_fraction_lod: 17.0,
            left_fraction_lod: 18.0,
            right_fraction_lod: 19.0,
            sector_pivot: [20.0, 21.0, 22.0],
            section_pivot: [23.0, 24.0, 25.0],
        };

        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&record));

        assert_eq!(words[0], 64);
        assert_eq!(words[6], 6);
        assert_eq!(words[13], 13);
        assert_eq!(f32::from_bits(words[14]), 14.0);
        assert_eq!(f32::from_bits(words[19]), 19.0);
        assert_eq!(f32::from_bits(words[25]), 25.0);
    }

    #[test]
    fn collector_buckets_by_lod() {
        let mut collector = TerrainBatchCollector::default();

        collector.add(0, batch(64));
        collector.add(3, batch(8));
        collector.add(3, batch(8));
        collector.add(9, batch(1));

        assert_eq!(collector.bucket(0).len(), 1);
        assert_eq!(collector.bucket(3).len(), 2);
        assert_eq!(collector.bucket(6).len(), 1);
        assert_eq!(collector.len(), 4);

        collector.reset();
        assert!(collector.is_empty());
    }

    #[test]
    fn upload_concatenates_non_empty_buckets() {
        let mut collector = TerrainBatchCollector::default();
        let mut buffer = TerrainBuffer::default();

        collector.add(1, batch(32));
        collector.add(1, batch(32));
        collector.add(4, batch(4));
        collector.add(6, batch(1));

        let ranges = buffer.upload(&collector);

        assert_eq!(
            ranges,
            vec![
                BucketRange { lod: 1, offset: 0, count: 2 },
                BucketRange { lod: 4, offset: 2, count: 1 },
                BucketRange { lod: 6, offset: 3, count: 1 },
            ]
        );
        assert_eq!(buffer.instances()[2].num_quad, 4);
        assert_eq!(buffer.bytes().len(), 4 * mem::size_of::<TerrainBatch>());
        assert!(!buffer.resized());
    }

    #[test]
    fn upload_grows_the_buffer() {
        let mut collector = TerrainBatchCollector::default();
        let mut buffer = TerrainBuffer::default();

        for _ in 0..1500 {
            collector.add(5, batch(2));
        }

        buffer.upload(&collector);

        assert!(buffer.resized());
        assert_eq!(buffer.capacity(), 2048);
    }
}
