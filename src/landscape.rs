//! The landscape context owns all state shared between the terrain tiles and drives
//! the per frame gathering of the terrain instances.

use crate::{
    config::LandscapeSettings,
    debug::LandscapeDebug,
    math::{lod_projection, FrustumPlanes},
    terrain::{
        TerrainBatchCollector, TerrainBatchInitializer, TerrainBuffer, TerrainDrawCommand,
        TerrainTextureArrays, TerrainTile, TextureArray, TextureCopy, LOD_COUNT,
        MAX_SURFACE_LAYERS,
    },
};
use bevy::{prelude::*, render::primitives::Frustum, utils::HashMap};
use slab::Slab;

/// The widening of the camera field of view used for the lod selection.
const LOD_FOV_MARGIN_DEGREES: f32 = 30.0;

/// Marks the camera whose frustum and position drive the lod selection.
#[derive(Clone, Copy, Debug, Default, Component)]
pub struct LandscapeView;

/// The precomputed quad grid meshes and the materials, one per lod.
#[derive(Clone, Debug, Default, Resource)]
pub struct LandscapeMeshes {
    pub meshes: [Handle<Mesh>; LOD_COUNT],
    pub materials: [Option<UntypedHandle>; LOD_COUNT],
}

/// The albedo and normal textures of the terrain layers, in the order of the layer names
/// in the [`LandscapeSettings`].
#[derive(Clone, Debug, Default, Resource)]
pub struct LandscapeLayerTextures {
    pub albedo: Vec<Handle<Image>>,
    pub normal: Vec<Handle<Image>>,
}

/// Everything the host render pipeline has to submit this frame.
#[derive(Clone, Debug, Default, Resource)]
pub struct TerrainDrawList {
    /// The raw instance data, to be written to the start of the instance buffer.
    pub instance_data: Vec<u8>,
    /// The number of instances the instance buffer has to hold.
    pub buffer_capacity: usize,
    /// Whether the instance buffer has to be recreated.
    pub buffer_resized: bool,
    pub commands: Vec<TerrainDrawCommand>,
    pub copies: Vec<TextureCopy>,
}

impl TerrainDrawList {
    pub fn clear(&mut self) {
        self.instance_data.clear();
        self.commands.clear();
        self.copies.clear();
    }

    pub fn instance_count(&self) -> u32 {
        self.commands
            .iter()
            .map(|command| command.instance_count)
            .sum()
    }
}

/// The registry of active terrain tiles and the state shared by all of them.
#[derive(Resource)]
pub struct LandscapeContext {
    /// The registered tiles, the key of a tile is its slice of the height array.
    tiles: Slab<Entity>,
    tile_slots: HashMap<Entity, usize>,
    layers: HashMap<String, i32>,
    volume: Option<Entity>,
    pub texture_arrays: TerrainTextureArrays,
    collector: TerrainBatchCollector,
    buffer: TerrainBuffer,
    copy_textures: bool,
    copy_layers: bool,
    last_tile_count: usize,
}

impl LandscapeContext {
    pub fn new(settings: &LandscapeSettings) -> Self {
        let layers = settings
            .terrain_layers
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index as i32))
            .collect();

        info!(
            "Initialized the landscape with {} tile slots and {} terrain layers.",
            settings.texture_slice,
            settings.terrain_layers.len()
        );

        Self {
            tiles: Slab::with_capacity(settings.texture_slice as usize),
            tile_slots: default(),
            layers,
            volume: None,
            texture_arrays: TerrainTextureArrays::new(
                settings.texture_size,
                settings.texture_slice,
                settings.terrain_layers.len() as u32,
            ),
            collector: default(),
            buffer: default(),
            copy_textures: true,
            copy_layers: true,
            last_tile_count: 0,
        }
    }

    /// Adds the tile to the active tiles and returns its slot.
    ///
    /// Returns `None` if all slots of the texture arrays are taken.
    pub fn register_tile(&mut self, entity: Entity) -> Option<usize> {
        if let Some(&slot) = self.tile_slots.get(&entity) {
            return Some(slot);
        }

        if self.tiles.len() >= self.texture_arrays.height.slices as usize {
            return None;
        }

        let slot = self.tiles.insert(entity);
        self.tile_slots.insert(entity, slot);
        self.copy_textures = true;

        Some(slot)
    }

    pub fn deregister_tile(&mut self, entity: Entity) -> Option<usize> {
        let slot = self.tile_slots.remove(&entity)?;
        self.tiles.remove(slot);
        self.copy_textures = true;

        Some(slot)
    }

    pub fn tile_slot(&self, entity: Entity) -> Option<usize> {
        self.tile_slots.get(&entity).copied()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// The registered tiles ordered by their slot.
    pub fn tiles(&self) -> impl Iterator<Item = (usize, Entity)> + '_ {
        self.tiles.iter().map(|(slot, &entity)| (slot, entity))
    }

    pub fn register_volume(&mut self, entity: Entity) {
        self.volume = Some(entity);
    }

    pub fn deregister_volume(&mut self, entity: Entity) {
        if self.volume == Some(entity) {
            self.volume = None;
        }
    }

    /// The virtual texture volume currently in use.
    pub fn volume(&self) -> Option<Entity> {
        self.volume
    }

    /// The slice of the albedo and normal arrays holding the layer, `0` for unknown layers.
    pub fn terrain_layer_id(&self, name: &str) -> i32 {
        self.layers.get(name).copied().unwrap_or(0)
    }

    /// The layer slices of the surface layers of a tile, `-1` for unused slots.
    pub fn surface_indices(&self, layers: &[String]) -> [i32; MAX_SURFACE_LAYERS] {
        let mut indices = [-1; MAX_SURFACE_LAYERS];

        for (index, name) in indices.iter_mut().zip(layers) {
            *index = self.terrain_layer_id(name);
        }

        indices
    }

    /// Forces the tile textures to be copied again, e.g. after a tile was edited.
    pub fn mark_dirty(&mut self) {
        self.copy_textures = true;
    }

    /// Whether the tile textures have to be copied into the texture arrays this frame.
    pub fn needs_texture_copy(&self) -> bool {
        self.copy_textures || self.last_tile_count != self.tiles.len()
    }

    fn layer_copies(&mut self, textures: &LandscapeLayerTextures) -> Vec<TextureCopy> {
        self.copy_layers = false;

        let albedo = textures.albedo.iter().enumerate().map(|(slice, source)| TextureCopy {
            source: source.clone(),
            target: TextureArray::Albedo,
            slice: slice as u32,
        });
        let normal = textures.normal.iter().enumerate().map(|(slice, source)| TextureCopy {
            source: source.clone(),
            target: TextureArray::Normal,
            slice: slice as u32,
        });

        albedo.chain(normal).collect()
    }
}

pub fn register_tiles(
    mut context: ResMut<LandscapeContext>,
    settings: Res<LandscapeSettings>,
    tiles: Query<(Entity, &TerrainTile), Added<TerrainTile>>,
) {
    for (entity, tile) in &tiles {
        // the lod meshes are shared by all tiles
        if tile.sector.section_size != settings.section_quad_count {
            warn!(
                "The terrain tile {entity} uses sections of {} quads, the lod meshes have {}.",
                tile.sector.section_size, settings.section_quad_count
            );
        }

        match context.register_tile(entity) {
            Some(slot) => info!(
                "Registered the terrain tile {entity} with {} sections at slot {slot}.",
                tile.sector.sections.len()
            ),
            None => warn!(
                "Could not register the terrain tile {entity}, all {} tile slots are taken.",
                context.texture_arrays.height.slices
            ),
        }
    }
}

pub fn deregister_tiles(
    mut context: ResMut<LandscapeContext>,
    mut removed: RemovedComponents<TerrainTile>,
) {
    for entity in removed.read() {
        if let Some(slot) = context.deregister_tile(entity) {
            info!("Deregistered the terrain tile {entity} from slot {slot}.");
        }
    }
}

/// Culls all registered tiles against the view and rebuilds the [`TerrainDrawList`].
#[allow(clippy::too_many_arguments)]
pub fn gather_terrain_batches(
    mut context: ResMut<LandscapeContext>,
    mut draw_list: ResMut<TerrainDrawList>,
    debug: Res<LandscapeDebug>,
    meshes: Res<LandscapeMeshes>,
    layer_textures: Option<Res<LandscapeLayerTextures>>,
    views: Query<(&Camera, &GlobalTransform, &Frustum, &Projection), With<LandscapeView>>,
    mut tiles: Query<&mut TerrainTile>,
) {
    if debug.freeze_lod {
        draw_list.copies.clear();
        return;
    }

    draw_list.clear();

    if context.copy_layers {
        if let Some(layer_textures) = layer_textures {
            let copies = context.layer_copies(&layer_textures);
            draw_list.copies.extend(copies);
        }
    }

    let Some((camera, transform, frustum, projection)) = views.iter().find(|view| view.0.is_active)
    else {
        return;
    };

    let view_size = camera
        .logical_viewport_size()
        .unwrap_or(Vec2::ONE)
        .max(Vec2::ONE);

    let (fov, near, far) = match projection {
        Projection::Perspective(perspective) => {
            (perspective.fov, perspective.near, perspective.far)
        }
        Projection::Orthographic(orthographic) => {
            (90f32.to_radians(), orthographic.near, orthographic.far)
        }
    };

    let projection = lod_projection(
        (fov + LOD_FOV_MARGIN_DEGREES.to_radians()) * 0.5,
        view_size.x,
        view_size.y,
        near,
        far,
    );

    let copy_textures = context.needs_texture_copy();
    let context = &mut *context;

    let splat_slices = context.texture_arrays.splat.slices;
    let mut splat_offset = 0;

    context.collector.reset();

    for (slot, entity) in context.tiles.iter() {
        let Ok(mut tile) = tiles.get_mut(*entity) else {
            continue;
        };

        let splat_count = tile.splat.len() as u32;

        if copy_textures {
            draw_list.copies.push(TextureCopy {
                source: tile.height.clone(),
                target: TextureArray::Height,
                slice: slot as u32,
            });
            draw_list.copies.push(TextureCopy {
                source: tile.tangent.clone(),
                target: TextureArray::Tangent,
                slice: slot as u32,
            });

            for (index, splat) in tile.splat.iter().enumerate() {
                let slice = splat_offset + index as u32;

                if slice >= splat_slices {
                    warn!(
                        "The splat array has no slice left for the splat map {index} of tile {entity}."
                    );
                    break;
                }

                draw_list.copies.push(TextureCopy {
                    source: splat.clone(),
                    target: TextureArray::Splat,
                    slice,
                });
            }
        }

        let initializer = TerrainBatchInitializer {
            height_index: slot as i32,
            splat_index: splat_offset as i32,
            splat_count: splat_count as i32,
            surface_count: tile.layers.len().min(MAX_SURFACE_LAYERS) as i32,
            surface_indices: context.surface_indices(&tile.layers),
            scale_y: tile.scale_y,
            sector_pivot: tile.position,
            view_origin: transform.translation(),
            view_lod_scale: 1.0,
            projection,
            frustum: FrustumPlanes::from(frustum),
        };

        tile.sector
            .collect_batches(&mut context.collector, &initializer);

        splat_offset += splat_count;
    }

    if copy_textures {
        context.copy_textures = false;
        context.last_tile_count = context.tiles.len();
    }

    let ranges = context.buffer.upload(&context.collector);

    draw_list.commands = ranges
        .into_iter()
        .map(|range| TerrainDrawCommand {
            lod: range.lod,
            mesh: meshes.meshes[range.lod as usize].clone(),
            material: meshes.materials[range.lod as usize].clone(),
            instance_count: range.count,
            buffer_offset: range.offset,
        })
        .collect();

    draw_list
        .instance_data
        .extend_from_slice(context.buffer.bytes());
    draw_list.buffer_capacity = context.buffer.capacity();
    draw_list.buffer_resized = context.buffer.resized();
}
