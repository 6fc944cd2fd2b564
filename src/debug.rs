//! Contains a debug resource and systems controlling it to visualize the lod selection.

use crate::{
    landscape::LandscapeContext,
    terrain::{TerrainTile, LOD_COUNT},
};
use bevy::{color::palettes::basic, prelude::*};

/// The colors of the section bounds, from lod 0 to the coarsest lod.
pub const LOD_COLORS: [Srgba; LOD_COUNT] = [
    basic::RED,
    basic::YELLOW,
    basic::LIME,
    basic::AQUA,
    basic::BLUE,
    basic::FUCHSIA,
    basic::WHITE,
];

#[derive(Clone, Debug, Default, Resource)]
pub struct LandscapeDebug {
    pub show_bounds: bool,
    /// Keeps the draw list of the last frame, to inspect the lods from another angle.
    pub freeze_lod: bool,
}

pub fn lod_color(lod: u32) -> Srgba {
    LOD_COLORS[(lod as usize).min(LOD_COUNT - 1)]
}

pub fn toggle_debug(input: Res<ButtonInput<KeyCode>>, mut debug: ResMut<LandscapeDebug>) {
    if input.just_pressed(KeyCode::KeyB) {
        debug.show_bounds = !debug.show_bounds;
        let state = if debug.show_bounds { "on" } else { "off" };
        info!("Toggled the bounds view {}.", state)
    }
    if input.just_pressed(KeyCode::KeyF) {
        debug.freeze_lod = !debug.freeze_lod;
        let state = if debug.freeze_lod { "on" } else { "off" };
        info!("Toggled the lod freeze {}.", state)
    }
}

/// Draws the bounds of all registered tiles and of their sections, colored by lod.
pub fn draw_bounds(
    debug: Res<LandscapeDebug>,
    context: Res<LandscapeContext>,
    tiles: Query<&TerrainTile>,
    mut gizmos: Gizmos,
) {
    if !debug.show_bounds {
        return;
    }

    for (_, entity) in context.tiles() {
        let Ok(tile) = tiles.get(entity) else {
            continue;
        };

        let bounds = &tile.sector.bounds;
        gizmos.cuboid(
            Transform::from_translation(bounds.center.into())
                .with_scale(Vec3::from(bounds.half_extents) * 2.0),
            basic::GRAY,
        );

        for section in &tile.sector.sections {
            gizmos.cuboid(
                Transform::from_translation(section.bounds.center.into())
                    .with_scale(Vec3::from(section.bounds.half_extents) * 2.0),
                lod_color(section.lod_index),
            );
        }
    }
}
