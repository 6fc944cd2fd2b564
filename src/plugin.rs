use crate::{
    config::LandscapeSettings,
    debug::{draw_bounds, toggle_debug, LandscapeDebug},
    landscape::{
        deregister_tiles, gather_terrain_batches, register_tiles, LandscapeContext,
        LandscapeMeshes, TerrainDrawList,
    },
    virtual_texture::{
        deregister_volumes, register_volumes, update_virtual_texture, VirtualTextureCommands,
    },
};
use bevy::prelude::*;

/// The plugin for the landscape renderer.
///
/// Gathers the terrain instances of all [`TerrainTile`](crate::terrain::TerrainTile)s
/// into the [`TerrainDrawList`] and runs the virtual texture paging of the active
/// [`VirtualTextureVolume`](crate::virtual_texture::VirtualTextureVolume)
/// into the [`VirtualTextureCommands`], both at the end of every frame.
#[derive(Default)]
pub struct LandscapePlugin {
    pub settings: LandscapeSettings,
}

impl LandscapePlugin {
    /// Loads the settings from RON text, see [`LandscapeSettings::from_ron`].
    pub fn from_ron(source: &str) -> anyhow::Result<Self> {
        Ok(Self {
            settings: LandscapeSettings::from_ron(source)?,
        })
    }
}

impl Plugin for LandscapePlugin {
    fn build(&self, app: &mut App) {
        let settings = match self.settings.validate() {
            Ok(()) => self.settings.clone(),
            Err(error) => {
                error!("Invalid landscape settings, falling back to the defaults: {error:#}");
                LandscapeSettings::default()
            }
        };

        app.insert_resource(LandscapeContext::new(&settings))
            .insert_resource(settings)
            .init_resource::<LandscapeMeshes>()
            .init_resource::<LandscapeDebug>()
            .init_resource::<TerrainDrawList>()
            .init_resource::<VirtualTextureCommands>()
            .add_systems(
                Last,
                (
                    (register_tiles, deregister_tiles).before(gather_terrain_batches),
                    gather_terrain_batches,
                    (register_volumes, deregister_volumes).before(update_virtual_texture),
                    update_virtual_texture,
                ),
            );
    }
}

/// Adds the debug controls and the bounds visualization.
pub struct LandscapeDebugPlugin;

impl Plugin for LandscapeDebugPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<LandscapeDebug>()
            .add_systems(Update, toggle_debug)
            .add_systems(Last, draw_bounds.after(gather_terrain_batches));
    }
}
