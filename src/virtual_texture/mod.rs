//! Feedback driven virtual texturing of the terrain surface.
//!
//! The terrain material writes the page and mip it samples into a small feedback target.
//! Once that target has been read back, the [`VirtualTextureProducer`] marks the resident
//! pages as active and queues the missing ones. Every frame a bounded number of queued
//! pages is produced into the slots of the tile atlas, which are recycled in least recently
//! used order, and the page table texture is rewritten with the active pages.

mod feedback;
mod page_table;
mod producer;
mod runtime;
mod tile_pool;
mod volume;

pub use crate::virtual_texture::{
    feedback::{decode_feedback, feedback_size, FeedbackReader, FEEDBACK_DOWNSCALE},
    page_table::{InvalidatedPages, PageCell, PagePayload, PageRequest, PageTable},
    producer::{DrawPageInfo, PageTableUpdate, TileRenderCommand, VirtualTextureProducer},
    runtime::RuntimeVirtualTexture,
    tile_pool::TileTexturePool,
    volume::VirtualTextureVolume,
};

use crate::{config::LandscapeSettings, landscape::LandscapeContext};
use anyhow::Result;
use async_channel::Sender;
use bevy::{core::FrameCount, prelude::*};

/// The paging state of a [`VirtualTextureVolume`], attached once the volume is registered.
#[derive(Component)]
pub struct VirtualTextureSystem {
    pub texture: RuntimeVirtualTexture,
    pub producer: VirtualTextureProducer,
    pub feedback: FeedbackReader,
}

impl VirtualTextureSystem {
    pub fn new(settings: &LandscapeSettings) -> Result<Self> {
        let texture = RuntimeVirtualTexture::new(settings.virtual_texture)?;
        let producer =
            VirtualTextureProducer::new(texture.config.page_size, settings.pages_per_frame);

        Ok(Self {
            texture,
            producer,
            feedback: default(),
        })
    }

    /// Runs one frame of the paging pipeline.
    ///
    /// If a feedback readback finished, its pages are requested and the page table is
    /// rewritten. Afterwards the queued requests are serviced within the frame budget.
    pub fn update(&mut self, draw_rect: Rect, frame: u32) -> VirtualTextureFrame {
        let mut output = VirtualTextureFrame::default();

        if let Some(data) = self.feedback.poll() {
            for request in decode_feedback(&data) {
                self.producer.request_page_data(
                    &mut self.texture,
                    request.x,
                    request.y,
                    request.mip,
                    frame,
                );
            }

            output.page_table = Some(self.producer.produce_page_table(frame));
        }

        output.tiles = self.producer.render_page(&mut self.texture, draw_rect);
        output.readback = self.feedback.begin_readback();

        output
    }

    /// Shifts the page tables after the volume moved.
    pub fn change_view_rect(&mut self, offset: IVec2) -> Vec<UVec2> {
        self.producer.change_view_rect(offset)
    }
}

/// The output of one frame of the paging pipeline.
#[derive(Default)]
pub struct VirtualTextureFrame {
    /// The pages to produce into the tile atlas.
    pub tiles: Vec<TileRenderCommand>,
    /// The page table rewrite, present when new feedback was processed.
    pub page_table: Option<PageTableUpdate>,
    /// Present when a new readback of the feedback target should be issued,
    /// the read back texels have to be sent through it.
    ///
    /// The frame is replaced in the next `Last`, so the host has to take or clone the
    /// sender before that. Once it is dropped, the readback is abandoned and restarted.
    pub readback: Option<Sender<Vec<u8>>>,
}

/// The commands of the active virtual texture volume for the host render pipeline.
#[derive(Default, Resource)]
pub struct VirtualTextureCommands {
    pub volume: Option<Entity>,
    pub draw_rect: Rect,
    pub frame: VirtualTextureFrame,
}

pub fn register_volumes(
    mut commands: Commands,
    mut context: ResMut<LandscapeContext>,
    settings: Res<LandscapeSettings>,
    volumes: Query<Entity, Added<VirtualTextureVolume>>,
) {
    for entity in &volumes {
        match VirtualTextureSystem::new(&settings) {
            Ok(system) => {
                commands.entity(entity).insert(system);
                context.register_volume(entity);

                info!("Registered the virtual texture volume {entity}.");
            }
            Err(error) => {
                warn!("Could not register the virtual texture volume {entity}: {error:#}")
            }
        }
    }
}

pub fn deregister_volumes(
    mut context: ResMut<LandscapeContext>,
    mut removed: RemovedComponents<VirtualTextureVolume>,
) {
    for entity in removed.read() {
        if context.volume() == Some(entity) {
            context.deregister_volume(entity);

            info!("Deregistered the virtual texture volume {entity}.");
        }
    }
}

/// Moves the active volume and runs its paging pipeline.
pub fn update_virtual_texture(
    frame: Res<FrameCount>,
    context: Res<LandscapeContext>,
    mut output: ResMut<VirtualTextureCommands>,
    mut volumes: Query<(
        &GlobalTransform,
        &mut VirtualTextureVolume,
        &mut VirtualTextureSystem,
    )>,
) {
    let Some((transform, mut volume, mut system)) =
        context.volume().and_then(|entity| volumes.get_mut(entity).ok())
    else {
        *output = default();
        return;
    };

    let page_size = system.texture.config.page_size;

    if let Some(offset) = volume.update_center(transform.translation(), page_size) {
        let released = system.change_view_rect(offset);

        debug!(
            "Moved the virtual texture volume to {}, released {} tiles.",
            volume.draw_rect.center(),
            released.len()
        );
    }

    *output = VirtualTextureCommands {
        volume: context.volume(),
        draw_rect: volume.draw_rect,
        frame: system.update(volume.draw_rect, frame.0),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system() -> VirtualTextureSystem {
        VirtualTextureSystem::new(&LandscapeSettings::default()).unwrap()
    }

    fn feedback(pages: &[(u8, u8, u8)]) -> Vec<u8> {
        pages
            .iter()
            .flat_map(|&(x, y, mip)| [x, y, mip, 255])
            .collect()
    }

    fn draw_rect() -> Rect {
        Rect::new(-512.0, -512.0, 512.0, 512.0)
    }

    #[test]
    fn feedback_round_trip() {
        let mut system = system();

        // nothing to read yet, but the first readback is issued
        let frame = system.update(draw_rect(), 1);
        assert!(frame.tiles.is_empty());
        assert!(frame.page_table.is_none());
        let readback = frame.readback.unwrap();

        // the readback is still in flight
        let frame = system.update(draw_rect(), 2);
        assert!(frame.readback.is_none());

        readback
            .try_send(feedback(&[(1, 1, 0), (1, 1, 0), (2, 1, 0), (3, 1, 0)]))
            .unwrap();

        let frame = system.update(draw_rect(), 3);
        assert_eq!(frame.tiles.len(), 2);
        assert!(frame.page_table.unwrap().is_empty());
        assert!(frame.readback.is_some());
        assert_eq!(system.producer.queued_requests().len(), 1);

        let frame = system.update(draw_rect(), 4);
        assert_eq!(frame.tiles.len(), 1);
        assert!(system.producer.queued_requests().is_empty());
    }

    #[test]
    fn resident_pages_are_written_to_the_page_table() {
        let mut system = system();

        let readback = system.update(draw_rect(), 1).readback.unwrap();
        readback.try_send(feedback(&[(4, 4, 0)])).unwrap();
        let readback = system.update(draw_rect(), 2).readback.unwrap();

        readback.try_send(feedback(&[(4, 4, 0)])).unwrap();
        let page_table = system.update(draw_rect(), 3).page_table.unwrap();

        assert_eq!(page_table.pages.len(), 1);
        assert_eq!(page_table.pages[0].rect, IRect::new(4, 4, 5, 5));
    }

    #[test]
    fn volume_registration() {
        let mut app = App::new();

        app.insert_resource(LandscapeSettings::default())
            .insert_resource(LandscapeContext::new(&LandscapeSettings::default()))
            .init_resource::<FrameCount>()
            .init_resource::<VirtualTextureCommands>()
            .add_systems(
                Last,
                (register_volumes, deregister_volumes, update_virtual_texture).chain(),
            );

        let volume = app
            .world_mut()
            .spawn((
                VirtualTextureVolume::new(512),
                GlobalTransform::from_translation(Vec3::new(10.0, 0.0, 10.0)),
            ))
            .id();

        app.update();
        assert_eq!(app.world().resource::<LandscapeContext>().volume(), Some(volume));
        assert!(app.world().get::<VirtualTextureSystem>(volume).is_some());

        app.update();
        let output = app.world().resource::<VirtualTextureCommands>();
        assert_eq!(output.volume, Some(volume));
        assert_eq!(output.draw_rect, Rect::new(-512.0, -512.0, 512.0, 512.0));

        app.world_mut().despawn(volume);
        app.update();
        assert_eq!(app.world().resource::<LandscapeContext>().volume(), None);
        assert_eq!(app.world().resource::<VirtualTextureCommands>().volume, None);
    }
}
