use bevy::prelude::*;

/// The region of the world covered by the virtual texture.
///
/// The volume follows its transform in discrete steps, so that the page tables only
/// have to shift by whole cells.
#[derive(Clone, Debug, Component)]
pub struct VirtualTextureVolume {
    /// Half the extent of the covered square.
    pub volume_size: u32,
    /// The snapped center (x and z) of the volume.
    pub center: Option<IVec2>,
    /// The covered world rectangle (x and z).
    pub draw_rect: Rect,
}

impl VirtualTextureVolume {
    pub fn new(volume_size: u32) -> Self {
        Self {
            volume_size: volume_size.max(1),
            center: None,
            draw_rect: Rect::default(),
        }
    }

    /// The world size of one page of the finest mip.
    pub fn page_cell_size(&self, page_size: u32) -> f32 {
        2.0 * self.volume_size as f32 / page_size.max(1) as f32
    }

    /// Snaps the position first to the page grid and then to the volume grid.
    pub fn fixed_center(&self, position: Vec3, page_size: u32) -> IVec2 {
        let cell = self.page_cell_size(page_size);
        let size = self.volume_size as f32;

        let position = ((position.xz() / cell + 0.5).floor() * cell).floor();

        ((position / size + 0.5).floor() * size).as_ivec2()
    }

    /// Moves the volume to the snapped position.
    ///
    /// Returns the shift of the page tables in pages, if the snapped center moved.
    pub fn update_center(&mut self, position: Vec3, page_size: u32) -> Option<IVec2> {
        let center = self.fixed_center(position, page_size);
        let size = self.volume_size as f32;

        self.draw_rect = Rect::from_center_half_size(center.as_vec2(), Vec2::splat(size));

        let previous = self.center.replace(center)?;

        if previous == center {
            return None;
        }

        let shift = (center - previous).as_vec2() / self.page_cell_size(page_size);

        Some(shift.round().as_ivec2())
    }
}
