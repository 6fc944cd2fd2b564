use crate::virtual_texture::{PageRequest, PageTable, RuntimeVirtualTexture};
use bevy::{
    prelude::*,
    utils::{HashMap, HashSet},
};
use itertools::Itertools;
use std::cmp::Reverse;

/// Produce the tile of a page into an atlas slot.
#[derive(Clone, Debug, PartialEq)]
pub struct TileRenderCommand {
    pub request: PageRequest,
    /// The atlas slot receiving the tile.
    pub tile: UVec2,
    /// The world space rectangle (x and z) covered by the tile, including its border.
    pub source: Rect,
    /// The texel rectangle of the slot inside the atlas.
    pub target: URect,
}

/// An active cell stamped into the page table texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawPageInfo {
    /// The rectangle in page table texels.
    pub rect: IRect,
    pub mip: u32,
    pub tile: UVec2,
}

impl DrawPageInfo {
    /// The value written into the covered page table texels.
    pub fn page_info(&self) -> Vec4 {
        Vec4::new(
            self.tile.x as f32 / 255.0,
            self.tile.y as f32 / 255.0,
            self.mip as f32 / 255.0,
            0.0,
        )
    }

    /// Maps the unit quad onto the rectangle of the page table.
    pub fn transform(&self, table_size: u32) -> Mat4 {
        let table_size = table_size as f32;
        let translation = self.rect.min.as_vec2() / table_size;
        let scale = self.rect.width() as f32 / table_size;

        Mat4::from_scale_rotation_translation(
            Vec3::splat(scale),
            Quat::IDENTITY,
            translation.extend(0.0),
        )
    }
}

/// The instances of one page table rewrite, coarse mips first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageTableUpdate {
    pub pages: Vec<DrawPageInfo>,
    pub table_size: u32,
}

impl PageTableUpdate {
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page_infos(&self) -> Vec<Vec4> {
        self.pages.iter().map(DrawPageInfo::page_info).collect()
    }

    pub fn transforms(&self) -> Vec<Mat4> {
        self.pages
            .iter()
            .map(|page| page.transform(self.table_size))
            .collect()
    }
}

/// Keeps the page tables of all mips and decides which pages get produced.
#[derive(Clone, Debug)]
pub struct VirtualTextureProducer {
    /// The number of pages along each side of the finest page table.
    pub table_size: u32,
    pub max_mip: u32,
    pub pages_per_frame: usize,
    page_tables: Vec<PageTable>,
    /// Pending requests in the order they were issued.
    requests: Vec<PageRequest>,
    queued: HashSet<PageRequest>,
    /// The owning cell (mip and storage index) of every assigned atlas slot.
    active_pages: HashMap<UVec2, (u32, UVec2)>,
}

impl VirtualTextureProducer {
    pub fn new(table_size: u32, pages_per_frame: usize) -> Self {
        let max_mip = table_size.max(1).ilog2();

        Self {
            table_size,
            max_mip,
            pages_per_frame,
            page_tables: (0..=max_mip)
                .map(|mip| PageTable::new(mip, table_size))
                .collect(),
            requests: Vec::new(),
            queued: default(),
            active_pages: default(),
        }
    }

    pub fn page_table(&self, mip: u32) -> &PageTable {
        &self.page_tables[mip as usize]
    }

    pub fn queued_requests(&self) -> &[PageRequest] {
        &self.requests
    }

    pub fn active_page_count(&self) -> usize {
        self.active_pages.len()
    }

    /// Queues the request, unless the same request is already pending.
    pub fn request(&mut self, request: PageRequest) -> bool {
        if !self.queued.insert(request) {
            return false;
        }

        self.requests.push(request);

        true
    }

    /// Marks the finest resident cell covering the page as active this frame and
    /// requests the page itself if it is not resident yet.
    ///
    /// Pages outside of the table are ignored.
    pub fn request_page_data(
        &mut self,
        texture: &mut RuntimeVirtualTexture,
        x: u32,
        y: u32,
        mip: u32,
        frame: u32,
    ) {
        if mip > self.max_mip || x >= self.table_size || y >= self.table_size {
            return;
        }

        let mut mip = mip;
        let cell = self.page_tables[mip as usize].get(x, y);

        if !cell.payload.is_ready() {
            if cell.payload.request.is_none() {
                let request = PageRequest::new(x, y, mip);

                if self.request(request) {
                    self.page_tables[mip as usize].get_mut(x, y).payload.request = Some(request);
                }
            }

            while mip < self.max_mip
                && !self.page_tables[mip as usize].get(x, y).payload.is_ready()
            {
                mip += 1;
            }
        }

        let cell = self.page_tables[mip as usize].get_mut(x, y);

        if let Some(tile) = cell.payload.tile {
            cell.payload.active_frame = frame;
            texture.set_active(tile);
        }
    }

    /// Services up to `pages_per_frame` pending requests, coarsest mip first.
    ///
    /// Every serviced request takes the least recently used atlas slot, which is
    /// released by its previous owner first. Requests whose cell no longer waits for
    /// them are dropped but still count against the budget.
    pub fn render_page(
        &mut self,
        texture: &mut RuntimeVirtualTexture,
        draw_rect: Rect,
    ) -> Vec<TileRenderCommand> {
        let mut commands = Vec::new();

        if self.requests.is_empty() {
            return commands;
        }

        self.requests.sort_by_key(|request| request.mip);

        for _ in 0..self.pages_per_frame {
            let Some(request) = self.requests.pop() else {
                break;
            };

            self.queued.remove(&request);

            let table = &mut self.page_tables[request.mip as usize];
            let index = table.cell_index(request.x, request.y);

            if table.cell(index).payload.request != Some(request) {
                table.clear_request(request);
                warn!("Dropped the stale request for {request}.");
                continue;
            }

            table.cell_mut(index).payload.request = None;

            let tile = texture.request_tile();

            if let Some((mip, previous)) = self.active_pages.remove(&tile) {
                self.page_tables[mip as usize].cell_mut(previous).payload.tile = None;
            }

            texture.set_active(tile);

            self.page_tables[request.mip as usize]
                .cell_mut(index)
                .payload
                .tile = Some(tile);
            self.active_pages.insert(tile, (request.mip, index));

            commands.push(TileRenderCommand {
                request,
                tile,
                source: self.source_rect(texture, request, draw_rect),
                target: texture.tile_rect(tile),
            });
        }

        debug!(
            "Produced {} pages, {} requests pending.",
            commands.len(),
            self.requests.len()
        );

        commands
    }

    /// Collects the active cells of this frame to be stamped into the page table texture.
    pub fn produce_page_table(&self, frame: u32) -> PageTableUpdate {
        let pages = self
            .active_pages
            .iter()
            .filter_map(|(&tile, &(mip, index))| {
                let table = &self.page_tables[mip as usize];
                let cell = table.cell(index);

                (cell.payload.active_frame == frame).then(|| DrawPageInfo {
                    rect: table.table_rect(cell),
                    mip,
                    tile,
                })
            })
            .sorted_by_key(|page| (Reverse(page.mip), page.rect.min.y, page.rect.min.x))
            .collect();

        PageTableUpdate {
            pages,
            table_size: self.table_size,
        }
    }

    /// Shifts the window of every page table by `offset` pages.
    ///
    /// The atlas slots of the invalidated cells are returned, their pending requests
    /// are dropped. The pending requests of the remaining cells are moved to the page
    /// coordinates of the new window.
    pub fn change_view_rect(&mut self, offset: IVec2) -> Vec<UVec2> {
        let mut released = Vec::new();
        let mut dropped = HashSet::default();
        let mut moved = HashMap::default();

        for table in &mut self.page_tables {
            let invalidated = table.change_view_rect(offset);

            dropped.extend(invalidated.requests);
            moved.extend(invalidated.moved);
            released.extend(invalidated.tiles);
        }

        let requests = std::mem::take(&mut self.requests);
        self.queued.clear();

        for request in requests {
            if dropped.contains(&request) {
                continue;
            }

            self.request(moved.get(&request).copied().unwrap_or(request));
        }

        for tile in &released {
            self.active_pages.remove(tile);
        }

        debug!(
            "Shifted the page tables by {offset}, released {} tiles.",
            released.len()
        );

        released
    }

    /// The world rectangle covered by the page of the request, grown by the tile border.
    fn source_rect(
        &self,
        texture: &RuntimeVirtualTexture,
        request: PageRequest,
        draw_rect: Rect,
    ) -> Rect {
        let config = &texture.config;
        let per_size = 1u32 << request.mip;
        let page = UVec2::new(request.x, request.y) / per_size * per_size;

        let page_world_size = draw_rect.width() / self.table_size as f32;
        let cell_world_size = page_world_size * per_size as f32;
        let padding = config.tile_border as f32 * cell_world_size / config.tile_size as f32;

        let min = draw_rect.min + page.as_vec2() * page_world_size - padding;

        Rect::from_corners(min, min + cell_world_size + 2.0 * padding)
    }
}
