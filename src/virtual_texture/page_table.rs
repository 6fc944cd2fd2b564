use bevy::prelude::*;
use derive_more::Display;
use itertools::iproduct;
use ndarray::Array2;

/// A request to produce the tile of one page.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[display("page ({x}, {y}) at mip {mip}")]
pub struct PageRequest {
    pub x: u32,
    pub y: u32,
    pub mip: u32,
}

impl PageRequest {
    pub fn new(x: u32, y: u32, mip: u32) -> Self {
        Self { x, y, mip }
    }
}

/// The residency state of a page cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagePayload {
    /// The atlas slot holding the tile of this cell.
    pub tile: Option<UVec2>,
    /// The frame the tile of this cell was last requested for rendering.
    pub active_frame: u32,
    /// The outstanding request of this cell.
    pub request: Option<PageRequest>,
}

impl PagePayload {
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.tile.is_some()
    }

    fn invalidate(&mut self, released: &mut InvalidatedPages) {
        if let Some(tile) = self.tile.take() {
            released.tiles.push(tile);
        }
        if let Some(request) = self.request.take() {
            released.requests.push(request);
        }
    }
}

/// A cell of a page table, covering `2^mip` x `2^mip` pages.
#[derive(Clone, Debug)]
pub struct PageCell {
    /// The pages covered by the cell, without the toroidal offset applied.
    pub rect: IRect,
    pub mip: u32,
    pub payload: PagePayload,
}

/// The tiles and requests dropped by [`PageTable::change_view_rect`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InvalidatedPages {
    pub tiles: Vec<UVec2>,
    pub requests: Vec<PageRequest>,
    /// The pending requests of the cells that stayed in the window, as `(previous, current)`
    /// page coordinates.
    pub moved: Vec<(PageRequest, PageRequest)>,
}

/// The cells of one mip level of the virtual texture.
///
/// The cells are addressed toroidally: when the view moves, the table only shifts its
/// `page_offset` and invalidates the cells that scrolled out of the window, all other
/// cells keep their tiles.
#[derive(Clone, Debug)]
pub struct PageTable {
    pub mip: u32,
    /// The toroidal offset in cells, always inside `[0, cell_count)`.
    pub page_offset: IVec2,
    /// The number of cells along each side.
    pub cell_count: i32,
    /// The number of pages along each side of a cell.
    pub per_cell_size: i32,
    cells: Array2<PageCell>,
}

impl PageTable {
    pub fn new(mip: u32, table_size: u32) -> Self {
        let per_cell_size = 1 << mip;
        let cell_count = (table_size as i32 / per_cell_size).max(1);

        let cells = Array2::from_shape_fn(
            (cell_count as usize, cell_count as usize),
            |(x, y)| {
                let min = IVec2::new(x as i32, y as i32) * per_cell_size;

                PageCell {
                    rect: IRect::from_corners(min, min + per_cell_size),
                    mip,
                    payload: default(),
                }
            },
        );

        Self {
            mip,
            page_offset: IVec2::ZERO,
            cell_count,
            per_cell_size,
            cells,
        }
    }

    /// Shifts the window of the table by `offset` pages.
    ///
    /// Offsets that are not aligned to the cells of this table or that move the window
    /// by a full table or more reset the whole table.
    /// Otherwise only the strips of cells that scrolled out are invalidated.
    pub fn change_view_rect(&mut self, offset: IVec2) -> InvalidatedPages {
        let mut released = InvalidatedPages::default();
        let count = self.cell_count;

        if offset % self.per_cell_size != IVec2::ZERO
            || (offset / self.per_cell_size).abs().cmpge(IVec2::splat(count)).any()
        {
            for cell in &mut self.cells {
                cell.payload.invalidate(&mut released);
            }

            self.page_offset = IVec2::ZERO;

            return released;
        }

        let offset = offset / self.per_cell_size;

        let columns = if offset.x >= 0 {
            0..offset.x
        } else {
            count + offset.x..count
        };

        for (x, y) in iproduct!(columns, 0..count) {
            self.cell_mut_wrapped(x, y).payload.invalidate(&mut released);
        }

        let rows = if offset.y >= 0 {
            0..offset.y
        } else {
            count + offset.y..count
        };

        for (y, x) in iproduct!(rows, 0..count) {
            self.cell_mut_wrapped(x, y).payload.invalidate(&mut released);
        }

        self.page_offset = (self.page_offset + offset).rem_euclid(IVec2::splat(count));

        if offset != IVec2::ZERO {
            let shift = offset * self.per_cell_size;

            for cell in &mut self.cells {
                let Some(request) = cell.payload.request.as_mut() else {
                    continue;
                };

                let previous = *request;
                let page = IVec2::new(request.x as i32, request.y as i32) - shift;
                request.x = page.x as u32;
                request.y = page.y as u32;

                released.moved.push((previous, *request));
            }
        }

        released
    }

    /// Clears the request from whichever cell still waits for it.
    pub fn clear_request(&mut self, request: PageRequest) -> bool {
        self.cells
            .iter_mut()
            .find(|cell| cell.payload.request == Some(request))
            .map(|cell| cell.payload.request = None)
            .is_some()
    }

    /// The storage index of the cell holding the page `(x, y)`.
    pub fn cell_index(&self, x: u32, y: u32) -> UVec2 {
        let cell = IVec2::new(x as i32, y as i32) / self.per_cell_size;

        (cell + self.page_offset)
            .rem_euclid(IVec2::splat(self.cell_count))
            .as_uvec2()
    }

    /// The cell holding the page `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> &PageCell {
        self.cell(self.cell_index(x, y))
    }

    pub fn get_mut(&mut self, x: u32, y: u32) -> &mut PageCell {
        self.cell_mut(self.cell_index(x, y))
    }

    pub fn cell(&self, index: UVec2) -> &PageCell {
        &self.cells[(index.x as usize, index.y as usize)]
    }

    pub fn cell_mut(&mut self, index: UVec2) -> &mut PageCell {
        &mut self.cells[(index.x as usize, index.y as usize)]
    }

    pub fn cells(&self) -> impl Iterator<Item = &PageCell> {
        self.cells.iter()
    }

    /// The rectangle of the cell in page table texels, with the toroidal offset undone.
    pub fn table_rect(&self, cell: &PageCell) -> IRect {
        let table_size = self.cell_count * self.per_cell_size;
        let min = (cell.rect.min - self.page_offset * self.per_cell_size)
            .rem_euclid(IVec2::splat(table_size));

        IRect::from_corners(min, min + cell.rect.size())
    }

    fn cell_mut_wrapped(&mut self, x: i32, y: i32) -> &mut PageCell {
        let index = (IVec2::new(x, y) + self.page_offset).rem_euclid(IVec2::splat(self.cell_count));

        self.cell_mut(index.as_uvec2())
    }
}
