//! Work-group tile cache.
//!
//! A tile covers the work-group's pixels plus a border of `pad` pixels on each
//! side. Every thread loads its primary cell (index == thread index); the
//! first `cells - threads` threads also load one overflow cell at
//! `threads + thread index`, so each cell is written exactly once. The tile is
//! only readable after [`TileBuilder::finish`], which stands in for the
//! work-group barrier.

use crate::frame::{SceneFrames, Texel};
use crate::model::GROUP_DIM;

/// Border around the work-group extent on each side.
pub const TILE_PAD: usize = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TileLayout {
    group_width: usize,
    group_height: usize,
    pad: usize,
}

/// Cells one thread loads.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoadPlan {
    pub primary: usize,
    pub overflow: Option<usize>,
}

impl LoadPlan {
    pub fn cells(self) -> impl Iterator<Item = usize> {
        std::iter::once(self.primary).chain(self.overflow)
    }
}

impl TileLayout {
    pub const REFERENCE: TileLayout = TileLayout {
        group_width: GROUP_DIM,
        group_height: GROUP_DIM,
        pad: TILE_PAD,
    };

    /// `None` unless the tile has more cells than threads but at most twice as many.
    pub fn new(group_width: usize, group_height: usize, pad: usize) -> Option<Self> {
        let layout = Self {
            group_width,
            group_height,
            pad,
        };
        let threads = layout.threads();
        let cells = layout.cells();
        (threads > 0 && cells > threads && cells <= 2 * threads).then_some(layout)
    }

    #[inline]
    pub fn group_width(&self) -> usize {
        self.group_width
    }

    #[inline]
    pub fn group_height(&self) -> usize {
        self.group_height
    }

    #[inline]
    pub fn pad(&self) -> usize {
        self.pad
    }

    #[inline]
    pub fn tile_width(&self) -> usize {
        self.group_width + 2 * self.pad
    }

    #[inline]
    pub fn tile_height(&self) -> usize {
        self.group_height + 2 * self.pad
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.group_width * self.group_height
    }

    #[inline]
    pub fn cells(&self) -> usize {
        self.tile_width() * self.tile_height()
    }

    pub fn load_plan(&self, thread: usize) -> LoadPlan {
        let threads = self.threads();
        let remaining = self.cells() - threads;
        LoadPlan {
            primary: thread,
            overflow: (thread < remaining).then_some(threads + thread),
        }
    }

    /// Top-left image coordinate of the tile for work-group `(gx, gy)`.
    pub fn tile_origin(&self, group: (usize, usize)) -> (i64, i64) {
        (
            (group.0 * self.group_width) as i64 - self.pad as i64,
            (group.1 * self.group_height) as i64 - self.pad as i64,
        )
    }

    /// Tile-local coordinate of a linear cell index.
    #[inline]
    pub fn cell_coord(&self, cell: usize) -> (i64, i64) {
        let width = self.tile_width();
        ((cell % width) as i64, (cell / width) as i64)
    }

    /// Linear cell index of a tile-local coordinate, if inside the tile.
    #[inline]
    pub fn cell_index(&self, x: i64, y: i64) -> Option<usize> {
        let inside = x >= 0
            && y >= 0
            && (x as usize) < self.tile_width()
            && (y as usize) < self.tile_height();
        inside.then(|| y as usize * self.tile_width() + x as usize)
    }

    /// How often each cell is written when every thread runs its plan.
    pub fn write_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.cells()];
        for thread in 0..self.threads() {
            for cell in self.load_plan(thread).cells() {
                counts[cell] += 1;
            }
        }
        counts
    }
}

impl Default for TileLayout {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// Where a neighbour texel was read from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FetchSource {
    Tile,
    Direct,
}

/// Tile under cooperative construction.
pub struct TileBuilder {
    layout: TileLayout,
    origin: (i64, i64),
    texels: Vec<Texel>,
    writes: Vec<u8>,
}

impl TileBuilder {
    pub fn new(layout: TileLayout, group: (usize, usize)) -> Self {
        Self {
            layout,
            origin: layout.tile_origin(group),
            texels: vec![Texel::default(); layout.cells()],
            writes: vec![0; layout.cells()],
        }
    }

    /// Runs the load plan of `thread`.
    pub fn load_thread(&mut self, thread: usize, frames: &SceneFrames) {
        for cell in self.layout.load_plan(thread).cells() {
            let (x, y) = self.layout.cell_coord(cell);
            self.texels[cell] = frames.texel(self.origin.0 + x, self.origin.1 + y);
            self.writes[cell] = self.writes[cell].saturating_add(1);
        }
    }

    pub fn write_counts(&self) -> &[u8] {
        &self.writes
    }

    /// Closes the loading phase; the tile is read-only from here on.
    pub fn finish(self) -> TileCache {
        debug_assert!(
            self.writes.iter().all(|&count| count == 1),
            "tile cells must be loaded exactly once"
        );
        TileCache {
            layout: self.layout,
            origin: self.origin,
            texels: self.texels,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TileCache {
    layout: TileLayout,
    origin: (i64, i64),
    texels: Vec<Texel>,
}

impl TileCache {
    pub fn load(layout: TileLayout, group: (usize, usize), frames: &SceneFrames) -> Self {
        let mut builder = TileBuilder::new(layout, group);
        for thread in 0..layout.threads() {
            builder.load_thread(thread, frames);
        }
        builder.finish()
    }

    pub fn layout(&self) -> TileLayout {
        self.layout
    }

    pub fn origin(&self) -> (i64, i64) {
        self.origin
    }

    /// Texel at a tile-local coordinate, if inside the tile.
    #[inline]
    pub fn get(&self, x: i64, y: i64) -> Option<Texel> {
        self.layout.cell_index(x, y).map(|cell| self.texels[cell])
    }

    /// Texel at a tile-local coordinate, falling back to the source images
    /// outside the tile with the same coordinate mapping the load used.
    #[inline]
    pub fn resolve(&self, x: i64, y: i64, frames: &SceneFrames) -> (Texel, FetchSource) {
        match self.get(x, y) {
            Some(texel) => (texel, FetchSource::Tile),
            None => (
                frames.texel(
                    self.origin.0.saturating_add(x),
                    self.origin.1.saturating_add(y),
                ),
                FetchSource::Direct,
            ),
        }
    }
}
