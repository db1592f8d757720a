//! Block-aligned window planning.
//!
//! Windows follow the native block grid of the reference raster so every
//! per-band reader touching the same window boundaries reads each storage
//! block at most once. The last row/column of windows is clipped to the
//! raster extent.
use serde::{Deserialize, Serialize};

use crate::core::grid::{GeoTransform, geo_to_pixel, pixel_to_geo};
use crate::error::Result;

/// Slack below which a pixel coordinate counts as lying on a pixel edge.
const EDGE_EPSILON: f64 = 1e-6;

/// Rectangle in pixel space: column/row offset plus width/height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    /// Window covering a whole raster of the given size.
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Array shape `(rows, cols)` of a sample read over this window.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn col_end(&self) -> usize {
        self.col_off + self.width
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.height
    }

    /// True when the window lies entirely within a `width` x `height` raster.
    pub fn fits_within(&self, width: usize, height: usize) -> bool {
        self.col_end() <= width && self.row_end() <= height
    }

    /// Overlapping part of two windows, if any.
    pub fn intersection(&self, other: &Window) -> Option<Window> {
        let c0 = self.col_off.max(other.col_off);
        let r0 = self.row_off.max(other.row_off);
        let c1 = self.col_end().min(other.col_end());
        let r1 = self.row_end().min(other.row_end());
        if c1 > c0 && r1 > r0 {
            Some(Window::new(c0, r0, c1 - c0, r1 - r0))
        } else {
            None
        }
    }

    /// The window of the grid `to` covering the ground extent of this window
    /// on the grid `from`, widened to whole pixels. Offsets before the start
    /// of `to` are clipped to 0.
    pub fn on_grid(&self, from: &GeoTransform, to: &GeoTransform) -> Result<Window> {
        if from == to {
            return Ok(*self);
        }
        let corners = [
            (self.col_off, self.row_off),
            (self.col_end(), self.row_off),
            (self.col_off, self.row_end()),
            (self.col_end(), self.row_end()),
        ];
        let (mut c0, mut r0) = (f64::INFINITY, f64::INFINITY);
        let (mut c1, mut r1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (col, row) in corners {
            let (x, y) = pixel_to_geo(from, col as f64, row as f64);
            let (c, r) = geo_to_pixel(to, x, y)?;
            c0 = c0.min(c);
            r0 = r0.min(r);
            c1 = c1.max(c);
            r1 = r1.max(r);
        }
        let c0 = (c0 + EDGE_EPSILON).floor().max(0.0) as usize;
        let r0 = (r0 + EDGE_EPSILON).floor().max(0.0) as usize;
        let c1 = (c1 - EDGE_EPSILON).ceil().max(0.0) as usize;
        let r1 = (r1 - EDGE_EPSILON).ceil().max(0.0) as usize;
        Ok(Window::new(c0, r0, c1.saturating_sub(c0), r1.saturating_sub(r0)))
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Window(col_off={}, row_off={}, width={}, height={})",
            self.col_off, self.row_off, self.width, self.height
        )
    }
}

/// Plan the windows tiling a `width` x `height` raster whose native blocks are
/// `block_width` x `block_height`, in row-major order.
///
/// A zero block dimension means the block spans the whole raster along that
/// axis. A degenerate (0-sized) raster yields no windows.
pub fn block_windows(
    width: usize,
    height: usize,
    block_width: usize,
    block_height: usize,
) -> Vec<Window> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let bw = if block_width == 0 { width } else { block_width };
    let bh = if block_height == 0 { height } else { block_height };

    let n_cols = width.div_ceil(bw);
    let n_rows = height.div_ceil(bh);
    let mut windows = Vec::with_capacity(n_cols * n_rows);
    for r in 0..n_rows {
        let row_off = r * bh;
        let h = bh.min(height - row_off);
        for c in 0..n_cols {
            let col_off = c * bw;
            let w = bw.min(width - col_off);
            windows.push(Window::new(col_off, row_off, w, h));
        }
    }
    windows
}
