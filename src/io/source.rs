//! Raster I/O seam: the operations the compositing engine needs from a raster
//! library, independent of which library provides them.
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::core::grid::{Bounds, DENSIFY_POINTS, GeoTransform, TargetGrid, geo_to_pixel, grid_bounds};
use crate::core::window::Window;
use crate::error::Result;
use crate::types::{Compression, OutputDataType, Photometric, ResampleKernel};

/// Description of a raster: identity, layout and georeferencing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterProfile {
    pub driver: String,
    pub count: usize,
    pub dtype: OutputDataType,
    pub nodata: Option<f64>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: String,
    pub block_width: usize,
    pub block_height: usize,
    pub compression: Compression,
    pub photometric: Photometric,
}

impl RasterProfile {
    /// Profile of a single-band north-up raster with one block per row.
    pub fn new(width: usize, height: usize, transform: GeoTransform, crs: impl Into<String>) -> Self {
        Self {
            driver: "MEM".to_string(),
            count: 1,
            dtype: OutputDataType::U16,
            nodata: Some(0.0),
            width,
            height,
            transform,
            crs: crs.into(),
            block_width: width,
            block_height: 1,
            compression: Compression::None,
            photometric: Photometric::MinIsBlack,
        }
    }

    pub fn with_blocks(mut self, block_width: usize, block_height: usize) -> Self {
        self.block_width = block_width;
        self.block_height = block_height;
        self
    }

    /// Output profile derived from a reference band: same grid and block
    /// layout, new count, sample type, nodata and photometric tag.
    pub fn derive_output(
        &self,
        count: usize,
        dtype: OutputDataType,
        nodata: f64,
        photometric: Photometric,
        compression: Compression,
    ) -> Self {
        Self {
            driver: "GTiff".to_string(),
            count,
            dtype,
            nodata: Some(nodata),
            photometric,
            compression,
            ..self.clone()
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn bounds(&self) -> Bounds {
        grid_bounds(&self.transform, self.width, self.height)
    }

    pub fn nodata_or_zero(&self) -> f64 {
        self.nodata.unwrap_or(0.0)
    }

    /// Pixel `(row, col)` containing a point in the raster's CRS, `None`
    /// when the point falls outside the raster.
    pub fn pixel_of(&self, x: f64, y: f64) -> Result<Option<(usize, usize)>> {
        let (col, row) = geo_to_pixel(&self.transform, x, y)?;
        if col < 0.0 || row < 0.0 {
            return Ok(None);
        }
        let (col, row) = (col.floor() as usize, row.floor() as usize);
        if col >= self.width || row >= self.height {
            return Ok(None);
        }
        Ok(Some((row, col)))
    }
}

/// One band of one raster, opened for the lifetime of a pipeline invocation.
///
/// Sources are shared by reference with the worker pool, so reads take
/// `&self` and implementations serialize access to any underlying handle.
pub trait BandSource: Send + Sync {
    fn address(&self) -> &str;

    fn profile(&self) -> &RasterProfile;

    /// Read `window`, resampled to `out_shape` (rows, cols). The window may
    /// extend past the raster's right/bottom edge; those pixels come back as
    /// nodata.
    fn read_window(
        &self,
        window: &Window,
        out_shape: (usize, usize),
        kernel: ResampleKernel,
    ) -> Result<Array2<f64>>;

    /// Read the ground extent that `window` covers on the pixel grid
    /// `reference`, resampled to the window's shape. Bands stored at another
    /// resolution than the reference come back on the reference grid.
    fn read_aligned(
        &self,
        reference: &GeoTransform,
        window: &Window,
        kernel: ResampleKernel,
    ) -> Result<Array2<f64>> {
        let own = window.on_grid(reference, &self.profile().transform)?;
        self.read_window(&own, window.shape(), kernel)
    }

    /// Whole raster decimated to `out_shape`.
    fn read_overview(&self, out_shape: (usize, usize), kernel: ResampleKernel) -> Result<Array2<f64>> {
        let p = self.profile();
        self.read_window(&Window::full(p.width, p.height), out_shape, kernel)
    }

    /// Decimation factors of the internal overview levels, finest first.
    fn overview_factors(&self) -> Vec<usize>;

    /// Reproject onto `grid`. Source nodata stays nodata and pixels the
    /// source does not cover are filled with `nodata`.
    fn warp(&self, grid: &TargetGrid, kernel: ResampleKernel, nodata: f64) -> Result<Array2<f64>>;

    /// Value of the pixel containing `(x, y)` (source CRS). Points outside
    /// the raster read as the nodata value, or 0 without one.
    fn sample_point(&self, x: f64, y: f64) -> Result<f64> {
        let p = self.profile();
        match p.pixel_of(x, y)? {
            Some((row, col)) => {
                let sample = self.read_window(&Window::new(col, row, 1, 1), (1, 1), ResampleKernel::Nearest)?;
                Ok(sample[[0, 0]])
            }
            None => Ok(p.nodata_or_zero()),
        }
    }
}

/// Opens band sources and answers CRS questions.
pub trait RasterBackend: Send + Sync {
    type Source: BandSource;

    fn open(&self, address: &str) -> Result<Self::Source>;

    /// Transform points between two CRS identifiers (e.g. `EPSG:4326`),
    /// with `(x, y)` in traditional GIS order (lon, lat for geographic).
    fn transform_points(&self, src_crs: &str, dst_crs: &str, points: &[(f64, f64)]) -> Result<Vec<(f64, f64)>>;

    /// Project a bounding box, densifying its edges so curved edges are
    /// enclosed.
    fn transform_bounds(&self, bounds: &Bounds, src_crs: &str, dst_crs: &str) -> Result<Bounds> {
        if src_crs == dst_crs {
            return Ok(*bounds);
        }
        let pts = self.transform_points(src_crs, dst_crs, &bounds.densified_edges(DENSIFY_POINTS))?;
        Bounds::from_points(&pts).ok_or_else(|| crate::error::Error::InvalidArgument {
            arg: "bounds",
            value: format!("{bounds} does not project from {src_crs} to {dst_crs}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::north_up;

    #[test]
    fn derived_output_keeps_grid() {
        let reference = RasterProfile::new(100, 80, north_up(10.0, 20.0, 30.0, 30.0), "EPSG:32618")
            .with_blocks(256, 256);
        let out = reference.derive_output(3, OutputDataType::U8, 0.0, Photometric::Rgb, Compression::Deflate);
        assert_eq!(out.shape(), reference.shape());
        assert_eq!(out.transform, reference.transform);
        assert_eq!(out.crs, reference.crs);
        assert_eq!((out.block_width, out.block_height), (256, 256));
        assert_eq!(out.count, 3);
        assert_eq!(out.photometric, Photometric::Rgb);
    }

    #[test]
    fn pixel_lookup() {
        let p = RasterProfile::new(4, 3, north_up(0.0, 30.0, 10.0, 10.0), "EPSG:3857");
        assert_eq!(p.pixel_of(15.0, 25.0).unwrap(), Some((0, 1)));
        assert_eq!(p.pixel_of(39.0, 1.0).unwrap(), Some((2, 3)));
        assert_eq!(p.pixel_of(41.0, 25.0).unwrap(), None);
        assert_eq!(p.pixel_of(-1.0, 25.0).unwrap(), None);
    }
}
