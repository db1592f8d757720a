//! In-memory rasters: a backend over owned arrays and the composite raster
//! that pipelines write into.
use std::collections::HashMap;
use std::sync::Arc;

use ndarray::{Array2, Array3, ArrayView2, s};

use crate::core::grid::{
    GeoTransform, TargetGrid, WEB_MERCATOR, WGS84, geo_to_pixel, lonlat_to_mercator,
    mercator_to_lonlat, pixel_to_geo,
};
use crate::core::resample::{resample_to_shape, sample};
use crate::core::window::Window;
use crate::error::{Error, Result};
use crate::io::source::{BandSource, RasterBackend, RasterProfile};
use crate::types::{OutputDataType, ResampleKernel};

/// One band held in memory with its profile.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    pub profile: RasterProfile,
    pub data: Array2<f64>,
    pub overviews: Vec<usize>,
}

impl MemoryRaster {
    pub fn new(data: Array2<f64>, transform: GeoTransform, crs: &str) -> Self {
        let (rows, cols) = data.dim();
        Self {
            profile: RasterProfile::new(cols, rows, transform, crs),
            data,
            overviews: vec![2, 4, 8, 16],
        }
    }

    pub fn with_blocks(mut self, block_width: usize, block_height: usize) -> Self {
        self.profile = self.profile.with_blocks(block_width, block_height);
        self
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.profile.nodata = nodata;
        self
    }

    pub fn with_dtype(mut self, dtype: OutputDataType) -> Self {
        self.profile.dtype = dtype;
        self
    }

    pub fn with_overviews(mut self, factors: Vec<usize>) -> Self {
        self.overviews = factors;
        self
    }
}

/// Point transform between the reference systems the memory backend knows:
/// identity, and WGS84 <-> spherical mercator.
pub fn transform_point(src_crs: &str, dst_crs: &str, x: f64, y: f64) -> Result<(f64, f64)> {
    let src = src_crs.to_ascii_uppercase();
    let dst = dst_crs.to_ascii_uppercase();
    if src == dst {
        return Ok((x, y));
    }
    match (src.as_str(), dst.as_str()) {
        (WGS84, WEB_MERCATOR) => Ok(lonlat_to_mercator(x, y)),
        (WEB_MERCATOR, WGS84) => Ok(mercator_to_lonlat(x, y)),
        _ => Err(Error::Unsupported(format!(
            "in-memory transform from {src_crs} to {dst_crs}"
        ))),
    }
}

/// Address -> raster map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    rasters: HashMap<String, Arc<MemoryRaster>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: impl Into<String>, raster: MemoryRaster) {
        self.rasters.insert(address.into(), Arc::new(raster));
    }

    pub fn with_raster(mut self, address: impl Into<String>, raster: MemoryRaster) -> Self {
        self.insert(address, raster);
        self
    }

    pub fn contains(&self, address: &str) -> bool {
        self.rasters.contains_key(address)
    }
}

#[derive(Debug, Clone)]
pub struct MemorySource {
    address: String,
    raster: Arc<MemoryRaster>,
}

impl BandSource for MemorySource {
    fn address(&self) -> &str {
        &self.address
    }

    fn profile(&self) -> &RasterProfile {
        &self.raster.profile
    }

    fn read_window(
        &self,
        window: &Window,
        (rows, cols): (usize, usize),
        kernel: ResampleKernel,
    ) -> Result<Array2<f64>> {
        let nodata = self.raster.profile.nodata_or_zero();
        let data = &self.raster.data;
        if window.is_empty() || rows == 0 || cols == 0 {
            return Ok(Array2::from_elem((rows, cols), nodata));
        }
        let sx = window.width as f64 / cols as f64;
        let sy = window.height as f64 / rows as f64;
        Ok(Array2::from_shape_fn((rows, cols), |(r, c)| {
            let x = window.col_off as f64 + (c as f64 + 0.5) * sx;
            let y = window.row_off as f64 + (r as f64 + 0.5) * sy;
            sample(data, x, y, nodata, kernel)
        }))
    }

    fn read_aligned(
        &self,
        reference: &GeoTransform,
        window: &Window,
        kernel: ResampleKernel,
    ) -> Result<Array2<f64>> {
        let profile = &self.raster.profile;
        if *reference == profile.transform {
            return self.read_window(window, window.shape(), kernel);
        }
        let nodata = profile.nodata_or_zero();
        let mut out = Array2::from_elem(window.shape(), nodata);
        for ((r, c), px) in out.indexed_iter_mut() {
            let (gx, gy) = pixel_to_geo(
                reference,
                (window.col_off + c) as f64 + 0.5,
                (window.row_off + r) as f64 + 0.5,
            );
            let (col, row) = geo_to_pixel(&profile.transform, gx, gy)?;
            *px = sample(&self.raster.data, col, row, nodata, kernel);
        }
        Ok(out)
    }

    fn read_overview(&self, out_shape: (usize, usize), kernel: ResampleKernel) -> Result<Array2<f64>> {
        Ok(resample_to_shape(
            &self.raster.data,
            out_shape,
            self.raster.profile.nodata_or_zero(),
            kernel,
        ))
    }

    fn overview_factors(&self) -> Vec<usize> {
        self.raster.overviews.clone()
    }

    fn warp(&self, grid: &TargetGrid, kernel: ResampleKernel, nodata: f64) -> Result<Array2<f64>> {
        let profile = &self.raster.profile;
        let src_nodata = profile.nodata_or_zero();
        let mut out = Array2::from_elem(grid.shape(), nodata);
        for ((r, c), px) in out.indexed_iter_mut() {
            let (gx, gy) = pixel_to_geo(&grid.transform, c as f64 + 0.5, r as f64 + 0.5);
            let (sx, sy) = transform_point(&grid.crs, &profile.crs, gx, gy)?;
            let (col, row) = geo_to_pixel(&profile.transform, sx, sy)?;
            let v = sample(&self.raster.data, col, row, src_nodata, kernel);
            if v != src_nodata {
                *px = v;
            }
        }
        Ok(out)
    }
}

impl RasterBackend for MemoryBackend {
    type Source = MemorySource;

    fn open(&self, address: &str) -> Result<MemorySource> {
        let raster = self.rasters.get(address).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no raster at {address}"),
            ))
        })?;
        Ok(MemorySource {
            address: address.to_string(),
            raster: Arc::clone(raster),
        })
    }

    fn transform_points(&self, src_crs: &str, dst_crs: &str, points: &[(f64, f64)]) -> Result<Vec<(f64, f64)>> {
        points
            .iter()
            .map(|&(x, y)| transform_point(src_crs, dst_crs, x, y))
            .collect()
    }
}

/// Output raster under construction: `(bands, rows, cols)` samples plus the
/// profile fixed at creation. Owned by a single writer.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeRaster {
    profile: RasterProfile,
    data: Array3<f64>,
}

impl CompositeRaster {
    /// Allocate a raster for `profile`, every sample set to its nodata value.
    pub fn new(profile: RasterProfile) -> Self {
        let fill = profile.nodata_or_zero();
        let data = Array3::from_elem((profile.count, profile.height, profile.width), fill);
        Self { profile, data }
    }

    /// Wrap an existing stack. Its shape must match the profile.
    pub fn from_array(profile: RasterProfile, data: Array3<f64>) -> Result<Self> {
        let (count, rows, cols) = data.dim();
        if count != profile.count || (rows, cols) != profile.shape() {
            return Err(Error::ShapeMismatch {
                expected: profile.shape(),
                got: (rows, cols),
            });
        }
        Ok(Self { profile, data })
    }

    pub fn profile(&self) -> &RasterProfile {
        &self.profile
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn into_data(self) -> Array3<f64> {
        self.data
    }

    pub fn band(&self, index: usize) -> ArrayView2<'_, f64> {
        self.data.slice(s![index, .., ..])
    }

    /// Write one sample per band over `window`.
    pub fn write_window(&mut self, window: &Window, bands: &[Array2<f64>]) -> Result<()> {
        if !window.fits_within(self.profile.width, self.profile.height) {
            return Err(Error::WindowOutOfBounds {
                window: window.to_string(),
                width: self.profile.width,
                height: self.profile.height,
            });
        }
        if bands.len() != self.profile.count {
            return Err(Error::InvalidArgument {
                arg: "bands",
                value: format!("{} samples for {} output bands", bands.len(), self.profile.count),
            });
        }
        for (idx, band) in bands.iter().enumerate() {
            if band.dim() != window.shape() {
                return Err(Error::ShapeMismatch {
                    expected: window.shape(),
                    got: band.dim(),
                });
            }
            self.data
                .slice_mut(s![
                    idx,
                    window.row_off..window.row_end(),
                    window.col_off..window.col_end()
                ])
                .assign(band);
        }
        Ok(())
    }

    /// Write a whole band.
    pub fn write_band(&mut self, index: usize, band: &Array2<f64>) -> Result<()> {
        if index >= self.profile.count {
            return Err(Error::InvalidArgument {
                arg: "band",
                value: index.to_string(),
            });
        }
        if band.dim() != self.profile.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.profile.shape(),
                got: band.dim(),
            });
        }
        self.data.slice_mut(s![index, .., ..]).assign(band);
        Ok(())
    }

    /// Samples converted to the declared output type (truncating and
    /// saturating for integer types).
    pub fn typed(&self) -> Array3<f64> {
        let dtype = self.profile.dtype;
        self.data.mapv(|v| dtype.cast(v))
    }

    /// Samples of one band as bytes, for 8-bit products.
    pub fn band_u8(&self, index: usize) -> Vec<u8> {
        self.band(index).iter().map(|&v| v as u8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::{Bounds, north_up};
    use ndarray::array;

    fn raster() -> MemoryRaster {
        MemoryRaster::new(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            north_up(0.0, 20.0, 10.0, 10.0),
            WEB_MERCATOR,
        )
    }

    #[test]
    fn window_reads_are_boundless() {
        let backend = MemoryBackend::new().with_raster("a", raster());
        let src = backend.open("a").unwrap();
        let out = src
            .read_window(&Window::new(1, 1, 3, 2), (2, 3), ResampleKernel::Nearest)
            .unwrap();
        assert_eq!(out, array![[5.0, 6.0, 0.0], [0.0, 0.0, 0.0]]);
    }

    #[test]
    fn aligned_read_upsamples_coarse_band() {
        let backend = MemoryBackend::new().with_raster("a", raster());
        let src = backend.open("a").unwrap();
        let fine = north_up(0.0, 20.0, 5.0, 5.0);
        let out = src
            .read_aligned(&fine, &Window::new(2, 1, 4, 2), ResampleKernel::Nearest)
            .unwrap();
        assert_eq!(out, array![[2.0, 2.0, 3.0, 3.0], [5.0, 5.0, 6.0, 6.0]]);
        let same = src
            .read_aligned(&raster().profile.transform, &Window::new(1, 0, 2, 1), ResampleKernel::Nearest)
            .unwrap();
        assert_eq!(same, array![[2.0, 3.0]]);
    }

    #[test]
    fn missing_address_fails_to_open() {
        let backend = MemoryBackend::new();
        assert!(matches!(backend.open("nope"), Err(Error::Io(_))));
    }

    #[test]
    fn identity_warp_reproduces_source() {
        let backend = MemoryBackend::new().with_raster("a", raster());
        let src = backend.open("a").unwrap();
        let grid = TargetGrid::new(WEB_MERCATOR, north_up(0.0, 20.0, 10.0, 10.0), 3, 2);
        let out = src.warp(&grid, ResampleKernel::Bilinear, 0.0).unwrap();
        assert_eq!(out, raster().data);
    }

    #[test]
    fn warp_outside_source_is_nodata() {
        let backend = MemoryBackend::new().with_raster("a", raster());
        let src = backend.open("a").unwrap();
        let grid = TargetGrid::new(WEB_MERCATOR, north_up(20.0, 20.0, 10.0, 10.0), 2, 1);
        let out = src.warp(&grid, ResampleKernel::Bilinear, 0.0).unwrap();
        assert_eq!(out, array![[3.0, 0.0]]);
    }

    #[test]
    fn point_sampling() {
        let backend = MemoryBackend::new().with_raster("a", raster());
        let src = backend.open("a").unwrap();
        assert_eq!(src.sample_point(25.0, 5.0).unwrap(), 6.0);
        assert_eq!(src.sample_point(100.0, 5.0).unwrap(), 0.0);
    }

    #[test]
    fn bounds_transform_between_wgs84_and_mercator() {
        let backend = MemoryBackend::new();
        let b = Bounds::new(-1.0, -1.0, 1.0, 1.0);
        let m = backend.transform_bounds(&b, WGS84, WEB_MERCATOR).unwrap();
        assert!(m.left < 0.0 && m.right > 0.0);
        let back = backend.transform_bounds(&m, WEB_MERCATOR, WGS84).unwrap();
        assert!((back.left + 1.0).abs() < 1e-9 && (back.top - 1.0).abs() < 1e-9);
        assert!(backend.transform_bounds(&b, WGS84, "EPSG:32618").is_err());
    }

    #[test]
    fn composite_window_writes() {
        let profile = RasterProfile::new(4, 2, north_up(0.0, 0.0, 1.0, 1.0), WEB_MERCATOR)
            .derive_output(
                1,
                OutputDataType::U8,
                0.0,
                crate::types::Photometric::MinIsBlack,
                crate::types::Compression::None,
            );
        let mut out = CompositeRaster::new(profile);
        out.write_window(&Window::new(2, 0, 2, 2), &[array![[1.0, 2.0], [3.0, 300.0]]])
            .unwrap();
        assert_eq!(out.band(0), array![[0.0, 0.0, 1.0, 2.0], [0.0, 0.0, 3.0, 300.0]]);
        assert_eq!(out.typed()[[0, 1, 3]], 255.0);
        assert!(out.write_window(&Window::new(3, 0, 2, 2), &[array![[1.0, 2.0], [3.0, 4.0]]]).is_err());
        assert!(out.write_window(&Window::new(0, 0, 2, 2), &[array![[1.0]]]).is_err());
    }
}
