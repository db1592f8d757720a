use std::ffi::{c_double, c_int};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use gdal::raster::{GdalDataType, ResampleAlg};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::{Dataset, DriverManager, errors::GdalError as GdalCrateError};
use ndarray::{Array2, s};
use thiserror::Error;
use tracing::debug;

use crate::core::grid::TargetGrid;
use crate::core::window::Window;
use crate::error::Result;
use crate::io::source::{BandSource, RasterBackend, RasterProfile};
use crate::types::{Compression, OutputDataType, Photometric, ResampleKernel};

/// Errors raised by the GDAL backend
#[derive(Debug, Error)]
pub enum GdalError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] GdalCrateError),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Dimension mismatch: expected {0}x{1}, got {2}")]
    DimensionMismatch(usize, usize, usize),
    #[error("Dataset handle poisoned: {0}")]
    Poisoned(String),
    #[error("Warp failed: {0}")]
    Warp(String),
}

// Helper to extract EPSG code from WKT authority tag
fn parse_epsg(wkt: &str) -> Option<String> {
    const KEY: &str = "AUTHORITY[\"EPSG\",\"";
    let idx = wkt.rfind(KEY)?;
    let start = idx + KEY.len();
    let end = wkt[start..].find('"')?;
    Some(format!("EPSG:{}", &wkt[start..start + end]))
}

fn crs_identifier(ds: &Dataset) -> String {
    let proj = ds.projection();
    if proj.starts_with("EPSG:") {
        proj
    } else {
        parse_epsg(&proj).unwrap_or(proj)
    }
}

fn spatial_ref(crs: &str) -> std::result::Result<SpatialRef, GdalError> {
    let mut srs = SpatialRef::from_definition(crs)?;
    srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(srs)
}

fn rasterio_alg(kernel: ResampleKernel) -> ResampleAlg {
    match kernel {
        ResampleKernel::Nearest => ResampleAlg::NearestNeighbour,
        ResampleKernel::Bilinear => ResampleAlg::Bilinear,
        ResampleKernel::Cubic => ResampleAlg::Cubic,
        ResampleKernel::Lanczos => ResampleAlg::Lanczos,
    }
}

fn warp_alg(kernel: ResampleKernel) -> gdal_sys::GDALResampleAlg::Type {
    match kernel {
        ResampleKernel::Nearest => gdal_sys::GDALResampleAlg::GRA_NearestNeighbour,
        ResampleKernel::Bilinear => gdal_sys::GDALResampleAlg::GRA_Bilinear,
        ResampleKernel::Cubic => gdal_sys::GDALResampleAlg::GRA_Cubic,
        ResampleKernel::Lanczos => gdal_sys::GDALResampleAlg::GRA_Lanczos,
    }
}

fn output_type(t: GdalDataType) -> OutputDataType {
    match t {
        GdalDataType::UInt8 => OutputDataType::U8,
        GdalDataType::UInt16 | GdalDataType::Int16 => OutputDataType::U16,
        _ => OutputDataType::F32,
    }
}

/// Opens band files through GDAL (local paths or `/vsi*` virtual paths).
#[derive(Debug, Default, Clone)]
pub struct GdalBackend;

impl GdalBackend {
    /// Configure GDAL for remote, block-addressed band files.
    pub fn new() -> Result<Self> {
        gdal::config::set_config_option("GDAL_DISABLE_READDIR_ON_OPEN", "EMPTY_DIR")
            .map_err(GdalError::from)?;
        gdal::config::set_config_option("CPL_VSIL_CURL_ALLOWED_EXTENSIONS", ".TIF,.tif,.jp2,.vrt")
            .map_err(GdalError::from)?;
        Ok(Self)
    }
}

/// First band of a GDAL dataset. The handle is opened once and every read
/// goes through the mutex.
pub struct GdalBandSource {
    address: String,
    dataset: Mutex<Dataset>,
    profile: RasterProfile,
    overviews: Vec<usize>,
}

impl GdalBandSource {
    pub fn open(address: &str) -> std::result::Result<Self, GdalError> {
        let dataset = Dataset::open(Path::new(address))?;
        if dataset.raster_count() == 0 {
            return Err(GdalError::UnsupportedFormat(format!("{address}: no raster bands")));
        }
        let (width, height) = dataset.raster_size();
        let transform = dataset
            .geo_transform()
            .unwrap_or([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let crs = crs_identifier(&dataset);
        let band = dataset.rasterband(1)?;
        let (block_width, block_height) = band.block_size();
        let overview_count = band.overview_count()?;
        let mut overviews = Vec::with_capacity(overview_count.max(0) as usize);
        for i in 0..overview_count {
            let (ow, _) = band.overview(i as usize)?.size();
            if ow > 0 {
                overviews.push(((width as f64) / (ow as f64)).round() as usize);
            }
        }
        let profile = RasterProfile {
            driver: dataset.driver().short_name(),
            count: dataset.raster_count() as usize,
            dtype: output_type(band.band_type()),
            nodata: band.no_data_value(),
            width,
            height,
            transform,
            crs,
            block_width,
            block_height,
            compression: Compression::None,
            photometric: Photometric::MinIsBlack,
        };
        drop(band);
        debug!(
            "Opened {} ({}x{}, blocks {}x{}, overviews {:?})",
            address, width, height, block_width, block_height, overviews
        );
        Ok(Self {
            address: address.to_string(),
            dataset: Mutex::new(dataset),
            profile,
            overviews,
        })
    }

    fn lock(&self) -> std::result::Result<MutexGuard<'_, Dataset>, GdalError> {
        self.dataset
            .lock()
            .map_err(|_| GdalError::Poisoned(self.address.clone()))
    }

    /// Plain (bounded) read of `window` into `(rows, cols)`.
    fn read_bounded(
        &self,
        window: &Window,
        (rows, cols): (usize, usize),
        kernel: ResampleKernel,
    ) -> std::result::Result<Array2<f64>, GdalError> {
        let ds = self.lock()?;
        let band = ds.rasterband(1)?;
        let buf = band.read_as::<f64>(
            (window.col_off as isize, window.row_off as isize),
            (window.width, window.height),
            (cols, rows),
            Some(rasterio_alg(kernel)),
        )?;
        let data = buf.data().to_vec();
        let len = data.len();
        Array2::from_shape_vec((rows, cols), data)
            .map_err(|_| GdalError::DimensionMismatch(cols, rows, len))
    }

    fn warp_into(
        &self,
        grid: &TargetGrid,
        kernel: ResampleKernel,
        nodata: f64,
    ) -> std::result::Result<Array2<f64>, GdalError> {
        let driver = DriverManager::get_driver_by_name("MEM")?;
        let mut dst = driver.create_with_band_type::<f64, _>("", grid.width, grid.height, 1)?;
        dst.set_geo_transform(&grid.transform)?;
        dst.set_spatial_ref(&spatial_ref(&grid.crs)?)?;
        {
            let mut band = dst.rasterband(1)?;
            band.set_no_data_value(Some(nodata))?;
            band.fill(nodata, None)?;
        }

        let src_nodata = self.profile.nodata_or_zero();
        let src = self.lock()?;
        unsafe {
            let opts = gdal_sys::GDALCreateWarpOptions();
            (*opts).hSrcDS = src.c_dataset();
            (*opts).hDstDS = dst.c_dataset();
            (*opts).nBandCount = 1;
            (*opts).panSrcBands = gdal_sys::CPLMalloc(std::mem::size_of::<c_int>()).cast::<c_int>();
            (*opts).panSrcBands.write(1);
            (*opts).panDstBands = gdal_sys::CPLMalloc(std::mem::size_of::<c_int>()).cast::<c_int>();
            (*opts).panDstBands.write(1);
            (*opts).eResampleAlg = warp_alg(kernel);
            // freed by GDALDestroyWarpOptions
            (*opts).padfSrcNoDataReal = gdal_sys::CPLMalloc(std::mem::size_of::<c_double>()).cast::<c_double>();
            (*opts).padfSrcNoDataReal.write(src_nodata);
            (*opts).padfDstNoDataReal = gdal_sys::CPLMalloc(std::mem::size_of::<c_double>()).cast::<c_double>();
            (*opts).padfDstNoDataReal.write(nodata);
            (*opts).pfnTransformer = Some(gdal_sys::GDALGenImgProjTransform);
            (*opts).pTransformerArg = gdal_sys::GDALCreateGenImgProjTransformer(
                src.c_dataset(),
                std::ptr::null_mut(),
                dst.c_dataset(),
                std::ptr::null_mut(),
                0,
                0.0,
                0,
            );
            if (*opts).pTransformerArg.is_null() {
                gdal_sys::GDALDestroyWarpOptions(opts);
                return Err(GdalError::Warp(format!("no transformer for {}", self.address)));
            }
            let operation = gdal_sys::GDALCreateWarpOperation(opts);
            if operation.is_null() {
                gdal_sys::GDALDestroyGenImgProjTransformer((*opts).pTransformerArg);
                gdal_sys::GDALDestroyWarpOptions(opts);
                return Err(GdalError::Warp(format!("no warp operation for {}", self.address)));
            }
            let rc = gdal_sys::GDALChunkAndWarpImage(
                operation,
                0,
                0,
                grid.width as c_int,
                grid.height as c_int,
            );
            gdal_sys::GDALDestroyWarpOperation(operation);
            gdal_sys::GDALDestroyGenImgProjTransformer((*opts).pTransformerArg);
            gdal_sys::GDALDestroyWarpOptions(opts);
            if rc != gdal_sys::CPLErr::CE_None {
                return Err(GdalError::Warp(format!("{} -> {}", self.address, grid.crs)));
            }
        }
        drop(src);

        let band = dst.rasterband(1)?;
        let buf = band.read_as::<f64>((0, 0), (grid.width, grid.height), (grid.width, grid.height), None)?;
        let data = buf.data().to_vec();
        let len = data.len();
        Array2::from_shape_vec(grid.shape(), data)
            .map_err(|_| GdalError::DimensionMismatch(grid.width, grid.height, len))
    }
}

impl BandSource for GdalBandSource {
    fn address(&self) -> &str {
        &self.address
    }

    fn profile(&self) -> &RasterProfile {
        &self.profile
    }

    fn read_window(
        &self,
        window: &Window,
        (rows, cols): (usize, usize),
        kernel: ResampleKernel,
    ) -> Result<Array2<f64>> {
        let nodata = self.profile.nodata_or_zero();
        let full = Window::full(self.profile.width, self.profile.height);
        if window.fits_within(self.profile.width, self.profile.height) {
            return Ok(self.read_bounded(window, (rows, cols), kernel)?);
        }
        // Boundless: read the covered part and paste it into a nodata canvas.
        let mut out = Array2::from_elem((rows, cols), nodata);
        let Some(inner) = window.intersection(&full) else {
            return Ok(out);
        };
        let sx = cols as f64 / window.width as f64;
        let sy = rows as f64 / window.height as f64;
        let c0 = ((inner.col_off - window.col_off) as f64 * sx).round() as usize;
        let c1 = (((inner.col_end() - window.col_off) as f64 * sx).round() as usize).min(cols);
        let r0 = ((inner.row_off - window.row_off) as f64 * sy).round() as usize;
        let r1 = (((inner.row_end() - window.row_off) as f64 * sy).round() as usize).min(rows);
        if c1 > c0 && r1 > r0 {
            let part = self.read_bounded(&inner, (r1 - r0, c1 - c0), kernel)?;
            out.slice_mut(s![r0..r1, c0..c1]).assign(&part);
        }
        Ok(out)
    }

    fn overview_factors(&self) -> Vec<usize> {
        self.overviews.clone()
    }

    fn warp(&self, grid: &TargetGrid, kernel: ResampleKernel, nodata: f64) -> Result<Array2<f64>> {
        Ok(self.warp_into(grid, kernel, nodata)?)
    }
}

impl RasterBackend for GdalBackend {
    type Source = GdalBandSource;

    fn open(&self, address: &str) -> Result<GdalBandSource> {
        Ok(GdalBandSource::open(address)?)
    }

    fn transform_points(&self, src_crs: &str, dst_crs: &str, points: &[(f64, f64)]) -> Result<Vec<(f64, f64)>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }
        let src = spatial_ref(src_crs)?;
        let dst = spatial_ref(dst_crs)?;
        let transform = CoordTransform::new(&src, &dst).map_err(GdalError::from)?;
        let mut xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let mut ys: Vec<f64> = points.iter().map(|p| p.1).collect();
        let mut zs = vec![0.0_f64; points.len()];
        transform
            .transform_coords(&mut xs, &mut ys, &mut zs)
            .map_err(GdalError::from)?;
        Ok(xs.into_iter().zip(ys).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epsg_from_wkt_authority() {
        let wkt = r#"PROJCS["WGS 84 / UTM zone 18N",GEOGCS["WGS 84"],AUTHORITY["EPSG","32618"]]"#;
        assert_eq!(parse_epsg(wkt), Some("EPSG:32618".to_string()));
        assert_eq!(parse_epsg("LOCAL_CS[\"x\"]"), None);
    }

    #[test]
    fn kernels_map_to_warp_algorithms() {
        assert_eq!(warp_alg(ResampleKernel::Bilinear), gdal_sys::GDALResampleAlg::GRA_Bilinear);
        assert_eq!(warp_alg(ResampleKernel::Nearest), gdal_sys::GDALResampleAlg::GRA_NearestNeighbour);
    }
}
