use std::path::Path;

use gdal::cpl::CslStringList;
use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager, Metadata};
use tracing::info;

use crate::error::Result;
use crate::io::gdal::GdalError;
use crate::io::memory::CompositeRaster;
use crate::types::{Compression, OutputDataType, Photometric, ResampleKernel};

/// Decimation factors of the optional overview pyramid.
pub const OVERVIEW_LEVELS: [i32; 6] = [2, 4, 8, 16, 32, 64];

/// Metadata key recording the kernel used to build the pyramid.
pub const OVERVIEW_RESAMPLING_KEY: &str = "OVR_RESAMPLING_ALG";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiffOptions {
    /// Build an internal overview pyramid with this kernel.
    pub overviews: Option<ResampleKernel>,
    pub tiled: bool,
}

impl Default for TiffOptions {
    fn default() -> Self {
        Self {
            overviews: None,
            tiled: true,
        }
    }
}

fn creation_options(raster: &CompositeRaster, options: &TiffOptions) -> std::result::Result<CslStringList, GdalError> {
    let profile = raster.profile();
    let mut opts = CslStringList::new();
    opts.set_name_value("INTERLEAVE", "PIXEL")?;
    let compression = match profile.compression {
        // JPEG-in-TIFF only holds 8-bit samples
        Compression::Jpeg if profile.dtype != OutputDataType::U8 => Compression::Deflate,
        c => c,
    };
    if let Some(c) = compression.creation_value() {
        opts.set_name_value("COMPRESS", c)?;
    }
    if profile.photometric == Photometric::Rgb && profile.count == 3 {
        opts.set_name_value("PHOTOMETRIC", Photometric::Rgb.creation_value())?;
    }
    if options.tiled && profile.width > 256 && profile.height > 256 {
        opts.set_name_value("TILED", "YES")?;
        opts.set_name_value("BLOCKXSIZE", "256")?;
        opts.set_name_value("BLOCKYSIZE", "256")?;
    }
    Ok(opts)
}

fn write_typed<T: GdalType + Copy>(
    path: &Path,
    raster: &CompositeRaster,
    options: &CslStringList,
    cast: impl Fn(f64) -> T,
) -> std::result::Result<Dataset, GdalError> {
    let profile = raster.profile();
    let (cols, rows) = (profile.width, profile.height);
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut ds = driver.create_with_band_type_with_options::<T, _>(path, cols, rows, profile.count, options)?;
    ds.set_geo_transform(&profile.transform)?;
    ds.set_spatial_ref(&SpatialRef::from_definition(&profile.crs)?)?;
    for idx in 0..profile.count {
        let mut band = ds.rasterband(idx + 1)?;
        band.set_no_data_value(profile.nodata)?;
        let data: Vec<T> = raster.band(idx).iter().map(|&v| cast(v)).collect();
        let mut buf = Buffer::new((cols, rows), data);
        band.write((0, 0), (cols, rows), &mut buf)?;
    }
    Ok(ds)
}

/// Write a composite raster as GeoTIFF using its profile's sample type,
/// nodata, compression and photometric tag.
pub fn write_geotiff(raster: &CompositeRaster, path: &Path, options: &TiffOptions) -> Result<()> {
    let profile = raster.profile();
    let opts = creation_options(raster, options)?;
    let mut ds = match profile.dtype {
        OutputDataType::U8 => write_typed::<u8>(path, raster, &opts, |v| v as u8)?,
        OutputDataType::U16 => write_typed::<u16>(path, raster, &opts, |v| v as u16)?,
        OutputDataType::F32 => write_typed::<f32>(path, raster, &opts, |v| v as f32)?,
    };
    if let Some(kernel) = options.overviews {
        ds.build_overviews(kernel.gdal_name(), &OVERVIEW_LEVELS, &[])
            .map_err(GdalError::from)?;
        ds.set_metadata_item(OVERVIEW_RESAMPLING_KEY, kernel.gdal_name(), "")
            .map_err(GdalError::from)?;
    }
    info!(
        "Wrote {} ({}x{}, {} bands, {})",
        path.display(),
        profile.width,
        profile.height,
        profile.count,
        profile.dtype
    );
    Ok(())
}
