//! High-level pipelines: full-resolution composites, overview images, point
//! and area index queries, and multi-scene mosaics. Each call validates its
//! request before touching any raster, opens its band sources once, and tears
//! its worker pool down before returning.
use std::collections::HashMap;

use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::expression::{BandExpression, pass_through};
use crate::core::grid::{Bounds, WGS84, capped_grid, overview_size, suggested_grid};
use crate::core::mosaic::{merge_outcomes, trim_seams};
use crate::core::params::{BandRequest, MosaicParams, ProductParams};
use crate::core::pool::WorkerPool;
use crate::core::radiometry::{
    BandCalibration, FIXED_POINT_SCALE, apply_reflectance, reflectance, validate_sun_elevation,
};
use crate::core::rescale::{
    StretchRange, linear_rescale, stretch_to_u8, stretch_valid, valid_percentiles, validity_mask,
};
use crate::core::window::block_windows;
use crate::error::{Error, Result};
use crate::io::memory::CompositeRaster;
use crate::io::source::{BandSource, RasterBackend, RasterProfile};
use crate::io::writers::{Colormap, RenderedImage, encode};
use crate::scene::Scene;
use crate::types::{Compression, OutputDataType, Photometric, ResampleKernel};

/// Nodata sentinel of floating-point index products.
pub const INDEX_NODATA: f64 = -9999.0;

/// Sun elevation plus the coefficients of each requested band, in request
/// order. Resolved before any I/O so a missing coefficient is a request error.
struct Radiometry {
    sun_elevation: f64,
    bands: Vec<BandCalibration>,
}

impl Radiometry {
    fn for_bands(scene: &Scene, labels: &[String]) -> Result<Option<Self>> {
        let Some(cal) = scene.calibration.as_ref() else {
            return Ok(None);
        };
        validate_sun_elevation(cal.sun_elevation)?;
        let bands = labels
            .iter()
            .map(|l| cal.band(l).copied())
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Self {
            sun_elevation: cal.sun_elevation,
            bands,
        }))
    }

    fn required(scene: &Scene, labels: &[String]) -> Result<Self> {
        Self::for_bands(scene, labels)?
            .ok_or_else(|| Error::InvalidCalibration(format!("scene {} has no calibration", scene.id)))
    }

    fn apply<S: BandSource>(&self, samples: Vec<Array2<f64>>, sources: &[S]) -> Vec<Array2<f64>> {
        samples
            .iter()
            .zip(sources)
            .zip(&self.bands)
            .map(|((sample, src), cal)| {
                apply_reflectance(sample, cal, self.sun_elevation, src.profile().nodata_or_zero())
            })
            .collect()
    }
}

/// Correct samples when calibration is available, otherwise keep raw values.
fn corrected<S: BandSource>(
    radiometry: Option<&Radiometry>,
    samples: Vec<Array2<f64>>,
    sources: &[S],
) -> Vec<Array2<f64>> {
    match radiometry {
        Some(r) => r.apply(samples, sources),
        None => samples,
    }
}

fn open_bands<B: RasterBackend>(backend: &B, scene: &Scene, labels: &[String]) -> Result<Vec<B::Source>> {
    labels
        .iter()
        .map(|label| {
            let address = scene.band_address(label);
            debug!("Opening band {} at {}", label, address);
            backend.open(&address)
        })
        .collect()
}

fn keyed(labels: &[String], samples: Vec<Array2<f64>>) -> HashMap<String, Array2<f64>> {
    labels.iter().cloned().zip(samples).collect()
}

/// Output range of stretched 8-bit RGB; 0 stays nodata.
const RGB_RANGE: (f64, f64) = (1.0, 255.0);

fn is_8bit<S: BandSource>(sources: &[S]) -> bool {
    sources.iter().all(|s| s.profile().dtype == OutputDataType::U8)
}

/// Percentile range of the positive, non-nodata pixels of each band, taken
/// from a read no larger than `overview_size` on its longer side.
fn band_ranges<S: BandSource>(
    pool: &WorkerPool,
    sources: &[S],
    params: &ProductParams,
) -> Result<Vec<Option<(f64, f64)>>> {
    pool.fetch_all(sources, |src| {
        let p = src.profile();
        let longest = p.width.max(p.height).max(1);
        let shape = if longest <= params.overview_size {
            p.shape()
        } else {
            let f = params.overview_size as f64 / longest as f64;
            (
                ((p.height as f64 * f).round() as usize).max(1),
                ((p.width as f64 * f).round() as usize).max(1),
            )
        };
        let data = src.read_overview(shape, ResampleKernel::Nearest)?;
        let nodata = p.nodata_or_zero();
        let mask = data.mapv(|v| v > 0.0 && v != nodata);
        let range = valid_percentiles(&data, &mask, params.percentiles);
        debug!("Stretch range of {}: {:?}", src.address(), range);
        Ok(range)
    })
}

/// Full-resolution composite over the reference band's block grid.
///
/// Windows are processed one after another; the bands of each window are
/// fetched in parallel and brought onto the reference band's grid. Band
/// requests give 3-band RGB: fixed-point `u16` reflectance when the scene is
/// calibrated, otherwise `u8` (8-bit inputs as is, wider inputs stretched over
/// the percentiles of their valid pixels onto `[1, 255]`). Expression requests
/// give one `f32` band per output with [`INDEX_NODATA`] wherever an input band
/// has no valid value.
pub fn create_full_resolution<B: RasterBackend>(
    backend: &B,
    scene: &Scene,
    params: &ProductParams,
) -> Result<CompositeRaster> {
    let request = params.band_request()?;
    let labels = request.labels();
    let radiometry = Radiometry::for_bands(scene, &labels)?;

    let reference = backend.open(&scene.band_address(&scene.reference_band(&labels)?))?;
    let sources = open_bands(backend, scene, &labels)?;

    let profile = match (&request, &radiometry) {
        (BandRequest::Bands(_), Some(_)) => reference.profile().derive_output(
            3,
            OutputDataType::U16,
            0.0,
            Photometric::Rgb,
            params.compression,
        ),
        (BandRequest::Bands(_), None) => reference.profile().derive_output(
            3,
            OutputDataType::U8,
            0.0,
            Photometric::Rgb,
            params.compression,
        ),
        (BandRequest::Expression(e), _) => reference.profile().derive_output(
            e.output_count(),
            OutputDataType::F32,
            INDEX_NODATA,
            Photometric::MinIsBlack,
            params.compression,
        ),
    };
    let mut out = CompositeRaster::new(profile);

    let p = reference.profile();
    let windows = block_windows(p.width, p.height, p.block_width, p.block_height);
    info!(
        "Compositing {} at {}x{}: {} windows of {}x{}",
        scene.id,
        p.width,
        p.height,
        windows.len(),
        p.block_width,
        p.block_height
    );

    let pool = WorkerPool::new(params.band_workers)?;
    let scale = radiometry.as_ref().map(|_| params.fixed_point_scale);
    let ranges = match (&request, &radiometry) {
        (BandRequest::Bands(_), None) if !is_8bit(&sources) => Some(band_ranges(&pool, &sources, params)?),
        _ => None,
    };
    for window in &windows {
        let samples = pool.fetch_all(&sources, |src| {
            src.read_aligned(&p.transform, window, params.kernel)
        })?;
        let samples = corrected(radiometry.as_ref(), samples, &sources);
        let bands: Vec<Array2<f64>> = match (&request, &ranges) {
            (BandRequest::Bands(_), Some(ranges)) => samples
                .iter()
                .zip(ranges)
                .zip(&sources)
                .map(|((sample, &range), src)| {
                    stretch_valid(sample, range, src.profile().nodata_or_zero(), RGB_RANGE)
                })
                .collect(),
            (BandRequest::Bands(_), None) => pass_through(samples, scale),
            (BandRequest::Expression(expr), _) => {
                let valid = validity_mask(&samples)?;
                let mut outputs = expr.evaluate(&keyed(&labels, samples))?;
                for band in &mut outputs {
                    Zip::from(band).and(&valid).for_each(|v, &ok| {
                        if !ok {
                            *v = INDEX_NODATA;
                        }
                    });
                }
                outputs
            }
        };
        out.write_window(window, &bands)?;
    }
    info!("Composite of {} complete", scene.id);
    Ok(out)
}

/// Decimated display image of a whole scene.
///
/// Every band is read at `overview_size` squared; the validity mask requires
/// a nonzero value in every band. Expression outputs are stretched over the
/// configured expression range, band outputs over percentiles of their valid
/// pixels. Single-band products go through `colormap`.
pub fn create_overview<B: RasterBackend>(
    backend: &B,
    scene: &Scene,
    params: &ProductParams,
    colormap: &Colormap,
) -> Result<RenderedImage> {
    let request = params.band_request()?;
    let labels = request.labels();
    let radiometry = Radiometry::for_bands(scene, &labels)?;
    let sources = open_bands(backend, scene, &labels)?;

    let size = params.overview_size;
    info!("Reading {} bands of {} at {}x{}", labels.len(), scene.id, size, size);
    let pool = WorkerPool::new(params.band_workers)?;
    let samples = pool.fetch_all(&sources, |src| src.read_overview((size, size), params.kernel))?;
    let samples = corrected(radiometry.as_ref(), samples, &sources);
    let mask = validity_mask(&samples)?;

    let (outputs, range) = match &request {
        BandRequest::Bands(_) => {
            let (lo, hi) = params.percentiles;
            (samples, StretchRange::Percentile(lo, hi))
        }
        BandRequest::Expression(expr) => {
            let (lo, hi) = params.expression_range;
            (expr.evaluate(&keyed(&labels, samples))?, StretchRange::Fixed(lo, hi))
        }
    };
    let stretched: Vec<Array2<u8>> = outputs
        .iter()
        .map(|band| stretch_to_u8(band, &mask, range, (0.0, 255.0)))
        .collect();
    encode(&stretched, &mask, colormap, params.format)
}

/// Index value at one location of one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointValue {
    pub scene: String,
    pub date: NaiveDate,
    pub cloud: Option<f64>,
    /// One value per expression output.
    pub values: Vec<f64>,
}

impl PointValue {
    /// Value of the first expression output.
    pub fn value(&self) -> f64 {
        self.values.first().copied().unwrap_or(0.0)
    }
}

/// Evaluate the configured expression at `(lon, lat)`, given in the
/// configured bbox CRS. Nodata and out-of-extent samples read as 0, and
/// non-finite results become 0.
pub fn point_value<B: RasterBackend>(
    backend: &B,
    scene: &Scene,
    lon: f64,
    lat: f64,
    params: &ProductParams,
) -> Result<PointValue> {
    let expression = params.expression_request()?;
    let labels = expression.band_labels().to_vec();
    let radiometry = Radiometry::for_bands(scene, &labels)?;
    let sources = open_bands(backend, scene, &labels)?;

    let pool = WorkerPool::new(params.band_workers)?;
    let raw = pool.fetch_all(&sources, |src| {
        let p = src.profile();
        let pts = backend.transform_points(&params.bbox_crs, &p.crs, &[(lon, lat)])?;
        let (x, y) = pts.first().copied().ok_or(Error::NoValidData)?;
        src.sample_point(x, y)
    })?;

    let values: HashMap<String, f64> = raw
        .iter()
        .enumerate()
        .map(|(idx, &v)| {
            let nodata = sources[idx].profile().nodata_or_zero();
            let v = match (&radiometry, v == nodata) {
                (_, true) => 0.0,
                (Some(r), false) => {
                    let cal = &r.bands[idx];
                    reflectance(v, cal.mult, cal.add, r.sun_elevation)
                }
                (None, false) => v,
            };
            (labels[idx].clone(), v)
        })
        .collect();
    let result = expression.evaluate_point(&values)?;
    debug!("{} at ({}, {}) = {:?}", expression, lon, lat, result);

    Ok(PointValue {
        scene: scene.id.clone(),
        date: scene.date,
        cloud: scene.cloud_cover(),
        values: result,
    })
}

/// Index image of a bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaImage {
    pub image: RenderedImage,
    /// Extent of the image in `crs`.
    pub bounds: Bounds,
    pub crs: String,
}

/// Resolution, in `dst_crs` units, of a source's native grid once projected.
fn projected_resolution<B: RasterBackend>(backend: &B, profile: &RasterProfile, dst_crs: &str) -> Result<f64> {
    let projected = backend.transform_bounds(&profile.bounds(), &profile.crs, dst_crs)?;
    let grid = suggested_grid(dst_crs, &projected, profile.width, profile.height)?;
    Ok(grid.transform[1])
}

/// Render the configured expression over `bbox` (in the configured bbox CRS).
///
/// Bands are warped onto one grid in the output CRS covering the box at the
/// source's resolution, coarsened so no side exceeds `max_size`.
pub fn area_index<B: RasterBackend>(
    backend: &B,
    scene: &Scene,
    bbox: &Bounds,
    params: &ProductParams,
    colormap: &Colormap,
) -> Result<AreaImage> {
    let expression = params.expression_request()?;
    if !bbox.is_valid() {
        return Err(Error::InvalidArgument {
            arg: "bbox",
            value: bbox.to_string(),
        });
    }
    let labels = expression.band_labels().to_vec();
    let radiometry = Radiometry::for_bands(scene, &labels)?;
    let sources = open_bands(backend, scene, &labels)?;
    let first = sources.first().ok_or(Error::MissingBandsOrExpression)?;

    let dst_bounds = backend.transform_bounds(bbox, &params.bbox_crs, &params.out_crs)?;
    let res = projected_resolution(backend, first.profile(), &params.out_crs)?;
    let grid = capped_grid(&params.out_crs, &dst_bounds, res, params.max_size)?;
    info!(
        "Area {} of {} on a {}x{} grid in {}",
        bbox, scene.id, grid.width, grid.height, grid.crs
    );

    let pool = WorkerPool::new(params.band_workers)?;
    let samples = pool.fetch_all(&sources, |src| {
        src.warp(&grid, params.kernel, src.profile().nodata_or_zero())
    })?;
    let samples = corrected(radiometry.as_ref(), samples, &sources);
    if samples.iter().all(|s| s.iter().all(|&v| v == 0.0)) {
        return Err(Error::NoValidData);
    }
    let mask = validity_mask(&samples)?;
    let outputs = expression.evaluate(&keyed(&labels, samples))?;
    let (lo, hi) = params.expression_range;
    let stretched: Vec<Array2<u8>> = outputs
        .iter()
        .map(|band| stretch_to_u8(band, &mask, StretchRange::Fixed(lo, hi), (0.0, 255.0)))
        .collect();
    let image = encode(&stretched, &mask, colormap, params.format)?;
    Ok(AreaImage {
        image,
        bounds: grid.bounds(),
        crs: grid.crs,
    })
}

/// A merged multi-scene raster.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicResult {
    pub raster: CompositeRaster,
    /// Extent of the merged raster in geographic coordinates.
    pub wgs84_bounds: Bounds,
    /// Scenes that contributed, in merge order.
    pub scenes: Vec<String>,
}

/// One scene of a mosaic: bands warped onto the scene's first-overview-level
/// grid in the output CRS, converted to fixed-point reflectance, stretched
/// from the band's reflectance range onto the output range and seam-trimmed.
fn mosaic_scene<B: RasterBackend>(backend: &B, scene: &Scene, params: &MosaicParams) -> Result<CompositeRaster> {
    let radiometry = Radiometry::required(scene, &params.bands)?;
    let ranges = radiometry
        .bands
        .iter()
        .zip(&params.bands)
        .map(|(cal, label)| match (cal.min_reflectance, cal.max_reflectance) {
            (Some(lo), Some(hi)) => Ok((
                (lo * FIXED_POINT_SCALE).trunc(),
                (hi * FIXED_POINT_SCALE).trunc(),
            )),
            _ => Err(Error::InvalidCalibration(format!(
                "band {label} of {} has no reflectance range",
                scene.id
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    let reference = backend.open(&scene.band_address(&scene.reference_band(&params.bands)?))?;
    let p = reference.profile();
    let factor = reference.overview_factors().first().copied().unwrap_or(1);
    let (ovr_width, ovr_height) = overview_size(p.width, p.height, factor);
    let projected = backend.transform_bounds(&p.bounds(), &p.crs, &params.out_crs)?;
    let grid = suggested_grid(&params.out_crs, &projected, ovr_width, ovr_height)?;
    debug!(
        "{}: overview factor {}, {}x{} grid in {}",
        scene.id, factor, grid.width, grid.height, grid.crs
    );

    let profile = RasterProfile::new(grid.width, grid.height, grid.transform, grid.crs.clone()).derive_output(
        params.bands.len(),
        OutputDataType::U8,
        0.0,
        Photometric::Rgb,
        Compression::Deflate,
    );
    let mut out = CompositeRaster::new(profile);
    for (idx, label) in params.bands.iter().enumerate() {
        let src = backend.open(&scene.band_address(label))?;
        let warped = src.warp(&grid, params.kernel, 0.0)?;
        let cal = &radiometry.bands[idx];
        let refl = apply_reflectance(&warped, cal, radiometry.sun_elevation, 0.0);
        let mut band = refl.mapv(|v| {
            let v = v * FIXED_POINT_SCALE;
            if v > 0.0 {
                (linear_rescale(v, ranges[idx], params.output_range) as u8) as f64
            } else {
                0.0
            }
        });
        trim_seams(&mut band, params.seam_margin);
        out.write_band(idx, &band)?;
    }
    Ok(out)
}

/// Mosaic several scenes. Scenes are processed in parallel and isolated from
/// each other: a scene that fails is left out of the merge. The merge keeps
/// the input order, so earlier scenes win where they overlap later ones.
pub fn create_mosaic<B: RasterBackend>(
    backend: &B,
    scenes: &[Scene],
    params: &MosaicParams,
) -> Result<MosaicResult> {
    params.validate()?;
    info!("Mosaicking {} scenes with {} workers", scenes.len(), params.scene_workers);
    let pool = WorkerPool::new(params.scene_workers)?;
    let outcomes = pool.fetch_isolated(scenes, |s| s.id.clone(), |scene| mosaic_scene(backend, scene, params));
    drop(pool);

    let contributing: Vec<String> = scenes
        .iter()
        .zip(&outcomes)
        .filter(|(_, o)| o.is_available())
        .map(|(s, _)| s.id.clone())
        .collect();
    let mut raster = merge_outcomes(outcomes, 0.0)?;
    // Merged output is a display product: JPEG-compressed 8-bit RGB.
    let mut profile = raster.profile().clone();
    profile.compression = params.compression;
    raster = CompositeRaster::from_array(profile, raster.into_data())?;

    let p = raster.profile();
    let wgs84_bounds = backend.transform_bounds(&p.bounds(), &p.crs, WGS84)?;
    info!(
        "Mosaic of {} scenes: {}x{}, {}",
        contributing.len(),
        p.width,
        p.height,
        wgs84_bounds
    );
    Ok(MosaicResult {
        raster,
        wgs84_bounds,
        scenes: contributing,
    })
}

/// Parse a band-math expression, for callers that want to validate one up
/// front.
pub fn parse_expression(expression: &str) -> Result<BandExpression> {
    Ok(BandExpression::parse(expression)?)
}
