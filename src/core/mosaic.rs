//! Multi-scene merge with nodata precedence and seam trimming.
use ndarray::Array2;
use tracing::{debug, info};

use crate::core::grid::{Bounds, geo_to_pixel, north_up, pixel_to_geo};
use crate::core::pool::SourceOutcome;
use crate::error::{Error, Result};
use crate::io::memory::CompositeRaster;
use crate::io::source::RasterProfile;

/// Default number of pixels trimmed at each end of a valid run.
pub const DEFAULT_SEAM_MARGIN: usize = 5;

/// Zero `margin` pixels at both ends of every contiguous run of valid
/// (nonzero) values, walking the band in row-major order. Runs shorter than
/// twice the margin disappear entirely.
pub fn trim_seams(band: &mut Array2<f64>, margin: usize) {
    if margin == 0 {
        return;
    }
    let flat: Vec<f64> = band.iter().copied().collect();
    let mut out = flat.clone();
    let mut i = 0;
    while i < flat.len() {
        if flat[i] == 0.0 {
            i += 1;
            continue;
        }
        let start = i;
        while i < flat.len() && flat[i] != 0.0 {
            i += 1;
        }
        let stop = i;
        let head = (start + margin).min(stop);
        out[start..head].iter_mut().for_each(|v| *v = 0.0);
        let tail = stop.saturating_sub(margin).max(start);
        out[tail..stop].iter_mut().for_each(|v| *v = 0.0);
    }
    for (dst, src) in band.iter_mut().zip(out) {
        *dst = src;
    }
}

/// Merge rasters that share a CRS into one raster covering the union of their
/// extents, at the first raster's resolution. Per sample, the first source
/// (in list order) holding a non-nodata value wins.
pub fn merge(sources: &[CompositeRaster], nodata: f64) -> Result<CompositeRaster> {
    let first = sources.first().ok_or(Error::NoSurvivingSources)?;
    let base = first.profile();
    for src in &sources[1..] {
        let p = src.profile();
        if p.count != base.count || !p.crs.eq_ignore_ascii_case(&base.crs) {
            return Err(Error::InvalidArgument {
                arg: "sources",
                value: format!(
                    "{} bands in {} vs {} bands in {}",
                    p.count, p.crs, base.count, base.crs
                ),
            });
        }
    }

    let extent = sources
        .iter()
        .map(|s| s.profile().bounds())
        .reduce(|a, b| a.union(&b))
        .ok_or(Error::NoSurvivingSources)?;
    let res_x = base.transform[1].abs();
    let res_y = base.transform[5].abs();
    let width = ((extent.width() / res_x).round() as usize).max(1);
    let height = ((extent.height() / res_y).round() as usize).max(1);
    let transform = north_up(extent.left, extent.top, res_x, res_y);
    info!(
        "Merging {} sources into {}x{} grid over {}",
        sources.len(),
        width,
        height,
        extent
    );

    let profile = RasterProfile {
        width,
        height,
        transform,
        nodata: Some(nodata),
        ..base.clone()
    };
    let mut merged = CompositeRaster::new(profile);
    let mut bands: Vec<Array2<f64>> = (0..base.count)
        .map(|_| Array2::from_elem((height, width), nodata))
        .collect();

    for (idx, src) in sources.iter().enumerate() {
        let sp = src.profile();
        let src_nodata = sp.nodata_or_zero();
        let footprint = sp.bounds();
        let (c0, r0, c1, r1) = footprint_window(&transform, &footprint, width, height)?;
        debug!("Source {} covers rows {}..{}, cols {}..{}", idx, r0, r1, c0, c1);
        for r in r0..r1 {
            for c in c0..c1 {
                let (x, y) = pixel_to_geo(&transform, c as f64 + 0.5, r as f64 + 0.5);
                let (sc, sr) = geo_to_pixel(&sp.transform, x, y)?;
                if sc < 0.0 || sr < 0.0 {
                    continue;
                }
                let (sc, sr) = (sc.floor() as usize, sr.floor() as usize);
                if sc >= sp.width || sr >= sp.height {
                    continue;
                }
                for (b, band) in bands.iter_mut().enumerate() {
                    let v = src.data()[[b, sr, sc]];
                    if band[[r, c]] == nodata && v != src_nodata && v != nodata {
                        band[[r, c]] = v;
                    }
                }
            }
        }
    }
    for (b, band) in bands.iter().enumerate() {
        merged.write_band(b, band)?;
    }
    Ok(merged)
}

/// Destination pixel range `(col0, row0, col1, row1)` touched by `footprint`.
fn footprint_window(
    transform: &crate::core::grid::GeoTransform,
    footprint: &Bounds,
    width: usize,
    height: usize,
) -> Result<(usize, usize, usize, usize)> {
    let (cl, rt) = geo_to_pixel(transform, footprint.left, footprint.top)?;
    let (cr, rb) = geo_to_pixel(transform, footprint.right, footprint.bottom)?;
    let clamp = |v: f64, max: usize| -> usize { v.max(0.0).min(max as f64) as usize };
    Ok((
        clamp(cl.min(cr).floor(), width),
        clamp(rt.min(rb).floor(), height),
        clamp(cl.max(cr).ceil(), width),
        clamp(rt.max(rb).ceil(), height),
    ))
}

/// Drop unavailable entries, keeping order, then merge.
pub fn merge_outcomes(outcomes: Vec<SourceOutcome<CompositeRaster>>, nodata: f64) -> Result<CompositeRaster> {
    let total = outcomes.len();
    let survivors: Vec<CompositeRaster> = outcomes.into_iter().filter_map(SourceOutcome::available).collect();
    if survivors.is_empty() {
        return Err(Error::NoSurvivingSources);
    }
    if survivors.len() < total {
        info!("{} of {} sources available for merge", survivors.len(), total);
    }
    merge(&survivors, nodata)
}
