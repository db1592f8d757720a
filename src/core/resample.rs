//! Nodata-aware resampling kernels for in-memory rasters.
//!
//! Coordinates are continuous pixel coordinates: pixel `(row, col)` covers
//! `[col, col+1) x [row, row+1)` and has its center at `(col+0.5, row+0.5)`.
use ndarray::Array2;

use crate::types::ResampleKernel;

#[inline]
fn get(src: &Array2<f64>, row: isize, col: isize) -> Option<f64> {
    if row < 0 || col < 0 {
        return None;
    }
    src.get((row as usize, col as usize)).copied()
}

/// Value of the pixel containing `(x, y)`, or `nodata` outside the raster.
pub fn sample_nearest(src: &Array2<f64>, x: f64, y: f64, nodata: f64) -> f64 {
    get(src, y.floor() as isize, x.floor() as isize).unwrap_or(nodata)
}

/// Bilinear interpolation between the four pixel centers around `(x, y)`.
///
/// Nodata is never invented: when the pixel containing the point is nodata
/// (or outside the raster) the result is nodata. Neighbours that are nodata or
/// outside the raster are dropped and the remaining weights renormalized.
pub fn sample_bilinear(src: &Array2<f64>, x: f64, y: f64, nodata: f64) -> f64 {
    match get(src, y.floor() as isize, x.floor() as isize) {
        None => return nodata,
        Some(v) if v == nodata || v.is_nan() => return nodata,
        Some(_) => {}
    }
    let fx = x - 0.5;
    let fy = y - 0.5;
    let c0 = fx.floor();
    let r0 = fy.floor();
    let dx = fx - c0;
    let dy = fy - r0;
    let (c0, r0) = (c0 as isize, r0 as isize);

    let taps = [
        (r0, c0, (1.0 - dx) * (1.0 - dy)),
        (r0, c0 + 1, dx * (1.0 - dy)),
        (r0 + 1, c0, (1.0 - dx) * dy),
        (r0 + 1, c0 + 1, dx * dy),
    ];
    let mut acc = 0.0;
    let mut weight = 0.0;
    for (r, c, w) in taps {
        if w == 0.0 {
            continue;
        }
        if let Some(v) = get(src, r, c) {
            if v != nodata && !v.is_nan() {
                acc += v * w;
                weight += w;
            }
        }
    }
    if weight > 0.0 { acc / weight } else { nodata }
}

/// Sample with the requested kernel. Kernels wider than bilinear are
/// approximated by bilinear.
pub fn sample(src: &Array2<f64>, x: f64, y: f64, nodata: f64, kernel: ResampleKernel) -> f64 {
    match kernel {
        ResampleKernel::Nearest => sample_nearest(src, x, y, nodata),
        ResampleKernel::Bilinear | ResampleKernel::Cubic | ResampleKernel::Lanczos => {
            sample_bilinear(src, x, y, nodata)
        }
    }
}

/// Resample a whole array to `(rows, cols)` by mapping output pixel centers
/// onto the source extent.
pub fn resample_to_shape(
    src: &Array2<f64>,
    (rows, cols): (usize, usize),
    nodata: f64,
    kernel: ResampleKernel,
) -> Array2<f64> {
    let (src_rows, src_cols) = src.dim();
    if (rows, cols) == (src_rows, src_cols) {
        return src.clone();
    }
    if src_rows == 0 || src_cols == 0 {
        return Array2::from_elem((rows, cols), nodata);
    }
    let sx = src_cols as f64 / cols.max(1) as f64;
    let sy = src_rows as f64 / rows.max(1) as f64;
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let x = (c as f64 + 0.5) * sx;
        let y = (r as f64 + 0.5) * sy;
        sample(src, x, y, nodata, kernel)
    })
}
