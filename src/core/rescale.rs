//! Linear contrast stretch, percentile ranges and validity masks.
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// How the input range of a stretch is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StretchRange {
    /// Caller-supplied constant range, e.g. `[-1, 1]` for a normalized index.
    Fixed(f64, f64),
    /// Lower/upper percentiles (0..=100) of the valid pixels of each band.
    Percentile(f64, f64),
}

impl Default for StretchRange {
    fn default() -> Self {
        StretchRange::Percentile(2.0, 98.0)
    }
}

/// Clip `v` to `[imin, imax]`, shift by `-imin`, divide by the input span and
/// map onto `[omin, omax]`. A degenerate input range (`imin == imax`) maps
/// everything to `omin`.
#[inline]
pub fn linear_rescale(v: f64, (imin, imax): (f64, f64), (omin, omax): (f64, f64)) -> f64 {
    let span = imax - imin;
    if span == 0.0 || !span.is_finite() {
        return omin;
    }
    let t = (v.clamp(imin.min(imax), imin.max(imax)) - imin) / span;
    t * (omax - omin) + omin
}

pub fn rescale_array(
    sample: &Array2<f64>,
    in_range: (f64, f64),
    out_range: (f64, f64),
) -> Array2<f64> {
    sample.mapv(|v| linear_rescale(v, in_range, out_range))
}

/// Percentile `p` (0..=100) of `values` with linear interpolation between
/// closest ranks. Sorts `values` in place. `None` when empty.
pub fn percentile(values: &mut [f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(values[lo] + (values[hi] - values[lo]) * frac)
}

/// Lower and upper percentiles over the pixels where `mask` is true.
/// `None` when no pixel is valid.
pub fn valid_percentiles(
    sample: &Array2<f64>,
    mask: &Array2<bool>,
    (p_low, p_high): (f64, f64),
) -> Option<(f64, f64)> {
    let mut values: Vec<f64> = Zip::from(sample)
        .and(mask)
        .fold(Vec::new(), |mut acc, &v, &ok| {
            if ok {
                acc.push(v);
            }
            acc
        });
    let low = percentile(&mut values, p_low)?;
    // Already sorted; the second call only interpolates.
    let high = percentile(&mut values, p_high)?;
    Some((low, high))
}

/// Stretch the positive, non-nodata pixels of `sample` from `in_range` onto
/// `out_range`, truncated to whole numbers. Every other pixel, and every pixel
/// of a band without a range, becomes 0.
pub fn stretch_valid(
    sample: &Array2<f64>,
    in_range: Option<(f64, f64)>,
    nodata: f64,
    out_range: (f64, f64),
) -> Array2<f64> {
    sample.mapv(|v| match in_range {
        Some(range) if v > 0.0 && v != nodata => linear_rescale(v, range, out_range).trunc(),
        _ => 0.0,
    })
}

/// A pixel is valid only when every band has a nonzero value there.
pub fn validity_mask(bands: &[Array2<f64>]) -> Result<Array2<bool>> {
    let first = bands.first().ok_or(Error::NoValidData)?;
    let mut mask = Array2::from_elem(first.dim(), true);
    for band in bands {
        if band.dim() != first.dim() {
            return Err(Error::ShapeMismatch {
                expected: first.dim(),
                got: band.dim(),
            });
        }
        Zip::from(&mut mask).and(band).for_each(|m, &v| *m &= v != 0.0);
    }
    Ok(mask)
}

/// Stretch one band to 8-bit. The input range comes from `range` (percentiles
/// are computed over valid pixels only). Pixels outside `mask` are 0.
pub fn stretch_to_u8(
    sample: &Array2<f64>,
    mask: &Array2<bool>,
    range: StretchRange,
    out_range: (f64, f64),
) -> Array2<u8> {
    let in_range = match range {
        StretchRange::Fixed(lo, hi) => Some((lo, hi)),
        StretchRange::Percentile(lo, hi) => valid_percentiles(sample, mask, (lo, hi)),
    };
    let Some(in_range) = in_range else {
        // Nothing valid to stretch.
        return Array2::zeros(sample.dim());
    };
    debug!(
        "Stretch range [{:.4}, {:.4}] -> [{}, {}]",
        in_range.0, in_range.1, out_range.0, out_range.1
    );
    Zip::from(sample).and(mask).map_collect(|&v, &ok| {
        if ok {
            linear_rescale(v, in_range, out_range) as u8
        } else {
            0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn endpoints_map_exactly() {
        assert_eq!(linear_rescale(-1.0, (-1.0, 1.0), (0.0, 255.0)), 0.0);
        assert_eq!(linear_rescale(1.0, (-1.0, 1.0), (0.0, 255.0)), 255.0);
        assert_eq!(linear_rescale(250.0, (250.0, 7500.0), (1.0, 255.0)), 1.0);
        assert_eq!(linear_rescale(7500.0, (250.0, 7500.0), (1.0, 255.0)), 255.0);
    }

    #[test]
    fn values_outside_range_are_clipped() {
        assert_eq!(linear_rescale(-5.0, (0.0, 10.0), (0.0, 100.0)), 0.0);
        assert_eq!(linear_rescale(50.0, (0.0, 10.0), (0.0, 100.0)), 100.0);
    }

    #[test]
    fn rescale_is_monotonic() {
        let mut prev = f64::NEG_INFINITY;
        for i in 0..=400 {
            let x = -2.0 + i as f64 * 0.01;
            let y = linear_rescale(x, (-1.0, 1.0), (0.0, 255.0));
            assert!(y >= prev, "not monotonic at {x}");
            assert!((0.0..=255.0).contains(&y));
            prev = y;
        }
    }

    #[test]
    fn degenerate_range_maps_to_lower_bound() {
        assert_eq!(linear_rescale(3.0, (3.0, 3.0), (1.0, 255.0)), 1.0);
    }

    #[test]
    fn percentile_interpolates() {
        let mut v: Vec<f64> = (1..=5).map(|x| x as f64).collect();
        assert_eq!(percentile(&mut v, 0.0), Some(1.0));
        assert_eq!(percentile(&mut v, 100.0), Some(5.0));
        assert_eq!(percentile(&mut v, 50.0), Some(3.0));
        assert_relative_eq!(percentile(&mut v, 2.0).unwrap(), 1.08, epsilon = 1e-12);
        assert_relative_eq!(percentile(&mut v, 98.0).unwrap(), 4.92, epsilon = 1e-12);
        assert_eq!(percentile(&mut [], 50.0), None);
    }

    #[test]
    fn percentiles_ignore_invalid_pixels() {
        let sample = array![[0.0, 10.0], [20.0, 1000.0]];
        let mask = array![[false, true], [true, false]];
        assert_eq!(valid_percentiles(&sample, &mask, (0.0, 100.0)), Some((10.0, 20.0)));
        let none = Array2::from_elem((2, 2), false);
        assert_eq!(valid_percentiles(&sample, &none, (2.0, 98.0)), None);
    }

    #[test]
    fn mask_requires_all_bands_nonzero() {
        let a = array![[1.0, 0.0], [3.0, 4.0]];
        let b = array![[1.0, 2.0], [0.0, 4.0]];
        let mask = validity_mask(&[a, b]).unwrap();
        assert_eq!(mask, array![[true, false], [false, true]]);
        assert!(validity_mask(&[]).is_err());
    }

    #[test]
    fn masked_pixels_stay_zero() {
        let sample = array![[-1.0, 0.0], [1.0, 0.5]];
        let mask = array![[true, false], [true, true]];
        let out = stretch_to_u8(&sample, &mask, StretchRange::Fixed(-1.0, 1.0), (0.0, 255.0));
        assert_eq!(out, array![[0u8, 0], [255, 191]]);
    }

    #[test]
    fn all_invalid_band_stretches_to_zero() {
        let sample = array![[5.0, 6.0]];
        let mask = array![[false, false]];
        let out = stretch_to_u8(&sample, &mask, StretchRange::default(), (0.0, 255.0));
        assert_eq!(out, array![[0u8, 0]]);
    }

    #[test]
    fn valid_stretch_keeps_zero_as_nodata() {
        let band = array![[0.0, 250.0, 4000.0], [7500.0, 9000.0, -5.0]];
        let out = stretch_valid(&band, Some((250.0, 7500.0)), 0.0, (1.0, 255.0));
        assert_eq!(out[[0, 0]], 0.0);
        assert_eq!(out[[0, 1]], 1.0);
        assert_eq!(out[[0, 2]], (3750.0 / 7250.0 * 254.0 + 1.0_f64).trunc());
        assert_eq!(out[[1, 0]], 255.0);
        assert_eq!(out[[1, 1]], 255.0);
        assert_eq!(out[[1, 2]], 0.0);
        assert_eq!(stretch_valid(&band, None, 0.0, (1.0, 255.0)), Array2::<f64>::zeros((2, 3)));
    }
}
