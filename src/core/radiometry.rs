//! Top-of-atmosphere reflectance from raw digital numbers.
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Factor used to store reflectance as a fixed-point integer.
pub const FIXED_POINT_SCALE: f64 = 10000.0;

/// Per-band calibration constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandCalibration {
    /// Multiplicative reflectance rescaling factor.
    pub mult: f64,
    /// Additive reflectance rescaling factor.
    pub add: f64,
    /// Minimum reflectance the sensor reports for this band.
    #[serde(default)]
    pub min_reflectance: Option<f64>,
    /// Maximum reflectance the sensor reports for this band.
    #[serde(default)]
    pub max_reflectance: Option<f64>,
}

impl BandCalibration {
    pub fn new(mult: f64, add: f64) -> Self {
        Self {
            mult,
            add,
            min_reflectance: None,
            max_reflectance: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min_reflectance = Some(min);
        self.max_reflectance = Some(max);
        self
    }
}

/// `(raw * mult + add) / sin(sun_elevation)`, sun elevation in degrees.
#[inline]
pub fn reflectance(raw: f64, mult: f64, add: f64, sun_elevation_deg: f64) -> f64 {
    (raw * mult + add) / sun_elevation_deg.to_radians().sin()
}

/// Sun elevation must put the sun above the horizon.
pub fn validate_sun_elevation(sun_elevation_deg: f64) -> Result<()> {
    if !sun_elevation_deg.is_finite() || sun_elevation_deg <= 0.0 || sun_elevation_deg > 90.0 {
        return Err(Error::InvalidCalibration(format!(
            "sun elevation must be in (0, 90] degrees, got {sun_elevation_deg}"
        )));
    }
    Ok(())
}

/// Convert a whole band sample to reflectance. Pixels equal to `nodata` come
/// out as 0 instead of being corrected.
pub fn apply_reflectance(
    sample: &Array2<f64>,
    calibration: &BandCalibration,
    sun_elevation_deg: f64,
    nodata: f64,
) -> Array2<f64> {
    let sin_e = sun_elevation_deg.to_radians().sin();
    let (mult, add) = (calibration.mult, calibration.add);
    sample.mapv(|raw| {
        if raw == nodata {
            0.0
        } else {
            (raw * mult + add) / sin_e
        }
    })
}

/// Scale reflectance into the fixed-point storage range.
pub fn to_fixed_point(sample: &Array2<f64>) -> Array2<f64> {
    sample.mapv(|v| v * FIXED_POINT_SCALE)
}
