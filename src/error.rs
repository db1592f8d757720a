//! Crate-level error type and `Result` alias for stable, structured error handling.
//! Configuration errors are raised before any I/O; data errors are fatal for the
//! current product; backend errors wrap the raster I/O and encoders.
use thiserror::Error;

use crate::core::expression::ExpressionError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Expression or bands must be provided")]
    MissingBandsOrExpression,

    #[error("RGB combination only: expected 3 bands, got {got}")]
    RgbBandCount { got: usize },

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid argument: {arg}={value}")]
    InvalidArgument { arg: &'static str, value: String },

    #[error("Invalid scene identifier: {0}")]
    InvalidSceneId(String),

    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("No valid data in requested area")]
    NoValidData,

    #[error("No source survived fetching; nothing to merge")]
    NoSurvivingSources,

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("Window {window} lies outside raster of size {width}x{height}")]
    WindowOutOfBounds {
        window: String,
        width: usize,
        height: usize,
    },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] crate::io::gdal::GdalError),

    #[error("Image encoding error: {0}")]
    Image(String),

    #[error("Calibration JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// True for errors caused by the request itself rather than by data or I/O.
    pub fn is_configuration(&self) -> bool {
        match self {
            Error::MissingBandsOrExpression
            | Error::RgbBandCount { .. }
            | Error::UnsupportedFormat(_)
            | Error::InvalidArgument { .. }
            | Error::InvalidSceneId(_)
            | Error::InvalidCalibration(_) => true,
            Error::Expression(e) => e.is_syntax(),
            _ => false,
        }
    }

    pub fn image<E: std::fmt::Display>(e: E) -> Self {
        Error::Image(e.to_string())
    }
}
