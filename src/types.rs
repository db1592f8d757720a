//! Shared types and enums used across bandmix.
//! Includes `ImageFormat`, `OutputDataType`, `Compression`, `Photometric`,
//! `ResampleKernel` and `Sensor`.
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Encoded image format for display products (overviews, area previews).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::Png => write!(f, "png"),
            ImageFormat::Jpeg => write!(f, "jpeg"),
        }
    }
}

/// Sample type of an output raster.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum OutputDataType {
    U8,
    U16,
    F32,
}

impl OutputDataType {
    /// Cast a computed value the way a numeric array cast would: truncate
    /// toward zero and saturate for integer types, NaN becomes 0.
    #[inline]
    pub fn cast(&self, v: f64) -> f64 {
        match self {
            OutputDataType::U8 => (v as u8) as f64,
            OutputDataType::U16 => (v as u16) as f64,
            OutputDataType::F32 => (v as f32) as f64,
        }
    }
}

impl std::fmt::Display for OutputDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputDataType::U8 => write!(f, "uint8"),
            OutputDataType::U16 => write!(f, "uint16"),
            OutputDataType::F32 => write!(f, "float32"),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
pub enum Compression {
    None,
    Lzw,
    Deflate,
    Jpeg,
}

impl Compression {
    /// GeoTIFF `COMPRESS` creation option value, if any.
    pub fn creation_value(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Lzw => Some("LZW"),
            Compression::Deflate => Some("DEFLATE"),
            Compression::Jpeg => Some("JPEG"),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Photometric {
    Rgb,
    MinIsBlack,
}

impl Photometric {
    pub fn creation_value(&self) -> &'static str {
        match self {
            Photometric::Rgb => "RGB",
            Photometric::MinIsBlack => "MINISBLACK",
        }
    }
}

/// Resampling kernel used by overview reads, warps and pyramids.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
pub enum ResampleKernel {
    Nearest,
    Bilinear,
    Cubic,
    Lanczos,
}

impl ResampleKernel {
    /// Name understood by GDAL overview builders and recorded as metadata.
    pub fn gdal_name(&self) -> &'static str {
        match self {
            ResampleKernel::Nearest => "NEAREST",
            ResampleKernel::Bilinear => "BILINEAR",
            ResampleKernel::Cubic => "CUBIC",
            ResampleKernel::Lanczos => "LANCZOS",
        }
    }
}

impl std::fmt::Display for ResampleKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResampleKernel::Nearest => write!(f, "nearest"),
            ResampleKernel::Bilinear => write!(f, "bilinear"),
            ResampleKernel::Cubic => write!(f, "cubic"),
            ResampleKernel::Lanczos => write!(f, "lanczos"),
        }
    }
}

/// Sensor families with known band addressing conventions.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
pub enum Sensor {
    Landsat8,
    Sentinel2,
    Cbers4,
}

impl std::fmt::Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sensor::Landsat8 => write!(f, "Landsat8"),
            Sensor::Sentinel2 => write!(f, "Sentinel2"),
            Sensor::Cbers4 => write!(f, "Cbers4"),
        }
    }
}
