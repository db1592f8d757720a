//! Output writers: GeoTIFF via GDAL, PNG/JPEG for display products.
pub mod image;
#[cfg(feature = "gdal")]
pub mod tiff;

pub use image::{Colormap, RenderedImage, encode};
#[cfg(feature = "gdal")]
pub use tiff::{TiffOptions, write_geotiff};
