//! I/O layer: the raster backend seam, its in-memory and GDAL
//! implementations, and `writers` for GeoTIFF/PNG/JPEG outputs.
pub mod source;
pub use source::{BandSource, RasterBackend, RasterProfile};

pub mod memory;
pub use memory::{CompositeRaster, MemoryBackend, MemoryRaster};

#[cfg(feature = "gdal")]
pub mod gdal;
#[cfg(feature = "gdal")]
pub use gdal::{GdalBackend, GdalBandSource, GdalError};

pub mod writers;
