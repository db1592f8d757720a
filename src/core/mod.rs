//! Compositing building blocks: window planning, radiometry, band math,
//! contrast stretch, grid geometry, resampling, merge and worker pools.
//! These are pure primitives consumed by the high-level `api` module.
pub mod expression;
pub mod grid;
pub mod mosaic;
pub mod params;
pub mod pool;
pub mod radiometry;
pub mod resample;
pub mod rescale;
pub mod window;
