#![doc = r#"
bandmix: tiled, concurrent band compositing and reprojection for block-tiled
multi-band satellite rasters (Landsat-8, Sentinel-2, CBERS-4).

The crate turns the per-band files of a scene into:
- full-resolution GeoTIFF composites (fixed-point reflectance RGB or
  floating-point band-math indexes), processed window by window over the
  source's block grid;
- low-resolution PNG/JPEG previews with percentile or fixed-range stretch;
- index values at a point and index images over a bounding box;
- Web Mercator RGB mosaics of several scenes, with failing scenes left out.

Raster access goes through the [`io::RasterBackend`] trait. The GDAL backend
(default `gdal` feature) reads local files and `/vsi*` paths; the in-memory
backend serves tests and synthetic inputs.

Requirements
------------
- GDAL development headers and runtime for the `gdal` feature.
- Rust 2024 edition toolchain.

Quick start: NDVI composite of a Landsat-8 scene
------------------------------------------------
```rust,no_run
use std::path::Path;
use bandmix::io::GdalBackend;
use bandmix::io::writers::{TiffOptions, write_geotiff};
use bandmix::scene::{Calibration, Scene};
use bandmix::{ProductParams, create_full_resolution};

fn main() -> bandmix::Result<()> {
    let backend = GdalBackend::new()?;
    let scene = Scene::parse("LC08_L1TP_016037_20170813_20170814_01_RT")?
        .with_calibration(Calibration::from_path(Path::new("/data/LC08_016037.json"))?);
    let params = ProductParams::default().with_expression("(b5-b4)/(b5+b4)");

    let raster = create_full_resolution(&backend, &scene, &params)?;
    write_geotiff(&raster, Path::new("/out/ndvi.tif"), &TiffOptions::default())
}
```

Mosaic of several scenes
------------------------
```rust,no_run
use std::path::Path;
use bandmix::io::GdalBackend;
use bandmix::scene::{Calibration, SceneResolver, StaticResolver};
use bandmix::{MosaicParams, create_mosaic};

fn main() -> bandmix::Result<()> {
    let backend = GdalBackend::new()?;
    let ids = ["LC80230312016320LGN00", "LC80230322016320LGN00"];
    // Mosaics need reflectance, so every scene carries its calibration.
    let mut resolver = StaticResolver::new();
    for id in ids {
        let path = format!("/data/{id}.json");
        resolver = resolver.with_calibration(id, Calibration::from_path(Path::new(&path))?);
    }
    let scenes = ids
        .iter()
        .map(|id| resolver.resolve(id))
        .collect::<bandmix::Result<Vec<_>>>()?;

    let mosaic = create_mosaic(&backend, &scenes, &MosaicParams::default())?;
    println!("{} scenes merged, extent {}", mosaic.scenes.len(), mosaic.wgs84_bounds);
    Ok(())
}
```

Error handling
--------------
All public functions return `bandmix::Result<T>`. [`Error::is_configuration`]
separates request errors (missing bands/expression, wrong RGB band count,
bad scene id) from data errors (`NoValidData`, `NoSurvivingSources`) and
backend failures.

Useful modules
--------------
- [`api`]: pipeline entry points.
- [`core`]: window planning, radiometry, band math, stretch, grid geometry,
  merge and worker pools.
- [`io`]: raster backends and writers.
- [`scene`]: scene ids, band addressing and calibration.
- [`error`]: crate-level `Error` and `Result`.
"#]

pub mod api;
pub mod core;
pub mod error;
pub mod io;
pub mod scene;
pub mod types;

// Curated public API surface
pub use core::expression::{BandExpression, ExpressionError};
pub use core::params::{BandRequest, MosaicParams, ProductParams};
pub use core::pool::SourceOutcome;
pub use error::{Error, Result};
pub use types::{Compression, ImageFormat, OutputDataType, Photometric, ResampleKernel, Sensor};

pub use io::{BandSource, CompositeRaster, MemoryBackend, MemoryRaster, RasterBackend, RasterProfile};
#[cfg(feature = "gdal")]
pub use io::{GdalBackend, GdalError};

pub use scene::{Calibration, Scene, SceneResolver, StaticResolver};

pub use api::{
    AreaImage, MosaicResult, PointValue, area_index, create_full_resolution, create_mosaic,
    create_overview, point_value,
};
