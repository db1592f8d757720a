//! Affine grid geometry: bounds, pixel/geo conversion and target grid
//! selection for reprojected reads.
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// GDAL-ordered affine transform:
/// `x = gt[0] + col*gt[1] + row*gt[2]`, `y = gt[3] + col*gt[4] + row*gt[5]`.
pub type GeoTransform = [f64; 6];

pub const WGS84: &str = "EPSG:4326";
pub const WEB_MERCATOR: &str = "EPSG:3857";

/// Spherical mercator earth radius in meters.
const MERCATOR_RADIUS: f64 = 6_378_137.0;
/// Latitude at which spherical mercator becomes square.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Points per edge used when projecting bounds between reference systems.
pub const DENSIFY_POINTS: usize = 21;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn is_valid(&self) -> bool {
        self.width() > 0.0 && self.height() > 0.0
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(
            self.left.min(other.left),
            self.bottom.min(other.bottom),
            self.right.max(other.right),
            self.top.max(other.top),
        )
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x <= self.right && y >= self.bottom && y <= self.top
    }

    /// Smallest bounds holding every point. `None` when no point is finite.
    pub fn from_points(points: &[(f64, f64)]) -> Option<Bounds> {
        let mut finite = points.iter().filter(|(x, y)| x.is_finite() && y.is_finite());
        let &(x0, y0) = finite.next()?;
        Some(finite.fold(Bounds::new(x0, y0, x0, y0), |b, &(x, y)| {
            Bounds::new(b.left.min(x), b.bottom.min(y), b.right.max(x), b.top.max(y))
        }))
    }

    /// Points along the four edges, `n` per edge, for projecting the box.
    pub fn densified_edges(&self, n: usize) -> Vec<(f64, f64)> {
        let n = n.max(2);
        let mut pts = Vec::with_capacity(4 * n);
        for i in 0..n {
            let t = i as f64 / (n - 1) as f64;
            let x = self.left + t * self.width();
            let y = self.bottom + t * self.height();
            pts.push((x, self.bottom));
            pts.push((x, self.top));
            pts.push((self.left, y));
            pts.push((self.right, y));
        }
        pts
    }
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.left, self.bottom, self.right, self.top
        )
    }
}

/// A destination grid: CRS, affine transform and pixel size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetGrid {
    pub crs: String,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

impl TargetGrid {
    pub fn new(crs: impl Into<String>, transform: GeoTransform, width: usize, height: usize) -> Self {
        Self {
            crs: crs.into(),
            transform,
            width,
            height,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn bounds(&self) -> Bounds {
        grid_bounds(&self.transform, self.width, self.height)
    }
}

/// North-up transform with square-or-not pixels anchored at `(left, top)`.
pub fn north_up(left: f64, top: f64, res_x: f64, res_y: f64) -> GeoTransform {
    [left, res_x, 0.0, top, 0.0, -res_y]
}

#[inline]
pub fn pixel_to_geo(gt: &GeoTransform, col: f64, row: f64) -> (f64, f64) {
    (
        gt[0] + col * gt[1] + row * gt[2],
        gt[3] + col * gt[4] + row * gt[5],
    )
}

/// Continuous pixel coordinates `(col, row)` of a georeferenced point.
pub fn geo_to_pixel(gt: &GeoTransform, x: f64, y: f64) -> Result<(f64, f64)> {
    let det = gt[1] * gt[5] - gt[2] * gt[4];
    if det == 0.0 || !det.is_finite() {
        return Err(Error::InvalidArgument {
            arg: "transform",
            value: format!("{gt:?}"),
        });
    }
    let dx = x - gt[0];
    let dy = y - gt[3];
    let col = (gt[5] * dx - gt[2] * dy) / det;
    let row = (-gt[4] * dx + gt[1] * dy) / det;
    Ok((col, row))
}

/// Extent of a `width` x `height` grid.
pub fn grid_bounds(gt: &GeoTransform, width: usize, height: usize) -> Bounds {
    let corners = [
        pixel_to_geo(gt, 0.0, 0.0),
        pixel_to_geo(gt, width as f64, 0.0),
        pixel_to_geo(gt, 0.0, height as f64),
        pixel_to_geo(gt, width as f64, height as f64),
    ];
    Bounds::from_points(&corners).unwrap_or(Bounds::new(gt[0], gt[3], gt[0], gt[3]))
}

/// Transform of the `factor`-decimated overview level of a grid.
pub fn overview_transform(gt: &GeoTransform, factor: usize) -> GeoTransform {
    let f = factor.max(1) as f64;
    [gt[0], gt[1] * f, gt[2] * f, gt[3], gt[4] * f, gt[5] * f]
}

/// Size of the `factor`-decimated overview level, truncated, at least 1x1.
pub fn overview_size(width: usize, height: usize, factor: usize) -> (usize, usize) {
    let f = factor.max(1);
    ((width / f).max(1), (height / f).max(1))
}

/// Grid covering `dst_bounds` (the source extent already projected into the
/// destination CRS) with square pixels sized so the diagonal keeps the
/// source's pixel count along it.
pub fn suggested_grid(
    crs: &str,
    dst_bounds: &Bounds,
    src_width: usize,
    src_height: usize,
) -> Result<TargetGrid> {
    if !dst_bounds.is_valid() || src_width == 0 || src_height == 0 {
        return Err(Error::InvalidArgument {
            arg: "bounds",
            value: dst_bounds.to_string(),
        });
    }
    let src_diag = ((src_width * src_width + src_height * src_height) as f64).sqrt();
    let dst_diag = dst_bounds.width().hypot(dst_bounds.height());
    let res = dst_diag / src_diag;
    let width = ((dst_bounds.width() / res).round() as usize).max(1);
    let height = ((dst_bounds.height() / res).round() as usize).max(1);
    let gt = north_up(
        dst_bounds.left,
        dst_bounds.top,
        dst_bounds.width() / width as f64,
        dst_bounds.height() / height as f64,
    );
    Ok(TargetGrid::new(crs, gt, width, height))
}

/// Grid covering `bounds` at `natural_res`, coarsened so neither side exceeds
/// `max_size` pixels. Never finer than `natural_res`.
pub fn capped_grid(crs: &str, bounds: &Bounds, natural_res: f64, max_size: usize) -> Result<TargetGrid> {
    if !bounds.is_valid() {
        return Err(Error::InvalidArgument {
            arg: "bbox",
            value: bounds.to_string(),
        });
    }
    if max_size == 0 || natural_res.is_nan() || natural_res <= 0.0 {
        return Err(Error::InvalidArgument {
            arg: "max_size",
            value: format!("{max_size} at resolution {natural_res}"),
        });
    }
    let cap = max_size as f64;
    let res = natural_res
        .max(bounds.width() / cap)
        .max(bounds.height() / cap);
    let width = ((bounds.width() / res).ceil() as usize).clamp(1, max_size);
    let height = ((bounds.height() / res).ceil() as usize).clamp(1, max_size);
    Ok(TargetGrid::new(
        crs,
        north_up(bounds.left, bounds.top, res, res),
        width,
        height,
    ))
}

/// Longitude/latitude (degrees) to spherical mercator meters.
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
    let x = MERCATOR_RADIUS * lon.to_radians();
    let y = MERCATOR_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// Spherical mercator meters to longitude/latitude (degrees).
pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / MERCATOR_RADIUS).to_degrees();
    let lat = (2.0 * (y / MERCATOR_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}
