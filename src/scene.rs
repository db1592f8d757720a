//! Scene identifiers, band addressing and calibration metadata.
//!
//! A scene id is validated and decomposed before any I/O. The resulting
//! [`Scene`] renders band addresses for its sensor's storage layout; band
//! files are then opened through whatever [`RasterBackend`](crate::io::RasterBackend)
//! the caller uses.
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::radiometry::{BandCalibration, validate_sun_elevation};
use crate::error::{Error, Result};
use crate::types::Sensor;

pub const LANDSAT_ROOT: &str = "/vsis3/landsat-pds";
pub const SENTINEL2_ROOT: &str = "/vsis3/sentinel-s2-l1c";
pub const CBERS_ROOT: &str = "/vsis3/cbers-pds";

/// Scene-wide calibration: sun elevation, cloud cover and per-band
/// reflectance coefficients keyed by band label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub sun_elevation: f64,
    #[serde(default)]
    pub cloud_cover: Option<f64>,
    #[serde(default)]
    pub bands: BTreeMap<String, BandCalibration>,
}

impl Calibration {
    pub fn from_json(text: &str) -> Result<Self> {
        let cal: Calibration = serde_json::from_str(text)?;
        validate_sun_elevation(cal.sun_elevation)?;
        Ok(cal)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn band(&self, label: &str) -> Result<&BandCalibration> {
        self.bands
            .get(label)
            .ok_or_else(|| Error::InvalidCalibration(format!("no coefficients for band {label}")))
    }
}

/// A resolved scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub sensor: Sensor,
    /// Storage key relative to the sensor root.
    pub key: String,
    pub date: NaiveDate,
    /// Storage root (local directory or `/vsi*` prefix).
    pub root: String,
    pub calibration: Option<Calibration>,
}

fn landsat_pre_collection() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^L[COTEM]8(?P<path>\d{3})(?P<row>\d{3})(?P<year>\d{4})(?P<doy>\d{3})[A-Z]{3}\d{2}$")
            .expect("valid regex")
    })
}

fn landsat_collection() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^L[COTEM]08_L\d[A-Z]{2}_(?P<path>\d{3})(?P<row>\d{3})_(?P<date>\d{8})_\d{8}_\d{2}_(T1|T2|RT)$",
        )
        .expect("valid regex")
    })
}

fn sentinel2() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^S2[AB]_tile_(?P<date>\d{8})_(?P<utm>\d{2})(?P<lat>[A-Z])(?P<sq>[A-Z]{2})_(?P<num>\d)$",
        )
        .expect("valid regex")
    })
}

fn cbers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^CBERS_4_MUX_(?P<date>\d{8})_(?P<path>\d{3})_(?P<row>\d{3})_L\d$").expect("valid regex")
    })
}

fn ymd(id: &str, text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y%m%d").map_err(|_| Error::InvalidSceneId(id.to_string()))
}

impl Scene {
    /// Parse a Landsat-8 (pre-collection or collection 1), Sentinel-2 tile or
    /// CBERS-4 MUX scene id. Storage roots default to the public buckets.
    pub fn parse(id: &str) -> Result<Self> {
        if let Some(c) = landsat_pre_collection().captures(id) {
            let year: i32 = c["year"].parse().map_err(|_| Error::InvalidSceneId(id.to_string()))?;
            let doy: u32 = c["doy"].parse().map_err(|_| Error::InvalidSceneId(id.to_string()))?;
            let date = NaiveDate::from_yo_opt(year, doy).ok_or_else(|| Error::InvalidSceneId(id.to_string()))?;
            return Ok(Self::new(
                id,
                Sensor::Landsat8,
                format!("L8/{}/{}/{id}/{id}", &c["path"], &c["row"]),
                date,
                LANDSAT_ROOT,
            ));
        }
        if let Some(c) = landsat_collection().captures(id) {
            let date = ymd(id, &c["date"])?;
            return Ok(Self::new(
                id,
                Sensor::Landsat8,
                format!("c1/L8/{}/{}/{id}/{id}", &c["path"], &c["row"]),
                date,
                LANDSAT_ROOT,
            ));
        }
        if let Some(c) = sentinel2().captures(id) {
            let date = ymd(id, &c["date"])?;
            let key = format!(
                "tiles/{}/{}/{}/{}/{}/{}/{}",
                c["utm"].trim_start_matches('0'),
                &c["lat"],
                &c["sq"],
                date.format("%Y"),
                date.format("%-m"),
                date.format("%-d"),
                &c["num"],
            );
            return Ok(Self::new(id, Sensor::Sentinel2, key, date, SENTINEL2_ROOT));
        }
        if let Some(c) = cbers().captures(id) {
            let date = ymd(id, &c["date"])?;
            return Ok(Self::new(
                id,
                Sensor::Cbers4,
                format!("CBERS4/MUX/{}/{}/{id}", &c["path"], &c["row"]),
                date,
                CBERS_ROOT,
            ));
        }
        Err(Error::InvalidSceneId(id.to_string()))
    }

    fn new(id: &str, sensor: Sensor, key: String, date: NaiveDate, root: &str) -> Self {
        Self {
            id: id.to_string(),
            sensor,
            key,
            date,
            root: root.to_string(),
            calibration: None,
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    /// Address of the file holding band `label`.
    pub fn band_address(&self, label: &str) -> String {
        match self.sensor {
            Sensor::Landsat8 => format!("{}/{}_B{label}.TIF", self.root, self.key),
            Sensor::Sentinel2 => format!("{}/{}/B{label}.jp2", self.root, self.key),
            Sensor::Cbers4 => format!("{}/{}/{}_BAND{label}.tif", self.root, self.key, self.id),
        }
    }

    /// Band whose grid and block layout drive windowed products. Sensors
    /// without a dedicated quality band use the first requested band.
    pub fn reference_band(&self, requested: &[String]) -> Result<String> {
        match self.sensor {
            Sensor::Landsat8 => Ok("QA".to_string()),
            Sensor::Cbers4 => Ok("6".to_string()),
            Sensor::Sentinel2 => requested
                .first()
                .cloned()
                .ok_or(Error::MissingBandsOrExpression),
        }
    }

    pub fn cloud_cover(&self) -> Option<f64> {
        self.calibration.as_ref().and_then(|c| c.cloud_cover)
    }
}

/// Turns a scene id into a [`Scene`].
pub trait SceneResolver: Send + Sync {
    fn resolve(&self, scene_id: &str) -> Result<Scene>;
}

/// Resolver over parsed ids, per-sensor root overrides and calibration
/// loaded up front.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    roots: HashMap<Sensor, String>,
    calibrations: HashMap<String, Calibration>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, sensor: Sensor, root: impl Into<String>) -> Self {
        self.roots.insert(sensor, root.into());
        self
    }

    pub fn with_calibration(mut self, scene_id: impl Into<String>, calibration: Calibration) -> Self {
        self.calibrations.insert(scene_id.into(), calibration);
        self
    }
}

impl SceneResolver for StaticResolver {
    fn resolve(&self, scene_id: &str) -> Result<Scene> {
        let mut scene = Scene::parse(scene_id)?;
        if let Some(root) = self.roots.get(&scene.sensor) {
            scene = scene.with_root(root.clone());
        }
        if let Some(cal) = self.calibrations.get(scene_id) {
            scene = scene.with_calibration(cal.clone());
        }
        Ok(scene)
    }
}
