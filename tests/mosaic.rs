use std::collections::BTreeMap;

use bandmix::core::grid::{WEB_MERCATOR, north_up};
use bandmix::core::radiometry::BandCalibration;
use bandmix::{
    Calibration, Compression, Error, MemoryBackend, MemoryRaster, MosaicParams, OutputDataType,
    Scene, create_mosaic,
};
use ndarray::Array2;

const WEST: &str = "LC80230312016320LGN00";
const MIDDLE: &str = "LC80230322016320LGN00";
const EAST: &str = "LC80240312016320LGN00";

fn scene(id: &str) -> Scene {
    let bands: BTreeMap<String, BandCalibration> = ["4", "3", "2"]
        .iter()
        .map(|l| {
            let cal = BandCalibration::new(1.0 / 16384.0, -0.125).with_range(0.0, 1.0);
            (l.to_string(), cal)
        })
        .collect();
    Scene::parse(id).unwrap().with_root("mem").with_calibration(Calibration {
        sun_elevation: 90.0,
        cloud_cover: None,
        bands,
    })
}

/// Register the three bands and the QA band of `scene`, 10x10 pixels of 10 m
/// starting at `left`.
fn add_scene(backend: &mut MemoryBackend, scene: &Scene, left: f64, dn: f64) {
    let gt = north_up(left, 100.0, 10.0, 10.0);
    for label in ["4", "3", "2", "QA"] {
        let raster = MemoryRaster::new(Array2::from_elem((10, 10), dn), gt, WEB_MERCATOR).with_overviews(vec![]);
        backend.insert(scene.band_address(label), raster);
    }
}

fn params() -> MosaicParams {
    MosaicParams {
        seam_margin: 2,
        scene_workers: 3,
        ..MosaicParams::default()
    }
}

#[test]
fn single_scene_mosaic_matches_the_scene() {
    let west = scene(WEST);
    let mut backend = MemoryBackend::new();
    add_scene(&mut backend, &west, 0.0, 8192.0);

    let mosaic = create_mosaic(&backend, &[west], &params()).unwrap();
    let p = mosaic.raster.profile();
    assert_eq!((p.width, p.height), (10, 10));
    assert_eq!(p.count, 3);
    assert_eq!(p.dtype, OutputDataType::U8);
    assert_eq!(p.compression, Compression::Jpeg);
    assert_eq!(mosaic.scenes, vec![WEST.to_string()]);
    assert!(mosaic.wgs84_bounds.left.abs() < 1e-9);
    assert!(mosaic.wgs84_bounds.right > 0.0 && mosaic.wgs84_bounds.top > 0.0);

    // reflectance 0.375 -> 3750 on [0, 10000] -> [1, 255]
    let expected = (3750.0 / 10000.0 * 254.0 + 1.0) as u8 as f64;
    let band = mosaic.raster.band(0);
    assert_eq!(band[[0, 0]], 0.0);
    assert_eq!(band[[0, 1]], 0.0);
    assert_eq!(band[[0, 2]], expected);
    assert_eq!(band[[5, 5]], expected);
    assert_eq!(band[[9, 9]], 0.0);
}

#[test]
fn absent_scene_is_left_out() {
    let (west, middle, east) = (scene(WEST), scene(MIDDLE), scene(EAST));
    let mut backend = MemoryBackend::new();
    add_scene(&mut backend, &west, 0.0, 8192.0);
    add_scene(&mut backend, &east, 100.0, 16384.0);

    let three = create_mosaic(&backend, &[west.clone(), middle, east.clone()], &params()).unwrap();
    let two = create_mosaic(&backend, &[west, east], &params()).unwrap();
    assert_eq!(three, two);
    assert_eq!(three.scenes, vec![WEST.to_string(), EAST.to_string()]);
    assert_eq!(three.raster.profile().width, 20);
}

#[test]
fn uncalibrated_scene_is_left_out() {
    let west = scene(WEST);
    let bare = Scene::parse(EAST).unwrap().with_root("mem");
    let mut backend = MemoryBackend::new();
    add_scene(&mut backend, &west, 0.0, 8192.0);
    add_scene(&mut backend, &bare, 100.0, 8192.0);

    let mosaic = create_mosaic(&backend, &[west, bare], &params()).unwrap();
    assert_eq!(mosaic.scenes, vec![WEST.to_string()]);
    assert_eq!(mosaic.raster.profile().width, 10);
}

#[test]
fn no_surviving_scene() {
    let backend = MemoryBackend::new();
    let err = create_mosaic(&backend, &[scene(WEST), scene(EAST)], &params()).unwrap_err();
    assert!(matches!(err, Error::NoSurvivingSources));
    assert!(!err.is_configuration());
}

#[test]
fn mosaic_needs_three_bands() {
    let backend = MemoryBackend::new();
    let params = MosaicParams {
        bands: vec!["4".into(), "3".into()],
        ..MosaicParams::default()
    };
    let err = create_mosaic(&backend, &[scene(WEST)], &params).unwrap_err();
    assert!(matches!(err, Error::RgbBandCount { got: 2 }));
}
