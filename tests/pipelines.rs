use std::collections::BTreeMap;

use bandmix::core::grid::{Bounds, WEB_MERCATOR, WGS84, north_up};
use bandmix::core::radiometry::BandCalibration;
use bandmix::io::writers::Colormap;
use bandmix::{
    Calibration, Error, ImageFormat, MemoryBackend, MemoryRaster, OutputDataType, Photometric,
    ProductParams, ResampleKernel, Scene, area_index, create_full_resolution, create_overview, point_value,
};
use approx::assert_relative_eq;
use ndarray::{Array2, array};

const LANDSAT: &str = "LC08_L1TP_016037_20170813_20170814_01_RT";
const CBERS: &str = "CBERS_4_MUX_20171121_057_094_L2";
const SENTINEL: &str = "S2A_tile_20170729_19UDP_0";

fn calibrated(id: &str, labels: &[&str]) -> Scene {
    let bands: BTreeMap<String, BandCalibration> = labels
        .iter()
        .map(|l| (l.to_string(), BandCalibration::new(1.0 / 16384.0, -0.125)))
        .collect();
    Scene::parse(id).unwrap().with_root("mem").with_calibration(Calibration {
        sun_elevation: 90.0,
        cloud_cover: Some(12.5),
        bands,
    })
}

fn insert(backend: &mut MemoryBackend, scene: &Scene, label: &str, data: Array2<f64>) {
    let raster = MemoryRaster::new(data, north_up(0.0, 50.0, 10.0, 10.0), WEB_MERCATOR).with_blocks(2, 2);
    backend.insert(scene.band_address(label), raster);
}

#[test]
fn fixed_point_reflectance_is_exact() {
    let scene = calibrated(LANDSAT, &["4", "3", "2"]);
    let mut backend = MemoryBackend::new();
    let dn = array![
        [8192.0, 16384.0, 4096.0, 0.0, 8192.0],
        [4096.0, 0.0, 16384.0, 8192.0, 16384.0],
        [0.0, 8192.0, 8192.0, 4096.0, 0.0],
    ];
    insert(&mut backend, &scene, "4", dn.clone());
    insert(&mut backend, &scene, "3", dn.mapv(|v| if v == 4096.0 { 16384.0 } else { v }));
    insert(&mut backend, &scene, "2", dn.clone());
    insert(&mut backend, &scene, "QA", Array2::from_elem((3, 5), 2720.0));

    let params = ProductParams::default().with_bands(["4", "3", "2"]);
    let out = create_full_resolution(&backend, &scene, &params).unwrap();

    assert_eq!(out.profile().dtype, OutputDataType::U16);
    assert_eq!(out.profile().count, 3);
    assert_eq!(out.profile().nodata, Some(0.0));
    assert_eq!(out.profile().photometric, Photometric::Rgb);
    let typed = out.typed();
    let expected = dn.mapv(|v| {
        if v == 8192.0 {
            3750.0
        } else if v == 16384.0 {
            8750.0
        } else if v == 4096.0 {
            1250.0
        } else {
            0.0
        }
    });
    assert_eq!(typed.index_axis(ndarray::Axis(0), 0), expected);
    assert_eq!(typed.index_axis(ndarray::Axis(0), 2), expected);
    assert_eq!(typed[[1, 0, 2]], 8750.0);
    assert_eq!(typed[[1, 0, 0]], 3750.0);
}

#[test]
fn rgb_with_two_bands_is_a_configuration_error() {
    let scene = calibrated(LANDSAT, &["4", "3"]);
    let params = ProductParams::default().with_bands(["4", "3"]);
    let backend = MemoryBackend::new();
    let err = create_full_resolution(&backend, &scene, &params).unwrap_err();
    assert!(matches!(err, Error::RgbBandCount { got: 2 }));
    assert!(err.is_configuration());
    let err = create_overview(&backend, &scene, &params, &Colormap::grayscale()).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn neither_bands_nor_expression_is_a_configuration_error() {
    let scene = calibrated(LANDSAT, &["4"]);
    let backend = MemoryBackend::new();
    let params = ProductParams::default();
    for err in [
        create_full_resolution(&backend, &scene, &params).unwrap_err(),
        create_overview(&backend, &scene, &params, &Colormap::grayscale()).unwrap_err(),
        point_value(&backend, &scene, 0.0, 0.0, &params).unwrap_err(),
    ] {
        assert!(matches!(err, Error::MissingBandsOrExpression));
    }
}

#[test]
fn point_with_zero_inputs_is_zero() {
    let scene = calibrated(LANDSAT, &["4", "5"]);
    let mut backend = MemoryBackend::new();
    insert(&mut backend, &scene, "4", Array2::zeros((5, 5)));
    insert(&mut backend, &scene, "5", Array2::zeros((5, 5)));
    let params = ProductParams {
        bbox_crs: WEB_MERCATOR.to_string(),
        ..ProductParams::default().with_expression("(b5-b4)/(b5+b4)")
    };
    let point = point_value(&backend, &scene, 25.0, 25.0, &params).unwrap();
    assert_eq!(point.value(), 0.0);
    assert!(!point.value().is_nan());
    assert_eq!(point.scene, LANDSAT);
    assert_eq!(point.cloud, Some(12.5));
}

#[test]
fn uncalibrated_expression_keeps_raw_values() {
    let scene = Scene::parse(CBERS).unwrap().with_root("mem");
    let mut backend = MemoryBackend::new();
    let raw = array![[10.0, 0.0, 30.0], [40.0, 50.0, 0.0]];
    insert(&mut backend, &scene, "7", raw.clone());
    insert(&mut backend, &scene, "6", Array2::from_elem((2, 3), 1.0));
    let params = ProductParams::default().with_expression("b7");
    let out = create_full_resolution(&backend, &scene, &params).unwrap();
    assert_eq!(out.profile().dtype, OutputDataType::F32);
    assert_eq!(out.profile().photometric, Photometric::MinIsBlack);
    assert_eq!(out.band(0), array![[10.0, -9999.0, 30.0], [40.0, 50.0, -9999.0]]);
}

#[test]
fn area_image_respects_size_cap() {
    let scene = calibrated(LANDSAT, &["4", "5"]);
    let mut backend = MemoryBackend::new();
    let gt = north_up(0.0, 1000.0, 10.0, 10.0);
    backend.insert(
        scene.band_address("4"),
        MemoryRaster::new(Array2::from_elem((100, 100), 8192.0), gt, WEB_MERCATOR),
    );
    backend.insert(
        scene.band_address("5"),
        MemoryRaster::new(Array2::from_elem((100, 100), 16384.0), gt, WEB_MERCATOR),
    );
    let mut params = ProductParams::default().with_expression("(b5-b4)/(b5+b4)");
    params.max_size = 16;
    params.format = ImageFormat::Jpeg;
    assert_eq!(params.bbox_crs, WGS84);

    let bbox = Bounds::new(0.0, 0.0, 0.005, 0.005);
    let area = area_index(&backend, &scene, &bbox, &params, &Colormap::grayscale()).unwrap();
    assert_eq!(area.crs, WEB_MERCATOR);
    assert_eq!(area.image.height, 16);
    assert!(area.image.width <= 16);
    assert_eq!(&area.image.bytes[..2], &[0xFF, 0xD8]);
    assert!(area.bounds.left.abs() < 1e-6);
}

#[test]
fn overview_rgb_png() {
    let scene = calibrated(LANDSAT, &["4", "3", "2"]);
    let mut backend = MemoryBackend::new();
    let ramp = Array2::from_shape_fn((8, 8), |(r, c)| 1000.0 + (r * 8 + c) as f64 * 100.0);
    for label in ["4", "3", "2"] {
        insert(&mut backend, &scene, label, ramp.clone());
    }
    let mut params = ProductParams::default().with_bands(["4", "3", "2"]);
    params.overview_size = 4;
    params.format = ImageFormat::Png;
    let img = create_overview(&backend, &scene, &params, &Colormap::grayscale()).unwrap();
    assert_eq!((img.width, img.height), (4, 4));
    assert_eq!(&img.bytes[1..4], b"PNG");
}

#[test]
fn bands_of_different_resolution_share_the_reference_grid() {
    let scene = Scene::parse(SENTINEL).unwrap().with_root("mem");
    let mut backend = MemoryBackend::new();
    // 40 m x 40 m footprint: B04 at 10 m, B8A at 20 m.
    backend.insert(
        scene.band_address("04"),
        MemoryRaster::new(Array2::from_elem((4, 4), 100.0), north_up(0.0, 40.0, 10.0, 10.0), WEB_MERCATOR),
    );
    let nir = array![[300.0, 500.0], [700.0, 900.0]];
    backend.insert(
        scene.band_address("8A"),
        MemoryRaster::new(nir.clone(), north_up(0.0, 40.0, 20.0, 20.0), WEB_MERCATOR),
    );
    let mut params = ProductParams::default().with_expression("(b04 - b8A)/(b04 + b8A)");
    params.kernel = ResampleKernel::Nearest;

    let out = create_full_resolution(&backend, &scene, &params).unwrap();
    assert_eq!(out.profile().shape(), (4, 4));
    let band = out.band(0);
    for ((r, c), &v) in band.indexed_iter() {
        let n = nir[[r / 2, c / 2]];
        assert_relative_eq!(v, (100.0 - n) / (100.0 + n), epsilon = 1e-12);
    }
}

#[test]
fn uncalibrated_16bit_bands_are_stretched() {
    let scene = Scene::parse(SENTINEL).unwrap().with_root("mem");
    let mut backend = MemoryBackend::new();
    let ramp = Array2::from_shape_fn((4, 4), |(r, c)| ((r * 4 + c) * 100) as f64);
    insert(&mut backend, &scene, "04", ramp.clone());
    insert(&mut backend, &scene, "03", ramp.mapv(|v| v * 2.0));
    insert(&mut backend, &scene, "02", ramp.mapv(|v| v * 3.0));

    let params = ProductParams::default().with_bands(["04", "03", "02"]);
    let out = create_full_resolution(&backend, &scene, &params).unwrap();
    assert_eq!(out.profile().dtype, OutputDataType::U8);
    assert_eq!(out.profile().nodata, Some(0.0));

    let typed = out.typed();
    for b in 0..3 {
        assert_eq!(typed[[b, 0, 0]], 0.0);
        assert_eq!(typed[[b, 0, 1]], 1.0);
        assert_eq!(typed[[b, 3, 3]], 255.0);
        let mid = typed[[b, 2, 0]];
        assert!((127.0..=128.0).contains(&mid), "band {b}: {mid}");
    }
    assert!(typed.iter().any(|&v| v > 1.0 && v < 255.0));
}

#[test]
fn uncalibrated_8bit_bands_pass_through() {
    let scene = Scene::parse(CBERS).unwrap().with_root("mem");
    let mut backend = MemoryBackend::new();
    for (label, dn) in [("7", 30.0), ("6", 20.0), ("5", 10.0)] {
        let raster = MemoryRaster::new(Array2::from_elem((2, 2), dn), north_up(0.0, 20.0, 10.0, 10.0), WEB_MERCATOR)
            .with_dtype(OutputDataType::U8);
        backend.insert(scene.band_address(label), raster);
    }
    let params = ProductParams::default().with_bands(["7", "6", "5"]);
    let out = create_full_resolution(&backend, &scene, &params).unwrap();
    assert_eq!(out.profile().dtype, OutputDataType::U8);
    let typed = out.typed();
    assert_eq!(typed[[0, 1, 1]], 30.0);
    assert_eq!(typed[[1, 0, 0]], 20.0);
    assert_eq!(typed[[2, 1, 0]], 10.0);
}
