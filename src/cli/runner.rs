use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bandmix::api::{area_index, create_full_resolution, create_mosaic, create_overview, point_value};
use bandmix::core::grid::Bounds;
use bandmix::io::GdalBackend;
use bandmix::io::writers::{Colormap, TiffOptions, write_geotiff};
use bandmix::scene::{Calibration, Scene};
use bandmix::{MosaicParams, ProductParams};

use super::args::{CliArgs, Command};
use super::errors::AppError;

fn init_logging(log: bool, verbose: bool) {
    if !(log || verbose) {
        return;
    }
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T, AppError> {
    match path {
        Some(p) => Ok(serde_json::from_str(&fs::read_to_string(p)?)?),
        None => Ok(T::default()),
    }
}

fn load_colormap(path: Option<&Path>) -> Result<Colormap, AppError> {
    match path {
        Some(p) => Ok(Colormap::from_json(&fs::read_to_string(p)?)?),
        None => Ok(Colormap::grayscale()),
    }
}

/// Resolve a scene id, applying the storage root and calibration options.
/// A calibration directory is looked up as `<dir>/<scene-id>.json`.
fn resolve_scene(id: &str, root: Option<&str>, calibration: Option<&PathBuf>) -> Result<Scene, AppError> {
    let mut scene = Scene::parse(id)?;
    if let Some(root) = root {
        scene = scene.with_root(root);
    }
    if let Some(path) = calibration {
        let file = if path.is_dir() {
            path.join(format!("{id}.json"))
        } else {
            path.clone()
        };
        if !file.exists() {
            return Err(AppError::MissingCalibration {
                scene: id.to_string(),
                path: file.display().to_string(),
            });
        }
        scene = scene.with_calibration(Calibration::from_path(&file)?);
    }
    Ok(scene)
}

fn apply_request(params: &mut ProductParams, bands: Option<Vec<String>>, expression: Option<String>) {
    if bands.is_some() {
        params.bands = bands;
    }
    if expression.is_some() {
        params.expression = expression;
    }
}

pub fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(args.log, args.verbose);

    let backend = GdalBackend::new()?;
    let root = args.root.as_deref();
    let calibration = args.calibration.as_ref();
    let config = args.config.as_deref();

    match args.command {
        Command::Full {
            scene,
            bands,
            expression,
            output,
            compression,
            overviews,
        } => {
            let scene = resolve_scene(&scene, root, calibration)?;
            let mut params: ProductParams = load_config(config)?;
            apply_request(&mut params, bands, expression);
            if let Some(c) = compression {
                params.compression = c;
            }
            if let Some(k) = args.kernel {
                params.kernel = k;
            }
            let raster = create_full_resolution(&backend, &scene, &params)?;
            let options = TiffOptions {
                overviews,
                ..TiffOptions::default()
            };
            write_geotiff(&raster, &output, &options)?;
            info!("Successfully processed: {} -> {:?}", scene.id, output);
        }
        Command::Overview {
            scene,
            bands,
            expression,
            output,
            format,
            size,
            colormap,
        } => {
            let scene = resolve_scene(&scene, root, calibration)?;
            let mut params: ProductParams = load_config(config)?;
            apply_request(&mut params, bands, expression);
            if let Some(f) = format {
                params.format = f;
            }
            if let Some(s) = size {
                params.overview_size = s;
            }
            if let Some(k) = args.kernel {
                params.kernel = k;
            }
            let colormap = load_colormap(colormap.as_deref())?;
            let image = create_overview(&backend, &scene, &params, &colormap)?;
            image.save(&output)?;
            info!(
                "Successfully processed: {} -> {:?} ({}x{} {})",
                scene.id, output, image.width, image.height, image.format
            );
        }
        Command::Point {
            scene,
            lon,
            lat,
            expression,
        } => {
            let scene = resolve_scene(&scene, root, calibration)?;
            let mut params: ProductParams = load_config(config)?;
            apply_request(&mut params, None, expression);
            let value = point_value(&backend, &scene, lon, lat, &params)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Area {
            scene,
            bbox,
            expression,
            output,
            format,
            max_size,
            colormap,
        } => {
            let [west, south, east, north] = bbox[..] else {
                return Err(AppError::InvalidBbox { got: bbox }.into());
            };
            let scene = resolve_scene(&scene, root, calibration)?;
            let mut params: ProductParams = load_config(config)?;
            apply_request(&mut params, None, expression);
            if let Some(f) = format {
                params.format = f;
            }
            if let Some(m) = max_size {
                params.max_size = m;
            }
            if let Some(k) = args.kernel {
                params.kernel = k;
            }
            let colormap = load_colormap(colormap.as_deref())?;
            let area = area_index(
                &backend,
                &scene,
                &Bounds::new(west, south, east, north),
                &params,
                &colormap,
            )?;
            area.image.save(&output)?;
            info!("Successfully processed: {} -> {:?} ({} in {})", scene.id, output, area.bounds, area.crs);
        }
        Command::Mosaic {
            scenes,
            bands,
            output,
            seam_margin,
            workers,
        } => {
            let scenes = scenes
                .iter()
                .map(|id| resolve_scene(id, root, calibration))
                .collect::<Result<Vec<_>, _>>()?;
            let mut params: MosaicParams = load_config(config)?;
            if let Some(b) = bands {
                params.bands = b;
            }
            if let Some(m) = seam_margin {
                params.seam_margin = m;
            }
            if let Some(w) = workers {
                params.scene_workers = w;
            }
            if let Some(k) = args.kernel {
                params.kernel = k;
            }
            let mosaic = create_mosaic(&backend, &scenes, &params)?;
            write_geotiff(&mosaic.raster, &output, &TiffOptions::default())?;
            info!(
                "Mosaic of {}/{} scenes -> {:?}",
                mosaic.scenes.len(),
                scenes.len(),
                output
            );
            println!("{}", serde_json::to_string_pretty(&mosaic.wgs84_bounds)?);
        }
    }
    Ok(())
}
