use clap::{Parser, Subcommand};
use std::path::PathBuf;

use bandmix::types::{Compression, ImageFormat, ResampleKernel};

#[derive(Parser)]
#[command(name = "bandmix", version, about = "bandmix CLI")]
pub struct CliArgs {
    /// Enable logging
    #[arg(long, global = true, default_value_t = false)]
    pub log: bool,

    /// Log at debug level (implies --log)
    #[arg(long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Storage root replacing the sensor's default bucket (local directory or /vsi* prefix)
    #[arg(long, global = true)]
    pub root: Option<String>,

    /// Calibration JSON file, or a directory holding one `<scene-id>.json` per scene
    #[arg(long, global = true)]
    pub calibration: Option<PathBuf>,

    /// JSON file with product or mosaic parameters; command-line options override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Resampling kernel for reads and warps
    #[arg(long, global = true, value_enum)]
    pub kernel: Option<ResampleKernel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Full-resolution GeoTIFF composite of one scene
    Full {
        scene: String,

        /// Three band labels for an RGB composite (e.g. 4,3,2)
        #[arg(long, value_delimiter = ',')]
        bands: Option<Vec<String>>,

        /// Band-math expression, one output band per comma segment
        #[arg(long)]
        expression: Option<String>,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, value_enum)]
        compression: Option<Compression>,

        /// Build an internal overview pyramid with this kernel
        #[arg(long, value_enum)]
        overviews: Option<ResampleKernel>,
    },

    /// Low-resolution PNG/JPEG preview of one scene
    Overview {
        scene: String,

        #[arg(long, value_delimiter = ',')]
        bands: Option<Vec<String>>,

        #[arg(long)]
        expression: Option<String>,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short = 'f', long, value_enum)]
        format: Option<ImageFormat>,

        /// Side of the preview in pixels
        #[arg(long)]
        size: Option<usize>,

        /// JSON colormap (array of [r, g, b]) for single-band products
        #[arg(long)]
        colormap: Option<PathBuf>,
    },

    /// Evaluate an expression at one location
    Point {
        scene: String,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long)]
        expression: Option<String>,
    },

    /// Render an expression over a bounding box
    Area {
        scene: String,

        /// Bounding box as west,south,east,north
        #[arg(long, value_delimiter = ',', num_args = 4, allow_hyphen_values = true)]
        bbox: Vec<f64>,

        #[arg(long)]
        expression: Option<String>,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short = 'f', long, value_enum)]
        format: Option<ImageFormat>,

        /// Cap on either side of the image in pixels
        #[arg(long)]
        max_size: Option<usize>,

        #[arg(long)]
        colormap: Option<PathBuf>,
    },

    /// Merge several scenes into one Web Mercator RGB mosaic
    Mosaic {
        #[arg(required = true)]
        scenes: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        bands: Option<Vec<String>>,

        #[arg(short, long)]
        output: PathBuf,

        /// Pixels trimmed at both ends of every valid run before merging
        #[arg(long)]
        seam_margin: Option<usize>,

        /// Number of scenes processed concurrently
        #[arg(long)]
        workers: Option<usize>,
    },
}
