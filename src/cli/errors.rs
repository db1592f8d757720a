use thiserror::Error;

/// Application-specific errors for the CLI
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid bounding box: expected west,south,east,north, got {got:?}")]
    InvalidBbox { got: Vec<f64> },

    #[error("Calibration file not found for scene {scene}: {path}")]
    MissingCalibration { scene: String, path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Bandmix(#[from] bandmix::Error),
}
