//! Command Line Interface (CLI) layer for bandmix.
//!
//! This module defines argument parsing (`args`), error types (`errors`),
//! and the dispatch logic (`runner`) that maps each subcommand onto one of
//! the pipelines in `bandmix::api`, backed by GDAL.
pub mod args;
pub mod errors;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;
