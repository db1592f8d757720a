//! bandmix CLI entrypoint.
//!
//! Parses arguments and dispatches to the `cli` runner. For programmatic
//! use, prefer the library API (`bandmix::api`).

use clap::Parser;

mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::CliArgs::parse();
    cli::run(args)
}
