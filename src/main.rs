/*
Copyright 2024 Jakub Lewandowski

This file is part of Gridded Dataset Preparation (GridPrep).

GridPrep is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

GridPrep is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with GridPrep. If not, see https://www.gnu.org/licenses/.
*/

//! Gridded Dataset Preparation (GridPrep) assembles training
//! datasets for data-driven weather models from gridded sources.
//!
//! Variables of several input datasets are selected, optionally
//! derived, and mapped onto a small set of output variables with
//! a common layout (e.g. `[time, grid_index, state_feature]`), so
//! that a model can read them as plain multi-dimensional arrays.
//!
//! The whole preparation is driven by a YAML configuration file
//! passed as the only required argument.

mod constants;
mod errors;
mod prep;

use cap::Cap;
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::{alloc, path::PathBuf};

type Float = f64;

/// Prepares training datasets for data-driven weather models.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file.
    config: PathBuf,

    /// Output path, defaults to the configuration path with the `.zarr` extension.
    /// With `--recreate-from`, the directory the input datasets are written to.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Recreates the input datasets from this prepared dataset
    /// instead of preparing a new one.
    #[arg(long, value_name = "DATASET")]
    recreate_from: Option<PathBuf>,
}

/// Global allocator used by the pipeline.
///
/// Use of static global allocator allows for capping the memory to the limit set by user
/// in configuration file and in effect provide better [OOM error](https://en.wikipedia.org/wiki/Out_of_memory) handling.
#[global_allocator]
static ALLOCATOR: Cap<alloc::System> = Cap::new(alloc::System, usize::MAX);

/// The main program function.
/// Prepares the runtime environment and calls the [`prep::main`].
///
/// To provide meaningful and high-quality error messages the `env_logger`
/// needs to be initiated before any log messages are possible to occur.
fn main() {
    #[cfg(not(feature = "debug"))]
    let logger_env = Env::new().filter_or("GRIDPREP_LOG_LEVEL", "info");

    #[cfg(feature = "debug")]
    let logger_env = Env::new().filter_or("GRIDPREP_LOG_LEVEL", "debug");

    env_logger::Builder::from_env(logger_env)
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    if let Some(dataset) = cli.recreate_from {
        match prep::recreate(&cli.config, &dataset, cli.output) {
            Ok(paths) => info!("Input datasets recreated: {:?}", paths),
            Err(err) => error!("Recreating input datasets failed with error: {}", err),
        }
        return;
    }

    match prep::main(&cli.config, cli.output) {
        Ok(path) => info!("Dataset preparation finished. Output written to {}", path.display()),
        Err(err) => error!("Dataset preparation failed with error: {}", err),
    }
}
