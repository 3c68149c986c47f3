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

//! Module containing the dataset preparation pipeline.
//!
//! Every input dataset declared in the configuration is processed
//! on its own: it is opened, subset to the requested variables and
//! coordinate values, checked against the expected attributes,
//! extended with derived variables and finally mapped onto the
//! dimensions of its target output variable. Arrays produced for the
//! same target are then concatenated along the feature dimension and
//! all targets are merged into one dataset sharing a coordinate space.
//!
//! When splitting is configured, statistics are computed over each
//! split that asks for them and split boundaries are stored alongside
//! the data. The projection shared by the inputs, if any, is stored
//! as a scalar `crs` variable that the target variables refer to. The assembled dataset is written together with the
//! chunk shapes resolved from the configuration.

mod chunking;
mod configuration;
mod dataset;
mod derived;
mod loading;
mod mapping;
mod merging;
mod projection;
mod recreate;
mod selection;
mod stacking;
mod statistics;
mod storage;

#[cfg(test)]
mod super_tests;

use crate::constants::{
    CREATED_WITH, DATETIME_UNITS, GRID_MAPPING_ATTR, PROJECTION_VARIABLE, SOURCE_DATASET_ATTR,
    SPLITS_VARIABLE, SPLIT_NAME_DIM, SPLIT_PART_DIM,
};
use crate::errors::{ArrayError, ConfigError, InputError, PrepError};
use crate::{Float, ALLOCATOR};
use chunking::chunk_shapes;
use configuration::{Config, InputDataset, Range, Selection, Splitting};
use dataset::{AttrValue, Attributes, CoordValues, Coordinate, Label, LabeledArray, LabeledDataset};
use derived::{derive_variables, Registry};
use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use loading::{check_dataset_attributes, load_and_subset_dataset};
use log::{debug, info};
use mapping::map_dims_and_variables;
use merging::merge_by_target;
use projection::{projection_variable, resolve_projection, validate_projection_consistency};
use recreate::recreate_inputs;
use ndarray::{ArrayD, IxDyn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use selection::{select_array_ranges, select_by_kwargs};
use statistics::calc_stats;
use std::{
    fs,
    path::{Path, PathBuf},
};
use storage::{default_storage, ChunkShapes, Storage};

/// Main preparation function, responsible for all pipeline steps.
///
/// It reads the configuration, assembles the dataset and writes it
/// to `output_path`, or next to the configuration file with the
/// `.zarr` extension when no path is given. Returns the path written.
pub fn main(config_path: &Path, output_path: Option<PathBuf>) -> Result<PathBuf, PrepError> {
    info!("Preparing the pipeline core");

    let core = Core::new(config_path)?;
    let storage = default_storage()?;

    let prepared = create_dataset(&core, storage.as_ref())?;

    let output_path = output_path.unwrap_or_else(|| config_path.with_extension("zarr"));
    prepare_output_path(&output_path)?;

    info!("Writing dataset to {}", output_path.display());
    storage.write(&prepared.dataset, &prepared.chunks, &output_path)?;

    Ok(output_path)
}

/// Recreates the input datasets from the dataset prepared at `dataset_path`
/// with the configuration at `config_path`.
///
/// Each input with variables read from its source is written as
/// `{input}.zarr` to `output_dir`, or next to the prepared dataset.
/// Returns the paths written.
pub fn recreate(
    config_path: &Path,
    dataset_path: &Path,
    output_dir: Option<PathBuf>,
) -> Result<Vec<PathBuf>, PrepError> {
    info!("Preparing the pipeline core");

    let core = Core::new(config_path)?;
    let storage = default_storage()?;

    debug!("Opening {}", dataset_path.display());
    let prepared = storage.open(dataset_path)?;

    let output_dir = output_dir
        .or_else(|| dataset_path.parent().map(Path::to_path_buf))
        .unwrap_or_default();

    let mut written = vec![];
    for (name, dataset) in recreate_inputs(prepared.as_ref(), &core.config)? {
        if dataset.is_empty() {
            info!("Input `{}` has only derived variables, skipping it", name);
            continue;
        }

        let path = output_dir.join(format!("{}.zarr", name));
        prepare_output_path(&path)?;

        info!("Writing input `{}` to {}", name, path.display());
        let chunks = chunk_shapes(&dataset, &IndexMap::new());
        storage.write(&dataset, &chunks, &path)?;
        written.push(path);
    }

    Ok(written)
}

/// Structure containing pipeline parameters.
///
/// Holds the checked configuration together with the resources
/// shared by all steps of the preparation.
pub struct Core {
    pub config: Config,
    pub threadpool: ThreadPool,
    pub registry: Registry,
}

impl Core {
    /// Pipeline [`Core`] constructor reading the configuration from file.
    pub fn new(config_path: &Path) -> Result<Self, PrepError> {
        debug!("Reading configuration from {}", config_path.display());
        let config = Config::new_from_file(config_path)?;

        Core::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, PrepError> {
        debug!("Setting memory limit");
        ALLOCATOR
            .set_limit(config.resources.memory.saturating_mul(1024 * 1024))
            .map_err(|_| PrepError::MemoryLimit(config.resources.memory))?;

        debug!("Setting up ThreadPool");
        let threadpool = ThreadPoolBuilder::new()
            .num_threads(config.resources.threads as usize)
            .stack_size(2 * 1024 * 1024)
            .build()?;

        Ok(Core {
            config,
            threadpool,
            registry: Registry::new(),
        })
    }
}

/// Assembled dataset ready to be written.
#[derive(Debug)]
pub struct PreparedDataset {
    pub dataset: LabeledDataset,
    pub chunks: ChunkShapes,
}

/// Assembles the output dataset from all configured inputs.
pub fn create_dataset(core: &Core, storage: &dyn Storage) -> Result<PreparedDataset, PrepError> {
    let config = &core.config;

    let inputs_bar = ProgressBar::new(config.inputs.len() as u64);
    inputs_bar.set_style(
        ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
            .progress_chars("#>-"),
    );
    inputs_bar.set_prefix("Processed inputs");

    let mut arrays_by_target: IndexMap<String, Vec<LabeledArray>> = IndexMap::new();
    let mut projections: Vec<(String, Attributes)> = vec![];
    let mut projected_targets: Vec<String> = vec![];

    for (name, input) in &config.inputs {
        info!("Processing input dataset `{}`", name);

        let (array, projection) = process_input(core, storage, name, input).map_err(|source| {
            PrepError::Input {
                dataset: name.clone(),
                target: input.target_output_variable.clone(),
                source,
            }
        })?;

        if let Some(projection) = projection {
            projections.push((name.clone(), projection));
            if !projected_targets.contains(&input.target_output_variable) {
                projected_targets.push(input.target_output_variable.clone());
            }
        }

        arrays_by_target
            .entry(input.target_output_variable.clone())
            .or_default()
            .push(array);
        inputs_bar.inc(1);
    }

    inputs_bar.finish_with_message("All inputs processed");

    let projection = validate_projection_consistency(&projections)?;

    info!("Merging target variables");
    let mut dataset = merge_by_target(arrays_by_target)?;

    if let Some(splitting) = &config.output.splitting {
        add_split_statistics(core, &mut dataset, splitting)?;
        dataset.insert(SPLITS_VARIABLE, splits_array(splitting)?)?;
    }

    if let Some(projection) = &projection {
        debug!("Adding projection variable `{}`", PROJECTION_VARIABLE);
        for target in &projected_targets {
            let array = dataset
                .variable(target)?
                .clone()
                .with_attr(GRID_MAPPING_ATTR, PROJECTION_VARIABLE);
            dataset.insert(target, array)?;
        }
        dataset.insert(PROJECTION_VARIABLE, projection_variable(projection)?)?;
    }

    dataset.attrs = output_attributes(config);

    debug!("Resolving chunk shapes");
    let chunks = chunk_shapes(&dataset, &config.output.chunking);

    Ok(PreparedDataset { dataset, chunks })
}

/// Turns one input dataset into an array of its target output variable,
/// returned with the projection of the input.
fn process_input(
    core: &Core,
    storage: &dyn Storage,
    name: &str,
    input: &InputDataset,
) -> Result<(LabeledArray, Option<Attributes>), InputError> {
    let config = &core.config;

    debug!("Opening {}", input.path.display());
    let source = storage.open(&input.path)?;

    let mut dataset = match &input.variables {
        Some(variables) => load_and_subset_dataset(source.as_ref(), variables)?,
        None => {
            let mut dataset = LabeledDataset::new();
            dataset.attrs = source.attributes();
            dataset
        }
    };

    check_dataset_attributes(&source.attributes(), &input.attributes)?;

    let projection = resolve_projection(name, source.as_ref(), &dataset, &input.projections)?;

    if !input.derived_variables.is_empty() {
        debug!("Deriving variables of `{}`", name);
        dataset = derive_variables(
            source.as_ref(),
            dataset,
            &input.derived_variables,
            &input.dims,
            &core.registry,
        )?;
    }

    let mapped = map_dims_and_variables(&dataset, &input.dim_mapping, &input.dims)?;

    let output_dims = config
        .output
        .variables
        .get(&input.target_output_variable)
        .cloned()
        .unwrap_or_else(|| mapped.dims().to_vec());
    let mut array = mapped.transpose_to(&output_dims)?;

    let ranges: IndexMap<String, Range> = config
        .output
        .coord_ranges
        .iter()
        .filter(|(dim, _)| output_dims.contains(*dim))
        .map(|(dim, range)| (dim.clone(), range.clone()))
        .collect();

    if !ranges.is_empty() {
        debug!("Selecting output coordinate ranges of `{}`", name);
        array = select_array_ranges(&array, &ranges)?;
    }

    Ok((array.with_attr(SOURCE_DATASET_ATTR, name), projection))
}

/// Adds `{variable}__{split}__{op}` variables for every split
/// with statistics configured.
///
/// All statistics are computed from the merged dataset before
/// any of them is added to it.
fn add_split_statistics(
    core: &Core,
    dataset: &mut LabeledDataset,
    splitting: &Splitting,
) -> Result<(), PrepError> {
    let mut computed = vec![];

    for (split_name, split) in &splitting.splits {
        let statistics = match &split.compute_statistics {
            Some(statistics) => statistics,
            None => continue,
        };

        info!("Computing statistics for split `{}`", split_name);

        let mut selection = IndexMap::new();
        selection.insert(
            splitting.dim.clone(),
            Selection::Range(Range {
                start: split.start.clone(),
                end: split.end.clone(),
                step: None,
            }),
        );
        let split_dataset = select_by_kwargs(dataset, &selection)?;

        let stats = calc_stats(&split_dataset, statistics, &splitting.dim, &core.threadpool)?;
        for (op, reduced) in stats {
            for (var_name, array) in reduced.variables() {
                computed.push((format!("{}__{}__{}", var_name, split_name, op), array.clone()));
            }
        }
    }

    for (name, array) in computed {
        dataset.insert(&name, array)?;
    }

    Ok(())
}

/// Split boundaries as an array over split names and
/// split parts (`start`, `end`).
///
/// Datetime bounds are stored as seconds since the Unix epoch.
fn splits_array(splitting: &Splitting) -> Result<LabeledArray, PrepError> {
    let mut values: Vec<Float> = Vec::with_capacity(splitting.splits.len() * 2);
    let mut all_datetimes = true;

    for (split_name, split) in &splitting.splits {
        for bound in [&split.start, &split.end] {
            let bound = bound
                .as_ref()
                .ok_or_else(|| ConfigError::IncompleteSplit(split_name.clone()))?;

            let value = match bound.to_label() {
                Label::DateTime(dt) => dt.and_utc().timestamp() as Float,
                Label::Int(v) => {
                    all_datetimes = false;
                    v as Float
                }
                Label::Float(v) => {
                    all_datetimes = false;
                    v
                }
                Label::Str(_) => {
                    return Err(ConfigError::InvalidSplitBound {
                        split: split_name.clone(),
                        bound: bound.to_string(),
                    }
                    .into())
                }
            };

            values.push(value);
        }
    }

    let data = ArrayD::from_shape_vec(IxDyn(&[splitting.splits.len(), 2]), values)
        .map_err(ArrayError::from)?;

    let names: Vec<String> = splitting.splits.keys().cloned().collect();
    let parts = vec!["start".to_string(), "end".to_string()];

    let mut splits = LabeledArray::new(data, &[SPLIT_NAME_DIM, SPLIT_PART_DIM])?
        .with_coord(SPLIT_NAME_DIM, Coordinate::new(SPLIT_NAME_DIM, CoordValues::Str(names)))?
        .with_coord(SPLIT_PART_DIM, Coordinate::new(SPLIT_PART_DIM, CoordValues::Str(parts)))?
        .with_attr("splitting_dim", splitting.dim.as_str());

    if all_datetimes {
        splits = splits.with_attr("units", DATETIME_UNITS);
    }

    Ok(splits)
}

/// Dataset attributes describing how the output was made.
fn output_attributes(config: &Config) -> Attributes {
    let mut attrs = Attributes::new();

    attrs.insert(
        "schema_version".to_string(),
        AttrValue::from(config.schema_version.as_str()),
    );
    attrs.insert(
        "dataset_version".to_string(),
        AttrValue::from(config.dataset_version.as_str()),
    );
    attrs.insert(
        "created_on".to_string(),
        AttrValue::from(chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()),
    );
    attrs.insert("created_with".to_string(), AttrValue::from(CREATED_WITH));
    attrs.insert(
        format!("{}_version", CREATED_WITH),
        AttrValue::from(concat!("v", env!("CARGO_PKG_VERSION"))),
    );

    attrs
}

/// Removes whatever is present at `path` so the output can be written.
fn prepare_output_path(path: &Path) -> Result<(), PrepError> {
    if path.is_dir() {
        info!("Output {} exists, replacing it", path.display());
        fs::remove_dir_all(path)?;
    } else if path.exists() {
        info!("Output {} exists, replacing it", path.display());
        fs::remove_file(path)?;
    }

    Ok(())
}
