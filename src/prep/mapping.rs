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

//! Mapping of input dimensions and variables onto
//! the dimensions of an output variable.
//!
//! Structural mappings (rename, stack) are applied first, in the order
//! they appear in the configuration. The single feature mapping is
//! applied last and turns the dataset into one array.

use super::configuration::{DimMapping, SourceDims};
use super::dataset::{LabeledArray, LabeledDataset};
use super::stacking::{stack_variables_as_labels, stack_variables_by_coord_labels};
use crate::constants::VARIABLES_MAPPING_DIM_ATTR;
use crate::errors::MappingError;
use indexmap::IndexMap;
use log::debug;

/// Structural mapping, applied to every variable separately.
enum Structural<'a> {
    Rename(&'a str),
    Stack(&'a SourceDims),
}

/// Produces the array of one input dataset with exactly the
/// dimensions named by the keys of `dim_mapping`, in that order.
///
/// The result records the name of its feature dimension
/// in the `variables_mapping_dim` attribute.
pub fn map_dims_and_variables(
    dataset: &LabeledDataset,
    dim_mapping: &IndexMap<String, DimMapping>,
    expected_input_dims: &[String],
) -> Result<LabeledArray, MappingError> {
    let mut structural = vec![];
    let mut features = vec![];

    for (output_dim, mapping) in dim_mapping {
        match mapping {
            DimMapping::Rename { dim } => {
                structural.push((output_dim, mapping, Structural::Rename(dim)))
            }
            DimMapping::Stack { dims } => {
                structural.push((output_dim, mapping, Structural::Stack(dims)))
            }
            DimMapping::StackVariablesByVarName { dims, name_format } => {
                features.push((output_dim, mapping, dims, name_format))
            }
        }
    }

    let (feature_dim, feature_mapping, feature_dims, name_format) = match features.as_slice() {
        [single] => *single,
        [] => return Err(MappingError::MissingVariableStacking),
        many => {
            return Err(MappingError::MultipleVariableStackings(
                many.iter().map(|(dim, ..)| dim.to_string()).collect(),
            ))
        }
    };

    for (name, array) in dataset.variables() {
        let undeclared: Vec<String> = array
            .dims()
            .iter()
            .filter(|d| !expected_input_dims.contains(*d))
            .cloned()
            .collect();

        if !undeclared.is_empty() {
            return Err(MappingError::UndeclaredDimensions {
                variable: name.clone(),
                dims: undeclared,
                expected: expected_input_dims.to_vec(),
            });
        }
    }

    let mut mapped = dataset.clone();
    for (output_dim, mapping, step) in &structural {
        debug!("Applying {} to produce dimension {}", mapping, output_dim);

        mapped = apply_structural(&mapped, output_dim, step)
            .map_err(|err| with_context(err, &mapped, output_dim, mapping))?;
    }

    debug!("Applying {} to produce dimension {}", feature_mapping, feature_dim);

    let stacked = apply_feature(&mapped, feature_dim, feature_dims, name_format)
        .map_err(|err| with_context(err, &mapped, feature_dim, feature_mapping))?;

    let unmapped: Vec<String> = stacked
        .dims()
        .iter()
        .filter(|d| !dim_mapping.contains_key(*d))
        .cloned()
        .collect();
    if !unmapped.is_empty() {
        return Err(MappingError::UnmappedDimensions(unmapped));
    }

    let order: Vec<&String> = dim_mapping.keys().collect();
    let result = stacked
        .transpose_to(&order)?
        .with_attr(VARIABLES_MAPPING_DIM_ATTR, feature_dim.as_str());

    Ok(result)
}

fn apply_structural(
    dataset: &LabeledDataset,
    output_dim: &str,
    step: &Structural,
) -> Result<LabeledDataset, MappingError> {
    let mapped = match step {
        Structural::Rename(dim) => {
            check_source_dims(dataset, &[dim.to_string()])?;
            dataset.try_map(|_, array| array.rename_dim(dim, output_dim))?
        }
        Structural::Stack(dims) => {
            let dims = dims.resolve()?;
            check_source_dims(dataset, &dims)?;
            dataset.try_map(|_, array| array.stack_dims(&dims, output_dim))?
        }
    };

    Ok(mapped)
}

/// Every variable must span all source dimensions of a structural mapping.
fn check_source_dims(dataset: &LabeledDataset, source_dims: &[String]) -> Result<(), MappingError> {
    for (name, array) in dataset.variables() {
        if let Some(dim) = source_dims.iter().find(|d| !array.has_dim(d)) {
            return Err(MappingError::VariableWithoutDim {
                variable: name.clone(),
                dim: dim.clone(),
                dims: array.dims().to_vec(),
            });
        }
    }

    Ok(())
}

fn apply_feature(
    dataset: &LabeledDataset,
    output_dim: &str,
    dims: &SourceDims,
    name_format: &str,
) -> Result<LabeledArray, MappingError> {
    let dims = dims.resolve()?;

    let stacked = match dims.as_slice() {
        [] => stack_variables_as_labels(dataset, name_format, output_dim)?,
        [coord] => stack_variables_by_coord_labels(dataset, coord, name_format, output_dim)?,
        _ => return Err(MappingError::NotImplemented(dims)),
    };

    Ok(stacked)
}

fn with_context(
    err: MappingError,
    dataset: &LabeledDataset,
    output_dim: &str,
    mapping: &DimMapping,
) -> MappingError {
    MappingError::InMapping {
        output_dim: output_dim.to_string(),
        mapping: mapping.to_string(),
        variables: dataset.names(),
        dims: dataset.dims().keys().cloned().collect(),
        source: Box::new(err),
    }
}
