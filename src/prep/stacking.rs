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

//! Functions combining all variables of a dataset into
//! a single array along a new feature dimension.
//!
//! Per-variable attributes do not survive concatenation, so
//! `units` and `long_name` of every variable are kept as auxiliary
//! coordinates `{dim}_units` and `{dim}_long_name` of the new dimension.

use super::dataset::{CoordValues, Coordinate, LabeledArray, LabeledDataset};
use crate::constants::{PER_FEATURE_ATTRS, VAR_NAME_PLACEHOLDER};
use crate::errors::StackingError;

/// Stacks every variable as a single slice of `new_dim`,
/// labeled with `name_format` filled with the variable name.
pub fn stack_variables_as_labels(
    dataset: &LabeledDataset,
    name_format: &str,
    new_dim: &str,
) -> Result<LabeledArray, StackingError> {
    if !name_format.contains(VAR_NAME_PLACEHOLDER) {
        return Err(StackingError::MissingVarNamePlaceholder(
            name_format.to_string(),
        ));
    }

    let dims = common_dims(dataset, new_dim)?;

    let mut slices = Vec::with_capacity(dataset.len());
    for (var_name, array) in dataset.variables() {
        let label = name_format.replace(VAR_NAME_PLACEHOLDER, var_name);

        let mut slice = array
            .transpose_to(&dims)?
            .expand_dims(new_dim, CoordValues::Str(vec![label]))?;
        attach_feature_attrs(&mut slice, array, new_dim, 1)?;

        slices.push(slice);
    }

    Ok(LabeledArray::concat(&slices, new_dim)?)
}

/// Stacks every variable along the labels of coordinate `coord`.
///
/// Each variable contributes one slice per label of `coord`, labeled
/// with `name_format` filled with the variable name and the label.
/// The dimension of `coord` is consumed and replaced by `new_dim`.
pub fn stack_variables_by_coord_labels(
    dataset: &LabeledDataset,
    coord: &str,
    name_format: &str,
    new_dim: &str,
) -> Result<LabeledArray, StackingError> {
    if !name_format.contains(VAR_NAME_PLACEHOLDER) {
        return Err(StackingError::MissingVarNamePlaceholder(
            name_format.to_string(),
        ));
    }

    let coord_placeholder = format!("{{{}}}", coord);
    if !name_format.contains(&coord_placeholder) {
        return Err(StackingError::MissingCoordPlaceholder {
            name_format: name_format.to_string(),
            coord: coord.to_string(),
        });
    }

    let coord_dim = dataset
        .coord(coord)
        .map(|c| c.dim.clone())
        .ok_or_else(|| StackingError::MissingCoordinate(coord.to_string()))?;

    let dims = common_dims(dataset, new_dim)?;

    let mut slices = Vec::with_capacity(dataset.len());
    for (var_name, array) in dataset.variables() {
        let values = array
            .coord(coord)
            .filter(|c| c.dim == coord_dim)
            .map(|c| c.values.labels())
            .ok_or_else(|| StackingError::VariableWithoutDim {
                variable: var_name.clone(),
                dim: coord_dim.clone(),
            })?;

        let labels: Vec<String> = values
            .iter()
            .map(|value| {
                name_format
                    .replace(VAR_NAME_PLACEHOLDER, var_name)
                    .replace(&coord_placeholder, &value.to_string())
            })
            .collect();

        let mut slice = array.transpose_to(&dims)?.rename_dim(&coord_dim, new_dim)?;
        slice.remove_coord(coord);
        slice.set_coord(new_dim, Coordinate::new(new_dim, CoordValues::Str(labels)))?;
        attach_feature_attrs(&mut slice, array, new_dim, values.len())?;

        slices.push(slice);
    }

    Ok(LabeledArray::concat(&slices, new_dim)?)
}

/// Dimensions of the first variable, to which all others are transposed.
fn common_dims(dataset: &LabeledDataset, new_dim: &str) -> Result<Vec<String>, StackingError> {
    dataset
        .variables()
        .next()
        .map(|(_, array)| array.dims().to_vec())
        .ok_or_else(|| StackingError::NoVariables(new_dim.to_string()))
}

fn attach_feature_attrs(
    slice: &mut LabeledArray,
    source: &LabeledArray,
    new_dim: &str,
    count: usize,
) -> Result<(), StackingError> {
    for attr in PER_FEATURE_ATTRS {
        let value = source
            .attrs
            .get(attr)
            .map(|v| v.to_string())
            .unwrap_or_default();

        slice.set_coord(
            &format!("{}_{}", new_dim, attr),
            Coordinate::new(new_dim, CoordValues::repeat_str(&value, count)),
        )?;
    }

    slice.attrs.clear();
    Ok(())
}
