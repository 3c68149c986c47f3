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

//! Projection (coordinate reference system) of the inputs.
//!
//! Projections follow the CF grid-mapping convention: a variable
//! names a projection variable in its `grid_mapping` attribute and
//! that variable carries the CRS as its attributes. A projection
//! given in the configuration replaces the one in the source. All
//! inputs with a projection must agree on it, and the common one is
//! written to the output as a scalar `crs` variable.

use super::configuration::Projection;
use super::dataset::{AttrValue, Attributes, LabeledArray, LabeledDataset};
use super::loading::DatasetSource;
use crate::constants::{CRS_WKT_ATTR, GRID_MAPPING_ATTR, GRID_MAPPING_NAME_ATTR};
use crate::errors::{ArrayError, ProjectionError};
use indexmap::IndexMap;
use log::{debug, warn};
use ndarray::{ArrayD, IxDyn};

/// Projection variable names in a `grid_mapping` attribute,
/// either a single name or the extended `name: coord coord` form.
pub fn grid_mapping_names(attr: &str) -> Vec<String> {
    if !attr.contains(':') {
        return attr.split_whitespace().map(str::to_string).collect();
    }

    attr.split_whitespace()
        .filter(|token| token.contains(':'))
        .filter_map(|token| token.split(':').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Projection referenced by the loaded variables of `dataset`.
///
/// Either every variable refers to the same projection variable,
/// or none does.
pub fn projection_from_source(
    source: &dyn DatasetSource,
    dataset: &LabeledDataset,
) -> Result<Option<Attributes>, ProjectionError> {
    let mut referenced: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut unreferenced = vec![];

    for (name, array) in dataset.variables() {
        match array.attrs.get(GRID_MAPPING_ATTR).and_then(AttrValue::as_str) {
            Some(attr) => {
                for projection in grid_mapping_names(attr) {
                    referenced.entry(projection).or_default().push(name.clone());
                }
            }
            None => unreferenced.push(name.clone()),
        }
    }

    let projection = match referenced.len() {
        0 => return Ok(None),
        1 => referenced.keys().next().cloned().unwrap_or_default(),
        _ => {
            return Err(ProjectionError::MultipleReferenced(
                referenced.keys().cloned().collect(),
            ))
        }
    };

    if !unreferenced.is_empty() {
        return Err(ProjectionError::Unreferenced {
            variables: unreferenced,
            projection,
        });
    }

    let attrs = source.variable(&projection)?.attrs;
    if !defines_crs(&attrs) {
        return Err(ProjectionError::Undefined(projection));
    }

    Ok(Some(attrs))
}

/// Projection of one input: the configured one if given,
/// otherwise the one referenced in the source.
pub fn resolve_projection(
    input: &str,
    source: &dyn DatasetSource,
    dataset: &LabeledDataset,
    configured: &IndexMap<String, Projection>,
) -> Result<Option<Attributes>, ProjectionError> {
    let from_source = projection_from_source(source, dataset)?;
    let from_config = configured.values().next().map(|p| p.attributes.clone());

    let projection = match (from_source, from_config) {
        (Some(found), None) => Some(found),
        (None, Some(given)) => {
            warn!(
                "Projection not found in dataset `{}`, using the one from the configuration",
                input
            );
            Some(given)
        }
        (Some(_), Some(given)) => {
            warn!(
                "Projection of dataset `{}` is replaced by the one from the configuration",
                input
            );
            Some(given)
        }
        (None, None) => {
            debug!("No projection for `{}` in the dataset or the configuration", input);
            None
        }
    };

    Ok(projection)
}

/// Checks that all inputs use one projection and returns it.
///
/// Projections with `crs_wkt` are compared by it. Other attributes
/// present in both projections must be equal. Attributes present in
/// only one of them leave the projection ambiguous, which is reported
/// but allowed.
pub fn validate_projection_consistency(
    projections: &[(String, Attributes)],
) -> Result<Option<Attributes>, ProjectionError> {
    let (first_name, first) = match projections.first() {
        Some(first) => first,
        None => return Ok(None),
    };

    for (name, other) in &projections[1..] {
        let mut missing = vec![];

        for key in first.keys().chain(other.keys().filter(|k| !first.contains_key(*k))) {
            match (first.get(key), other.get(key)) {
                (Some(a), Some(b)) if !same_value(a, b) => {
                    return Err(ProjectionError::Inconsistent {
                        first: first_name.clone(),
                        other: name.clone(),
                        key: key.clone(),
                    })
                }
                (Some(_), Some(_)) => (),
                _ => missing.push(key.clone()),
            }
        }

        if !missing.is_empty() {
            warn!(
                "Projections of `{}` and `{}` might be ambiguous, {:?} are given in only one of them",
                first_name, name, missing
            );
        }
    }

    if let Some(wkt) = first.get(CRS_WKT_ATTR).and_then(AttrValue::as_str) {
        if !wkt.contains("BBOX") {
            warn!("The `crs_wkt` of the projection has no BBOX, some plotting tools need it");
        }
    }

    Ok(Some(first.clone()))
}

/// Scalar variable carrying the projection attributes.
pub fn projection_variable(attrs: &Attributes) -> Result<LabeledArray, ArrayError> {
    let no_dims: [&str; 0] = [];
    let mut variable = LabeledArray::new(ArrayD::zeros(IxDyn(&[])), &no_dims)?;
    variable.attrs = attrs.clone();
    Ok(variable)
}

fn defines_crs(attrs: &Attributes) -> bool {
    attrs.contains_key(CRS_WKT_ATTR) || attrs.contains_key(GRID_MAPPING_NAME_ATTR)
}

fn same_value(a: &AttrValue, b: &AttrValue) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}
