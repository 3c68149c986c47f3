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

//! Variables computed from the fields and coordinates of an input.
//!
//! Functions are looked up by name in a [`Registry`] built at startup.
//! Arguments written as `ds_input.<name>` in the configuration are read
//! from the source dataset, every other argument is passed as a literal.
//!
//! Datetime coordinates are handed to functions as seconds since
//! the Unix epoch, with the original coordinate still attached.

mod physical_field;
mod time_components;

use super::configuration::DerivedVariable;
use super::dataset::{AttrValue, Attributes, CoordValues, Coordinate, LabeledArray, LabeledDataset};
use super::loading::DatasetSource;
use crate::constants::PER_FEATURE_ATTRS;
use crate::errors::{ArrayError, DeriveError, LoadError};
use crate::Float;
use chrono::{DateTime, NaiveDateTime};
use indexmap::IndexMap;
use log::{debug, info, warn};
use ndarray::{ArrayD, IxDyn};
use rustc_hash::{FxHashMap, FxHashSet};

const INPUT_PREFIX: &str = "ds_input.";

pub type DeriveFn = fn(&DerivedArgs) -> Result<LabeledArray, DeriveError>;

/// Derivation functions available to the configuration.
#[derive(Clone)]
pub struct Registry {
    functions: FxHashMap<&'static str, DeriveFn>,
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Registry {
            functions: FxHashMap::default(),
        };

        registry.register("toa_radiation", physical_field::toa_radiation);
        registry.register("virtual_temperature", physical_field::virtual_temperature);
        registry.register("hour_of_day", time_components::hour_of_day);
        registry.register("day_of_year", time_components::day_of_year);

        registry
    }

    pub fn register(&mut self, name: &'static str, function: DeriveFn) {
        self.functions.insert(name, function);
    }

    pub fn get(&self, name: &str) -> Result<DeriveFn, DeriveError> {
        self.functions
            .get(name)
            .copied()
            .ok_or_else(|| DeriveError::UnknownFunction(name.to_string()))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments of a derivation function, resolved against the source.
#[derive(Debug)]
pub struct DerivedArgs {
    function: String,
    arrays: IndexMap<String, LabeledArray>,
    times: FxHashSet<String>,
    literals: IndexMap<String, AttrValue>,
}

impl DerivedArgs {
    pub fn resolve(
        function: &str,
        kwargs: &IndexMap<String, AttrValue>,
        source: &dyn DatasetSource,
    ) -> Result<Self, DeriveError> {
        let mut args = DerivedArgs {
            function: function.to_string(),
            arrays: IndexMap::new(),
            times: FxHashSet::default(),
            literals: IndexMap::new(),
        };

        for (arg, value) in kwargs {
            let input_name = value.as_str().and_then(|v| v.strip_prefix(INPUT_PREFIX));

            let Some(input_name) = input_name else {
                args.literals.insert(arg.clone(), value.clone());
                continue;
            };

            match source.coordinate(input_name) {
                Ok(coord) => {
                    if matches!(coord.values, CoordValues::DateTime(_)) {
                        args.times.insert(arg.clone());
                    }
                    args.arrays
                        .insert(arg.clone(), coordinate_to_array(input_name, coord)?);
                }
                Err(LoadError::MissingCoordinate(_)) => {
                    args.arrays.insert(arg.clone(), source.variable(input_name)?);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(args)
    }

    pub fn array(&self, arg: &str) -> Result<&LabeledArray, DeriveError> {
        self.arrays.get(arg).ok_or_else(|| self.missing(arg))
    }

    /// Datetime argument, as seconds since the Unix epoch.
    pub fn times(&self, arg: &str) -> Result<&LabeledArray, DeriveError> {
        let array = self.array(arg)?;
        if !self.times.contains(arg) {
            return Err(DeriveError::NotDateTime(arg.to_string()));
        }
        Ok(array)
    }

    pub fn literal_str(&self, arg: &str) -> Result<&str, DeriveError> {
        let value = self.literals.get(arg).ok_or_else(|| self.missing(arg))?;

        value.as_str().ok_or_else(|| DeriveError::InvalidArgument {
            function: self.function.clone(),
            argument: arg.to_string(),
            reason: format!("expected text, found `{}`", value),
        })
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    fn missing(&self, arg: &str) -> DeriveError {
        DeriveError::MissingArgument {
            function: self.function.clone(),
            argument: arg.to_string(),
        }
    }
}

fn coordinate_to_array(name: &str, coord: Coordinate) -> Result<LabeledArray, DeriveError> {
    let seconds: Vec<Float> = match &coord.values {
        CoordValues::DateTime(times) => times
            .iter()
            .map(|t| t.and_utc().timestamp() as Float)
            .collect(),
        _ => {
            return LabeledArray::from_coordinate(name, &coord)
                .ok_or_else(|| DeriveError::NotNumeric(name.to_string()))
        }
    };

    let data = ArrayD::from_shape_vec(IxDyn(&[seconds.len()]), seconds)
        .map_err(ArrayError::from)?;
    let dim = coord.dim.clone();

    Ok(LabeledArray::new(data, &[dim])?.with_coord(name, coord)?)
}

/// Datetime of an epoch-seconds value produced by [`DerivedArgs::times`].
pub(super) fn datetime_of(seconds: Float) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(seconds as i64, 0).map(|dt| dt.naive_utc())
}

/// Computes the derived variables of one input and adds them to
/// `dataset`, broadcast to the declared `input_dims` of the input.
///
/// All fields are computed before any is aligned, so the result does
/// not depend on the order in which they are declared.
pub fn derive_variables(
    source: &dyn DatasetSource,
    mut dataset: LabeledDataset,
    derived: &IndexMap<String, DerivedVariable>,
    input_dims: &[String],
    registry: &Registry,
) -> Result<LabeledDataset, DeriveError> {
    let mut fields = Vec::with_capacity(derived.len());

    for (name, variable) in derived {
        info!("Deriving `{}` with function `{}`", name, variable.function);

        let function = registry.get(&variable.function)?;
        let args = DerivedArgs::resolve(&variable.function, &variable.kwargs, source)?;

        let mut field = function(&args)?;
        field.attrs = required_attributes(name, &field.attrs, &variable.attributes)?;

        fields.push((name.clone(), field));
    }

    let frame = TargetFrame::resolve(input_dims, &dataset, &fields, source)?;
    debug!("Aligning derived variables to {:?}", frame.dims);

    for (name, field) in fields {
        let aligned = frame.align(&field)?;
        dataset.insert(&name, aligned)?;
    }

    Ok(dataset)
}

/// Dimensions derived fields are broadcast to.
///
/// These are the declared input dimensions known from the loaded
/// variables, the derived fields or the source coordinates, in
/// declaration order. Dimensions known from none of them are skipped.
struct TargetFrame {
    dims: Vec<String>,
    shape: Vec<usize>,
    coords: IndexMap<String, Coordinate>,
}

impl TargetFrame {
    fn resolve(
        input_dims: &[String],
        dataset: &LabeledDataset,
        fields: &[(String, LabeledArray)],
        source: &dyn DatasetSource,
    ) -> Result<Self, DeriveError> {
        let loaded_dims = dataset.dims();
        let loaded_coords = dataset.coords();

        let mut frame = TargetFrame {
            dims: vec![],
            shape: vec![],
            coords: IndexMap::new(),
        };

        for dim in input_dims {
            let size = loaded_dims
                .get(dim)
                .copied()
                .or_else(|| fields.iter().find_map(|(_, f)| f.dim_size(dim)));
            let coord = loaded_coords
                .get(dim)
                .cloned()
                .or_else(|| fields.iter().find_map(|(_, f)| f.coord(dim).cloned()));

            let (size, coord) = match size {
                Some(size) => (size, coord),
                None => match source.coordinate(dim) {
                    Ok(coord) if coord.dim == *dim => (coord.len(), Some(coord)),
                    Ok(_) | Err(LoadError::MissingCoordinate(_)) => continue,
                    Err(err) => return Err(err.into()),
                },
            };

            frame.dims.push(dim.clone());
            frame.shape.push(size);
            if let Some(coord) = coord {
                frame.coords.insert(dim.clone(), coord);
            }
        }

        Ok(frame)
    }

    /// Puts `field` on the frame dimensions, keeping dimensions
    /// unknown to the frame at the end.
    fn align(&self, field: &LabeledArray) -> Result<LabeledArray, ArrayError> {
        let mut dims = self.dims.clone();
        let mut shape = self.shape.clone();
        for (dim, &size) in field.dims().iter().zip(field.shape()) {
            if !dims.contains(dim) {
                dims.push(dim.clone());
                shape.push(size);
            }
        }

        let mut aligned = field.broadcast_to(&dims, &shape)?;
        for (name, coord) in &self.coords {
            if aligned.coord(name).is_none() {
                aligned.set_coord(name, coord.clone())?;
            }
        }

        Ok(aligned)
    }
}

/// `units` and `long_name` of a derived field, with
/// configured values taking precedence.
fn required_attributes(
    variable: &str,
    from_function: &Attributes,
    from_config: &Attributes,
) -> Result<Attributes, DeriveError> {
    let mut attrs = Attributes::new();
    let mut missing = vec![];

    for attr in PER_FEATURE_ATTRS {
        match (from_function.get(attr), from_config.get(attr)) {
            (Some(set), Some(configured)) => {
                if set != configured {
                    warn!(
                        "Attribute `{}` of derived variable `{}` is overwritten from `{}` to `{}` as configured",
                        attr, variable, set, configured
                    );
                }
                attrs.insert(attr.to_string(), configured.clone());
            }
            (Some(value), None) | (None, Some(value)) => {
                attrs.insert(attr.to_string(), value.clone());
            }
            (None, None) => missing.push(attr.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(DeriveError::MissingAttributes {
            variable: variable.to_string(),
            missing,
        });
    }

    Ok(attrs)
}

/// Checks the `component` argument of cyclic encodings.
pub(super) fn cyclic_component(args: &DerivedArgs) -> Result<fn(Float) -> Float, DeriveError> {
    match args.literal_str("component")? {
        "sin" => Ok(Float::sin),
        "cos" => Ok(Float::cos),
        other => Err(DeriveError::InvalidArgument {
            function: args.function().to_string(),
            argument: "component".to_string(),
            reason: format!("expected `sin` or `cos`, found `{}`", other),
        }),
    }
}
