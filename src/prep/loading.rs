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

//! Reading of input variables from a source dataset.
//!
//! Sources are accessed through [`DatasetSource`], so the pipeline
//! does not depend on how and where the data is stored.

use super::configuration::{ValueSelection, Variables};
use super::dataset::{Attributes, Coordinate, LabeledArray, LabeledDataset};
use super::selection::select_indices;
use crate::errors::LoadError;
use log::debug;

/// Read access to one source dataset.
pub trait DatasetSource {
    /// Dataset-level attributes.
    fn attributes(&self) -> Attributes;

    /// Data variable with the coordinates of its dimensions attached.
    fn variable(&self, name: &str) -> Result<LabeledArray, LoadError>;

    /// Coordinate (numeric, string or datetime labels).
    fn coordinate(&self, name: &str) -> Result<Coordinate, LoadError>;
}

impl DatasetSource for LabeledDataset {
    fn attributes(&self) -> Attributes {
        self.attrs.clone()
    }

    fn variable(&self, name: &str) -> Result<LabeledArray, LoadError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| LoadError::MissingVariable(name.to_string()))
    }

    fn coordinate(&self, name: &str) -> Result<Coordinate, LoadError> {
        self.coord(name)
            .cloned()
            .ok_or_else(|| LoadError::MissingCoordinate(name.to_string()))
    }
}

/// Loads the requested variables, subsetting each along
/// its own coordinate selections.
pub fn load_and_subset_dataset(
    source: &dyn DatasetSource,
    variables: &Variables,
) -> Result<LabeledDataset, LoadError> {
    let mut dataset = LabeledDataset::new();
    dataset.attrs = source.attributes();

    match variables {
        Variables::List(names) => {
            for name in names {
                dataset.insert(name, source.variable(name)?)?;
            }
        }
        Variables::Selected(selected) => {
            for (name, selections) in selected {
                let mut array = source.variable(name)?;

                for (coord_name, selection) in selections {
                    array = subset_variable(name, array, coord_name, selection)?;
                }

                dataset.insert(name, array)?;
            }
        }
    }

    debug!(
        "Loaded variables {:?} with dimensions {:?}",
        dataset.names(),
        dataset.dims()
    );

    Ok(dataset)
}

fn subset_variable(
    variable: &str,
    array: LabeledArray,
    coord_name: &str,
    selection: &ValueSelection,
) -> Result<LabeledArray, LoadError> {
    let coord = array
        .coord(coord_name)
        .ok_or_else(|| LoadError::MissingCoordinate(format!("{} of {}", coord_name, variable)))?;

    if let (Some(expected), Some(found)) = (&selection.units, coord.attrs.get("units")) {
        if found.as_str() != Some(expected.as_str()) {
            return Err(LoadError::UnitsMismatch {
                coord: coord_name.to_string(),
                expected: expected.clone(),
                found: found.to_string(),
            });
        }
    }

    let indices = select_indices(coord_name, coord, &selection.values)?;
    Ok(array.isel(&coord.dim, &indices)?)
}

/// Checks that the source carries every expected attribute with its value.
pub fn check_dataset_attributes(
    attributes: &Attributes,
    expected: &Attributes,
) -> Result<(), LoadError> {
    for (name, value) in expected {
        match attributes.get(name) {
            None => return Err(LoadError::MissingAttribute(name.clone())),
            Some(found) if found != value => {
                return Err(LoadError::AttributeMismatch {
                    name: name.clone(),
                    expected: value.to_string(),
                    found: found.to_string(),
                })
            }
            Some(_) => (),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{check_dataset_attributes, load_and_subset_dataset};
    use crate::errors::LoadError;
    use crate::prep::configuration::{Bound, Selection, ValueSelection, Variables};
    use crate::prep::dataset::{AttrValue, Attributes, CoordValues, Coordinate, LabeledArray, LabeledDataset};
    use indexmap::IndexMap;
    use ndarray::{ArrayD, IxDyn};

    fn source() -> LabeledDataset {
        let level = Coordinate::new("altitude", CoordValues::Int(vec![50, 100, 200]))
            .with_attr("units", "m");

        let u = LabeledArray::new(ArrayD::zeros(IxDyn(&[4, 3])), &["x", "altitude"])
            .unwrap()
            .with_coord("altitude", level)
            .unwrap();

        let mut dataset =
            LabeledDataset::from_arrays(vec![("u".to_string(), u.clone()), ("v".to_string(), u)])
                .unwrap();
        dataset.attrs.insert("institution".to_string(), AttrValue::from("DMI"));
        dataset
    }

    fn at_altitude(value: i64, units: &str) -> Variables {
        let mut per_coord = IndexMap::new();
        per_coord.insert(
            "altitude".to_string(),
            ValueSelection {
                values: Selection::List(vec![Bound::Int(value)]),
                units: Some(units.to_string()),
            },
        );

        let mut selected = IndexMap::new();
        selected.insert("u".to_string(), per_coord);
        Variables::Selected(selected)
    }

    #[test]
    fn variables_are_subset_per_coordinate() {
        let loaded = load_and_subset_dataset(&source(), &at_altitude(100, "m")).unwrap();

        assert_eq!(loaded.names(), vec!["u".to_string()]);
        assert_eq!(loaded.get("u").unwrap().shape(), [4, 1]);
        assert_eq!(loaded.attrs.get("institution"), Some(&AttrValue::from("DMI")));
    }

    #[test]
    fn units_must_match() {
        assert!(matches!(
            load_and_subset_dataset(&source(), &at_altitude(100, "km")),
            Err(LoadError::UnitsMismatch { .. })
        ));
    }

    #[test]
    fn missing_variable_is_reported() {
        let list = Variables::List(vec!["u".to_string(), "w".to_string()]);
        assert!(matches!(
            load_and_subset_dataset(&source(), &list),
            Err(LoadError::MissingVariable(name)) if name == "w"
        ));
    }

    #[test]
    fn expected_attributes() {
        let attrs = source().attrs;
        let mut expected = Attributes::new();
        expected.insert("institution".to_string(), AttrValue::from("DMI"));
        assert!(check_dataset_attributes(&attrs, &expected).is_ok());

        expected.insert("institution".to_string(), AttrValue::from("SMHI"));
        assert!(matches!(
            check_dataset_attributes(&attrs, &expected),
            Err(LoadError::AttributeMismatch { .. })
        ));

        expected.insert("license".to_string(), AttrValue::from("CC-BY"));
        expected.shift_remove("institution");
        assert!(matches!(
            check_dataset_attributes(&attrs, &expected),
            Err(LoadError::MissingAttribute(_))
        ));
    }
}
