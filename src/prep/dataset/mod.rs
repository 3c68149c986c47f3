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

//! In-memory labeled data model shared by all stages of the pipeline.
//!
//! A [`LabeledDataset`] is a set of named [`LabeledArray`]s living in
//! one coordinate space: a dimension shared by two variables has one
//! size, and a coordinate shared by two variables has one set of labels.
//! That rule is checked on every insertion, which is what makes the
//! final merge of target variables an exact-alignment merge.

mod array;
mod labels;

pub use array::LabeledArray;
pub use labels::{AttrValue, Attributes, CoordValues, Coordinate, Label};

use crate::errors::ArrayError;
use indexmap::IndexMap;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabeledDataset {
    variables: IndexMap<String, LabeledArray>,
    pub attrs: Attributes,
}

impl LabeledDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dataset from named arrays, failing on the first
    /// array that disagrees with those before it.
    pub fn from_arrays<I>(arrays: I) -> Result<Self, ArrayError>
    where
        I: IntoIterator<Item = (String, LabeledArray)>,
    {
        let mut dataset = LabeledDataset::new();
        for (name, array) in arrays {
            dataset.insert(&name, array)?;
        }
        Ok(dataset)
    }

    /// Adds or replaces a variable.
    pub fn insert(&mut self, name: &str, array: LabeledArray) -> Result<(), ArrayError> {
        for (other_name, other) in self.variables.iter().filter(|(n, _)| *n != name) {
            for dim in array.dims() {
                if let (Some(size), Some(other_size)) = (array.dim_size(dim), other.dim_size(dim)) {
                    if size != other_size {
                        return Err(ArrayError::DatasetConflict {
                            variable: name.to_string(),
                            dim: dim.clone(),
                            reason: format!(
                                "size {} differs from size {} of `{}`",
                                size, other_size, other_name
                            ),
                        });
                    }
                }
            }

            for (coord_name, coord) in array.coords() {
                if let Some(other_coord) = other.coord(coord_name) {
                    if other_coord.dim != coord.dim || other_coord.values != coord.values {
                        return Err(ArrayError::DatasetConflict {
                            variable: name.to_string(),
                            dim: coord.dim.clone(),
                            reason: format!(
                                "labels of coordinate `{}` differ from those of `{}`",
                                coord_name, other_name
                            ),
                        });
                    }
                }
            }
        }

        self.variables.insert(name.to_string(), array);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&LabeledArray> {
        self.variables.get(name)
    }

    pub fn variable(&self, name: &str) -> Result<&LabeledArray, ArrayError> {
        self.get(name)
            .ok_or_else(|| ArrayError::MissingVariable(name.to_string()))
    }

    pub fn variables(&self) -> impl Iterator<Item = (&String, &LabeledArray)> {
        self.variables.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Dimension sizes in order of first appearance.
    pub fn dims(&self) -> IndexMap<String, usize> {
        let mut dims = IndexMap::new();
        for array in self.variables.values() {
            for (dim, &size) in array.dims().iter().zip(array.shape()) {
                dims.entry(dim.clone()).or_insert(size);
            }
        }
        dims
    }

    /// All coordinates of all variables, first occurrence wins.
    pub fn coords(&self) -> IndexMap<String, Coordinate> {
        let mut coords = IndexMap::new();
        for array in self.variables.values() {
            for (name, coord) in array.coords() {
                coords.entry(name.clone()).or_insert_with(|| coord.clone());
            }
        }
        coords
    }

    pub fn coord(&self, name: &str) -> Option<&Coordinate> {
        self.variables.values().find_map(|array| array.coord(name))
    }

    /// Applies `f` to every variable, keeping names and attributes.
    pub fn try_map<F>(&self, mut f: F) -> Result<Self, ArrayError>
    where
        F: FnMut(&str, &LabeledArray) -> Result<LabeledArray, ArrayError>,
    {
        let mut mapped = LabeledDataset::new();
        mapped.attrs = self.attrs.clone();
        for (name, array) in &self.variables {
            mapped.insert(name, f(name, array)?)?;
        }
        Ok(mapped)
    }
}
