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

//! N-dimensional array with named axes, one-dimensional
//! coordinates and attributes.
//!
//! All transformations return a new array and leave
//! the original untouched.

use super::labels::{AttrValue, Attributes, CoordValues, Coordinate, Label};
use crate::{errors::ArrayError, Float};
use indexmap::IndexMap;
use ndarray::{concatenate, ArrayD, Axis, IxDyn};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Clone, Debug, PartialEq)]
pub struct LabeledArray {
    data: ArrayD<Float>,
    dims: Vec<String>,
    coords: IndexMap<String, Coordinate>,
    pub attrs: Attributes,
}

impl LabeledArray {
    /// Wraps `data` naming its axes with `dims`.
    pub fn new<S: AsRef<str>>(data: ArrayD<Float>, dims: &[S]) -> Result<Self, ArrayError> {
        if data.ndim() != dims.len() {
            return Err(ArrayError::DimensionCountMismatch {
                dims: dims.len(),
                ndim: data.ndim(),
            });
        }

        let dims: Vec<String> = dims.iter().map(|d| d.as_ref().to_string()).collect();
        check_unique(&dims)?;

        Ok(LabeledArray {
            data,
            dims,
            coords: IndexMap::new(),
            attrs: Attributes::new(),
        })
    }

    /// One-dimensional array holding numeric coordinate values,
    /// with the coordinate itself attached.
    pub fn from_coordinate(name: &str, coord: &Coordinate) -> Option<Self> {
        let values = match &coord.values {
            CoordValues::Int(v) => v.iter().map(|&x| x as Float).collect(),
            CoordValues::Float(v) => v.clone(),
            _ => return None,
        };

        let data = ArrayD::from_shape_vec(IxDyn(&[values.len()]), values).ok()?;
        let mut array = LabeledArray::new(data, &[coord.dim.as_str()]).ok()?;
        array.attrs = coord.attrs.clone();
        array.set_coord(name, coord.clone()).ok()?;

        Some(array)
    }

    pub fn with_coord(mut self, name: &str, coord: Coordinate) -> Result<Self, ArrayError> {
        self.set_coord(name, coord)?;
        Ok(self)
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    /// Attaches (or replaces) a coordinate, checking it fits its dimension.
    pub fn set_coord(&mut self, name: &str, coord: Coordinate) -> Result<(), ArrayError> {
        let expected = self
            .dim_size(&coord.dim)
            .ok_or_else(|| ArrayError::MissingDimension(coord.dim.clone()))?;

        if coord.len() != expected {
            return Err(ArrayError::CoordinateLength {
                name: name.to_string(),
                dim: coord.dim.clone(),
                expected,
                found: coord.len(),
            });
        }

        self.coords.insert(name.to_string(), coord);
        Ok(())
    }

    pub fn data(&self) -> &ArrayD<Float> {
        &self.data
    }

    pub fn into_data(self) -> ArrayD<Float> {
        self.data
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.dims.iter().any(|d| d == dim)
    }

    pub fn dim_size(&self, dim: &str) -> Option<usize> {
        self.axis_of(dim).ok().map(|ax| self.data.len_of(Axis(ax)))
    }

    pub fn axis_of(&self, dim: &str) -> Result<usize, ArrayError> {
        self.dims
            .iter()
            .position(|d| d == dim)
            .ok_or_else(|| ArrayError::MissingDimension(dim.to_string()))
    }

    pub fn coords(&self) -> &IndexMap<String, Coordinate> {
        &self.coords
    }

    pub fn coord(&self, name: &str) -> Option<&Coordinate> {
        self.coords.get(name)
    }

    pub fn remove_coord(&mut self, name: &str) -> Option<Coordinate> {
        self.coords.shift_remove(name)
    }

    /// Returns a copy with `from` dimension called `to`.
    ///
    /// The index coordinate of `from` is renamed along with it,
    /// auxiliary coordinates keep their names.
    pub fn rename_dim(&self, from: &str, to: &str) -> Result<Self, ArrayError> {
        let axis = self.axis_of(from)?;

        if from == to {
            return Ok(self.clone());
        }

        if self.has_dim(to) || self.coords.contains_key(to) {
            return Err(ArrayError::DimensionExists(to.to_string()));
        }

        let mut result = self.clone();
        result.dims[axis] = to.to_string();
        result.coords = self
            .coords
            .iter()
            .map(|(name, coord)| {
                let mut coord = coord.clone();
                if coord.dim == from {
                    coord.dim = to.to_string();
                }
                let name = if name == from { to } else { name };
                (name.to_string(), coord)
            })
            .collect();

        Ok(result)
    }

    /// Flattens `stacked` dimensions into a single `new_dim` placed last.
    ///
    /// Flattening is row-major: the first of `stacked` varies slowest.
    /// The new dimension gets a plain `0..n` index and every coordinate
    /// of the stacked dimensions is tiled onto it as an auxiliary
    /// coordinate, so each position still carries its source labels.
    pub fn stack_dims<S: AsRef<str>>(&self, stacked: &[S], new_dim: &str) -> Result<Self, ArrayError> {
        let stacked: Vec<String> = stacked.iter().map(|s| s.as_ref().to_string()).collect();
        check_unique(&stacked)?;

        let stacked_axes = stacked
            .iter()
            .map(|d| self.axis_of(d))
            .collect::<Result<Vec<usize>, ArrayError>>()?;

        if self.has_dim(new_dim) && !stacked.iter().any(|d| d == new_dim) {
            return Err(ArrayError::DimensionExists(new_dim.to_string()));
        }

        let kept_axes: Vec<usize> = (0..self.dims.len())
            .filter(|ax| !stacked_axes.contains(ax))
            .collect();

        let stacked_sizes: Vec<usize> = stacked_axes
            .iter()
            .map(|&ax| self.data.len_of(Axis(ax)))
            .collect();
        let stacked_len: usize = stacked_sizes.iter().product();

        let mut order = kept_axes.clone();
        order.extend_from_slice(&stacked_axes);

        let mut new_shape: Vec<usize> = kept_axes
            .iter()
            .map(|&ax| self.data.len_of(Axis(ax)))
            .collect();
        new_shape.push(stacked_len);

        let data = self
            .data
            .view()
            .permuted_axes(IxDyn(&order))
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(&new_shape))?;

        let mut dims: Vec<String> = kept_axes.iter().map(|&ax| self.dims[ax].clone()).collect();
        dims.push(new_dim.to_string());

        let mut coords = IndexMap::new();
        for (name, coord) in &self.coords {
            match stacked.iter().position(|d| *d == coord.dim) {
                None => {
                    coords.insert(name.clone(), coord.clone());
                }
                Some(pos) => {
                    let inner: usize = stacked_sizes[pos + 1..].iter().product();
                    let size = stacked_sizes[pos];
                    let indices: Vec<usize> =
                        (0..stacked_len).map(|k| (k / inner) % size).collect();

                    let mut tiled = coord.clone();
                    tiled.dim = new_dim.to_string();
                    tiled.values = coord.values.take(&indices);
                    coords.insert(name.clone(), tiled);
                }
            }
        }

        coords.insert(
            new_dim.to_string(),
            Coordinate::new(new_dim, CoordValues::range(stacked_len)),
        );

        Ok(LabeledArray {
            data,
            dims,
            coords,
            attrs: self.attrs.clone(),
        })
    }

    /// Splits the stacked dimension `dim` back into `into`.
    ///
    /// Uses the auxiliary coordinates that [`stack_dims`](Self::stack_dims)
    /// tiles along `dim`: their distinct labels, in order of first
    /// appearance, become the index coordinates of `into`. The labels
    /// must form a full row-major product.
    pub fn unstack_dim<S: AsRef<str>>(&self, dim: &str, into: &[S]) -> Result<Self, ArrayError> {
        let into: Vec<String> = into.iter().map(|s| s.as_ref().to_string()).collect();
        check_unique(&into)?;

        let len = self
            .dim_size(dim)
            .ok_or_else(|| ArrayError::MissingDimension(dim.to_string()))?;

        let kept: Vec<String> = self.dims.iter().filter(|d| *d != dim).cloned().collect();
        if let Some(existing) = into.iter().find(|d| kept.contains(d)) {
            return Err(ArrayError::DimensionExists(existing.clone()));
        }

        let not_a_product = || ArrayError::NotAProduct {
            dim: dim.to_string(),
            dims: into.clone(),
        };

        let mut index_coords = Vec::with_capacity(into.len());
        let mut positions = Vec::with_capacity(into.len());

        for target in &into {
            let coord = self
                .coords
                .get(target)
                .filter(|c| c.dim == dim)
                .ok_or_else(|| ArrayError::MissingCoordinate(target.clone()))?;

            let mut seen: FxHashMap<String, usize> = FxHashMap::default();
            let mut firsts = vec![];
            let mut position = Vec::with_capacity(len);

            for (k, label) in coord.values.labels().iter().enumerate() {
                let next = firsts.len();
                let p = *seen.entry(label.to_string()).or_insert(next);
                if p == next {
                    firsts.push(k);
                }
                position.push(p);
            }

            let mut index = Coordinate::new(target, coord.values.take(&firsts));
            index.attrs = coord.attrs.clone();
            index_coords.push(index);
            positions.push(position);
        }

        let sizes: Vec<usize> = index_coords.iter().map(Coordinate::len).collect();
        if sizes.iter().product::<usize>() != len {
            return Err(not_a_product());
        }

        for k in 0..len {
            let mut rest = k;
            for j in (0..into.len()).rev() {
                if positions[j][k] != rest % sizes[j] {
                    return Err(not_a_product());
                }
                rest /= sizes[j];
            }
        }

        let mut order = kept.clone();
        order.push(dim.to_string());

        let mut shape: Vec<usize> = kept.iter().filter_map(|d| self.dim_size(d)).collect();
        shape.extend_from_slice(&sizes);

        let data = self
            .transpose_to(&order)?
            .data
            .into_shape_with_order(IxDyn(&shape))?;

        let mut dims = kept;
        dims.extend(into.iter().cloned());

        let mut coords: IndexMap<String, Coordinate> = self
            .coords
            .iter()
            .filter(|(_, coord)| coord.dim != dim)
            .map(|(name, coord)| (name.clone(), coord.clone()))
            .collect();
        for (target, index) in into.iter().zip(index_coords) {
            coords.insert(target.clone(), index);
        }

        Ok(LabeledArray {
            data,
            dims,
            coords,
            attrs: self.attrs.clone(),
        })
    }

    /// Drops dimension `dim` of size one along with its coordinates.
    pub fn squeeze(&self, dim: &str) -> Result<Self, ArrayError> {
        let axis = self.axis_of(dim)?;
        let size = self.data.len_of(Axis(axis));
        if size != 1 {
            return Err(ArrayError::NotSingleton {
                dim: dim.to_string(),
                size,
            });
        }

        Ok(LabeledArray {
            data: self.data.index_axis(Axis(axis), 0).to_owned(),
            dims: self.dims.iter().filter(|d| *d != dim).cloned().collect(),
            coords: self
                .coords
                .iter()
                .filter(|(_, coord)| coord.dim != dim)
                .map(|(name, coord)| (name.clone(), coord.clone()))
                .collect(),
            attrs: self.attrs.clone(),
        })
    }

    /// Adds a leading dimension of size one labeled by `label`.
    pub fn expand_dims(&self, dim: &str, label: CoordValues) -> Result<Self, ArrayError> {
        if self.has_dim(dim) {
            return Err(ArrayError::DimensionExists(dim.to_string()));
        }

        let mut dims = vec![dim.to_string()];
        dims.extend(self.dims.iter().cloned());

        let mut result = LabeledArray {
            data: self.data.clone().insert_axis(Axis(0)),
            dims,
            coords: self.coords.clone(),
            attrs: self.attrs.clone(),
        };
        result.set_coord(dim, Coordinate::new(dim, label))?;

        Ok(result)
    }

    /// Joins arrays end to end along an existing dimension.
    ///
    /// All other dimensions must agree in order, size and coordinate
    /// labels. Coordinates along `dim` are concatenated and must be
    /// present on every array. Attributes of the first array are kept.
    pub fn concat(arrays: &[LabeledArray], dim: &str) -> Result<Self, ArrayError> {
        let first = arrays.first().ok_or(ArrayError::NothingToConcatenate)?;
        let axis = first.axis_of(dim)?;

        let mismatch = |reason: String| ArrayError::ConcatMismatch {
            dim: dim.to_string(),
            reason,
        };

        for other in &arrays[1..] {
            if other.dims != first.dims {
                return Err(mismatch(format!(
                    "dimensions {:?} differ from {:?}",
                    other.dims, first.dims
                )));
            }

            for (ax, d) in first.dims.iter().enumerate() {
                if ax != axis && other.shape()[ax] != first.shape()[ax] {
                    return Err(mismatch(format!(
                        "dimension `{}` has sizes {} and {}",
                        d,
                        first.shape()[ax],
                        other.shape()[ax]
                    )));
                }
            }

            let along_first: FxHashSet<&String> = first.coords_along(dim).collect();
            let along_other: FxHashSet<&String> = other.coords_along(dim).collect();
            if along_first != along_other {
                return Err(mismatch(format!(
                    "coordinates {:?} and {:?} along the joined dimension differ",
                    along_first, along_other
                )));
            }

            for (name, coord) in first.coords.iter().filter(|(_, c)| c.dim != dim) {
                match other.coords.get(name) {
                    Some(other_coord) if other_coord.values == coord.values => (),
                    Some(_) => {
                        return Err(mismatch(format!("labels of coordinate `{}` differ", name)))
                    }
                    None => {
                        return Err(mismatch(format!(
                            "coordinate `{}` is missing on some arrays",
                            name
                        )))
                    }
                }
            }
        }

        let views: Vec<_> = arrays.iter().map(|a| a.data.view()).collect();
        let data = concatenate(Axis(axis), &views)?;

        let mut coords = IndexMap::new();
        for (name, coord) in &first.coords {
            if coord.dim == dim {
                let parts: Vec<&CoordValues> = arrays
                    .iter()
                    .filter_map(|a| a.coords.get(name).map(|c| &c.values))
                    .collect();
                let mut joined = coord.clone();
                joined.values = CoordValues::concat(&parts)?;
                coords.insert(name.clone(), joined);
            } else {
                coords.insert(name.clone(), coord.clone());
            }
        }

        Ok(LabeledArray {
            data,
            dims: first.dims.clone(),
            coords,
            attrs: first.attrs.clone(),
        })
    }

    /// Same dimensions and labels around new values.
    pub fn with_data(&self, data: ArrayD<Float>) -> Result<Self, ArrayError> {
        if data.shape() != self.shape() {
            return Err(ArrayError::ShapeMismatch {
                expected: self.shape().to_vec(),
                found: data.shape().to_vec(),
            });
        }

        Ok(LabeledArray {
            data,
            dims: self.dims.clone(),
            coords: self.coords.clone(),
            attrs: self.attrs.clone(),
        })
    }

    /// Result of a reduction: `data` over the `kept` dimensions,
    /// with the coordinates of those dimensions only.
    pub fn reduced(&self, kept: &[String], data: ArrayD<Float>) -> Result<Self, ArrayError> {
        let mut reduced = LabeledArray::new(data, kept)?;
        for (name, coord) in &self.coords {
            if kept.contains(&coord.dim) {
                reduced.set_coord(name, coord.clone())?;
            }
        }

        Ok(reduced)
    }

    /// Selects positions along `dim`, in the given order.
    pub fn isel(&self, dim: &str, indices: &[usize]) -> Result<Self, ArrayError> {
        let axis = self.axis_of(dim)?;

        let data = self.data.select(Axis(axis), indices);
        let coords = self
            .coords
            .iter()
            .map(|(name, coord)| {
                let mut coord = coord.clone();
                if coord.dim == dim {
                    coord.values = coord.values.take(indices);
                }
                (name.clone(), coord)
            })
            .collect();

        Ok(LabeledArray {
            data,
            dims: self.dims.clone(),
            coords,
            attrs: self.attrs.clone(),
        })
    }

    /// Selects labels of the index coordinate of `dim`.
    pub fn sel_labels(&self, dim: &str, labels: &[Label]) -> Result<Self, ArrayError> {
        let index = self
            .coords
            .get(dim)
            .ok_or_else(|| ArrayError::MissingCoordinate(dim.to_string()))?;

        let indices = labels
            .iter()
            .map(|label| {
                index
                    .values
                    .position(label)
                    .ok_or_else(|| ArrayError::LabelNotFound {
                        label: label.to_string(),
                        dim: dim.to_string(),
                    })
            })
            .collect::<Result<Vec<usize>, ArrayError>>()?;

        self.isel(dim, &indices)
    }

    /// Reorders axes to follow `order`, which must name every dimension.
    pub fn transpose_to<S: AsRef<str>>(&self, order: &[S]) -> Result<Self, ArrayError> {
        if order.len() != self.dims.len() {
            return Err(ArrayError::NotBroadcastable {
                from: self.dims.clone(),
                to: order.iter().map(|d| d.as_ref().to_string()).collect(),
            });
        }

        let axes = order
            .iter()
            .map(|d| self.axis_of(d.as_ref()))
            .collect::<Result<Vec<usize>, ArrayError>>()?;

        Ok(LabeledArray {
            data: self
                .data
                .view()
                .permuted_axes(IxDyn(&axes))
                .as_standard_layout()
                .into_owned(),
            dims: order.iter().map(|d| d.as_ref().to_string()).collect(),
            coords: self.coords.clone(),
            attrs: self.attrs.clone(),
        })
    }

    /// Repeats the array over the target dimensions.
    ///
    /// Every own dimension must appear in `dims` with the same size;
    /// the result follows the order of `dims`.
    pub fn broadcast_to(&self, dims: &[String], shape: &[usize]) -> Result<Self, ArrayError> {
        let not_broadcastable = || ArrayError::NotBroadcastable {
            from: self.dims.clone(),
            to: dims.to_vec(),
        };

        for (ax, dim) in self.dims.iter().enumerate() {
            match dims.iter().position(|d| d == dim) {
                Some(pos) if shape[pos] == self.data.len_of(Axis(ax)) => (),
                _ => return Err(not_broadcastable()),
            }
        }

        let own_order: Vec<&String> = dims.iter().filter(|d| self.has_dim(d)).collect();
        let transposed = self.transpose_to(&own_order)?;

        let padded: Vec<usize> = dims
            .iter()
            .zip(shape)
            .map(|(d, &n)| if self.has_dim(d) { n } else { 1 })
            .collect();

        let data = transposed
            .data
            .into_shape_with_order(IxDyn(&padded))?
            .broadcast(IxDyn(shape))
            .ok_or_else(not_broadcastable)?
            .to_owned();

        Ok(LabeledArray {
            data,
            dims: dims.to_vec(),
            coords: self.coords.clone(),
            attrs: self.attrs.clone(),
        })
    }

    /// Applies `f` elementwise over arrays broadcast against each other.
    ///
    /// Output dimensions are the union of input dimensions in order of
    /// first appearance, coordinates are merged and must agree.
    pub fn broadcast_map<F>(inputs: &[&LabeledArray], f: F) -> Result<Self, ArrayError>
    where
        F: Fn(&[Float]) -> Float,
    {
        let mut dims: Vec<String> = vec![];
        let mut shape: Vec<usize> = vec![];
        let mut coords: IndexMap<String, Coordinate> = IndexMap::new();

        for input in inputs {
            for (dim, &size) in input.dims.iter().zip(input.shape()) {
                if !dims.contains(dim) {
                    dims.push(dim.clone());
                    shape.push(size);
                }
            }

            for (name, coord) in &input.coords {
                match coords.get(name) {
                    Some(existing) if existing.values != coord.values => {
                        return Err(ArrayError::ConcatMismatch {
                            dim: coord.dim.clone(),
                            reason: format!("labels of coordinate `{}` differ", name),
                        })
                    }
                    Some(_) => (),
                    None => {
                        coords.insert(name.clone(), coord.clone());
                    }
                }
            }
        }

        let flat = inputs
            .iter()
            .map(|input| {
                input
                    .broadcast_to(&dims, &shape)
                    .map(|b| b.data.iter().cloned().collect::<Vec<Float>>())
            })
            .collect::<Result<Vec<Vec<Float>>, ArrayError>>()?;

        let len: usize = shape.iter().product();
        let mut args = vec![0.0; inputs.len()];
        let values: Vec<Float> = (0..len)
            .map(|i| {
                for (arg, input) in args.iter_mut().zip(&flat) {
                    *arg = input[i];
                }
                f(&args)
            })
            .collect();

        Ok(LabeledArray {
            data: ArrayD::from_shape_vec(IxDyn(&shape), values)?,
            dims,
            coords,
            attrs: Attributes::new(),
        })
    }

    fn coords_along<'a>(&'a self, dim: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.coords
            .iter()
            .filter(move |(_, c)| c.dim == dim)
            .map(|(name, _)| name)
    }
}

fn check_unique(dims: &[String]) -> Result<(), ArrayError> {
    let mut seen = FxHashSet::default();
    for dim in dims {
        if !seen.insert(dim) {
            return Err(ArrayError::DuplicateDimension(dim.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::LabeledArray;
    use crate::errors::ArrayError;
    use crate::prep::dataset::labels::{CoordValues, Coordinate, Label};
    use ndarray::{ArrayD, IxDyn};

    fn grid() -> LabeledArray {
        let data = ArrayD::from_shape_vec(IxDyn(&[2, 3]), (0..6).map(|v| v as f64).collect())
            .unwrap();

        LabeledArray::new(data, &["x", "y"])
            .unwrap()
            .with_coord("x", Coordinate::new("x", CoordValues::Int(vec![10, 20])))
            .unwrap()
            .with_coord("y", Coordinate::new("y", CoordValues::Float(vec![0.5, 1.5, 2.5])))
            .unwrap()
    }

    #[test]
    fn duplicate_dims_are_rejected() {
        let data = ArrayD::zeros(IxDyn(&[2, 2]));
        assert_eq!(
            LabeledArray::new(data, &["x", "x"]).unwrap_err(),
            ArrayError::DuplicateDimension("x".to_string())
        );
    }

    #[test]
    fn coordinate_length_is_checked() {
        let result = grid().with_coord("x", Coordinate::new("x", CoordValues::range(3)));
        assert!(matches!(result, Err(ArrayError::CoordinateLength { .. })));
    }

    #[test]
    fn stack_dims_is_row_major() {
        let stacked = grid().stack_dims(&["x", "y"], "grid_index").unwrap();

        assert_eq!(stacked.dims(), ["grid_index"]);
        assert_eq!(stacked.shape(), [6]);
        assert_eq!(
            stacked.data().iter().cloned().collect::<Vec<f64>>(),
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]
        );
        assert_eq!(
            stacked.coord("x").unwrap().values,
            CoordValues::Int(vec![10, 10, 10, 20, 20, 20])
        );
        assert_eq!(
            stacked.coord("y").unwrap().values,
            CoordValues::Float(vec![0.5, 1.5, 2.5, 0.5, 1.5, 2.5])
        );
        assert_eq!(stacked.coord("grid_index").unwrap().values, CoordValues::range(6));
    }

    #[test]
    fn unstack_dim_restores_stacked_dims() {
        let data = ArrayD::from_shape_vec(IxDyn(&[2, 2, 3]), (0..12).map(|v| v as f64).collect())
            .unwrap();
        let array = LabeledArray::new(data, &["x", "time", "y"])
            .unwrap()
            .with_coord("x", Coordinate::new("x", CoordValues::Int(vec![10, 20])))
            .unwrap()
            .with_coord("y", Coordinate::new("y", CoordValues::Float(vec![0.5, 1.5, 2.5])))
            .unwrap()
            .with_attr("units", "K");

        let stacked = array.stack_dims(&["x", "y"], "grid_index").unwrap();
        let unstacked = stacked.unstack_dim("grid_index", &["x", "y"]).unwrap();

        assert_eq!(unstacked.dims(), ["time", "x", "y"]);
        assert_eq!(unstacked, array.transpose_to(&["time", "x", "y"]).unwrap());
        assert!(unstacked.coord("grid_index").is_none());

        let shuffled = stacked.isel("grid_index", &[0, 2, 1, 3, 4, 5]).unwrap();
        assert!(matches!(
            shuffled.unstack_dim("grid_index", &["x", "y"]),
            Err(ArrayError::NotAProduct { .. })
        ));

        let partial = stacked.isel("grid_index", &[0, 1, 2, 3]).unwrap();
        assert!(matches!(
            partial.unstack_dim("grid_index", &["x", "y"]),
            Err(ArrayError::NotAProduct { .. })
        ));
    }

    #[test]
    fn squeeze_drops_singleton_dim() {
        let row = grid().isel("x", &[1]).unwrap();
        let squeezed = row.squeeze("x").unwrap();

        assert_eq!(squeezed.dims(), ["y"]);
        assert_eq!(
            squeezed.data().iter().cloned().collect::<Vec<f64>>(),
            vec![3.0, 4.0, 5.0]
        );
        assert!(squeezed.coord("x").is_none());

        assert_eq!(
            grid().squeeze("y").unwrap_err(),
            ArrayError::NotSingleton {
                dim: "y".to_string(),
                size: 3
            }
        );
    }

    #[test]
    fn stack_dims_keeps_other_dims_first() {
        let data = ArrayD::from_shape_vec(IxDyn(&[2, 2, 2]), (0..8).map(|v| v as f64).collect())
            .unwrap();
        let array = LabeledArray::new(data, &["x", "time", "y"]).unwrap();

        let stacked = array.stack_dims(&["x", "y"], "grid_index").unwrap();

        assert_eq!(stacked.dims(), ["time", "grid_index"]);
        // time = 1 row: (x0,t1,y0)=2 (x0,t1,y1)=3 (x1,t1,y0)=6 (x1,t1,y1)=7
        assert_eq!(
            stacked
                .data()
                .index_axis(ndarray::Axis(0), 1)
                .iter()
                .cloned()
                .collect::<Vec<f64>>(),
            vec![2.0, 3.0, 6.0, 7.0]
        );
    }

    #[test]
    fn rename_moves_index_coordinate() {
        let renamed = grid().rename_dim("x", "lon").unwrap();

        assert_eq!(renamed.dims(), ["lon", "y"]);
        assert!(renamed.coord("x").is_none());
        assert_eq!(renamed.coord("lon").unwrap().dim, "lon");
        assert_eq!(
            grid().rename_dim("z", "lon").unwrap_err(),
            ArrayError::MissingDimension("z".to_string())
        );
    }

    #[test]
    fn concat_requires_matching_coordinates() {
        let a = grid();
        let b = grid()
            .with_coord("y", Coordinate::new("y", CoordValues::Float(vec![0.0, 1.0, 2.0])))
            .unwrap();

        assert!(LabeledArray::concat(&[a.clone(), a.clone()], "x").is_ok());
        assert!(matches!(
            LabeledArray::concat(&[a, b], "x"),
            Err(ArrayError::ConcatMismatch { .. })
        ));
    }

    #[test]
    fn sel_labels_and_broadcast() {
        let picked = grid().sel_labels("x", &[Label::Int(20)]).unwrap();
        assert_eq!(picked.data().iter().cloned().collect::<Vec<f64>>(), vec![3.0, 4.0, 5.0]);

        let row = LabeledArray::new(ArrayD::from_elem(IxDyn(&[3]), 1.0), &["y"]).unwrap();
        let summed = LabeledArray::broadcast_map(&[&grid(), &row], |v| v[0] + v[1]).unwrap();
        assert_eq!(summed.dims(), ["x", "y"]);
        assert_eq!(summed.data()[[1, 2]], 6.0);
    }
}
