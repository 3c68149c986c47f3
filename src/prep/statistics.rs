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

//! Summary statistics of the assembled dataset.
//!
//! Reductions skip NaN values, standard deviation is the population
//! one. Operations prefixed with `diff_` are applied to the first
//! difference along the splitting dimension, and only to variables
//! spanning that dimension.

use super::configuration::Statistics;
use super::dataset::{LabeledArray, LabeledDataset};
use crate::errors::{ArrayError, StatsError};
use crate::Float;
use indexmap::IndexMap;
use log::debug;
use ndarray::{ArrayD, IxDyn};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::{fmt, str::FromStr};

const DIFF_PREFIX: &str = "diff_";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reduction {
    Mean,
    Std,
    Min,
    Max,
}

impl Reduction {
    fn apply(self, values: &[Float]) -> Float {
        let valid = values.iter().copied().filter(|v| !v.is_nan());

        match self {
            Reduction::Mean => nan_mean(values),
            Reduction::Std => {
                let mean = nan_mean(values);
                let (sum, count) = valid.fold((0.0, 0_usize), |(sum, count), v| {
                    (sum + (v - mean).powi(2), count + 1)
                });
                if count == 0 {
                    Float::NAN
                } else {
                    (sum / count as Float).sqrt()
                }
            }
            Reduction::Min => valid.reduce(Float::min).unwrap_or(Float::NAN),
            Reduction::Max => valid.reduce(Float::max).unwrap_or(Float::NAN),
        }
    }
}

fn nan_mean(values: &[Float]) -> Float {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 {
        Float::NAN
    } else {
        sum / count as Float
    }
}

/// Single statistics operation, like `mean` or `diff_std`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Operation {
    pub diff: bool,
    pub reduction: Reduction,
}

impl FromStr for Operation {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (diff, name) = match s.strip_prefix(DIFF_PREFIX) {
            Some(name) => (true, name),
            None => (false, s),
        };

        let reduction = match name {
            "mean" => Reduction::Mean,
            "std" => Reduction::Std,
            "min" => Reduction::Min,
            "max" => Reduction::Max,
            _ => return Err(StatsError::UnknownOperation(s.to_string())),
        };

        Ok(Operation { diff, reduction })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.reduction {
            Reduction::Mean => "mean",
            Reduction::Std => "std",
            Reduction::Min => "min",
            Reduction::Max => "max",
        };

        if self.diff {
            write!(f, "{}{}", DIFF_PREFIX, name)
        } else {
            write!(f, "{}", name)
        }
    }
}

/// Computes every configured operation over `dataset`,
/// returning one dataset of reduced variables per operation.
pub fn calc_stats(
    dataset: &LabeledDataset,
    statistics: &Statistics,
    splitting_dim: &str,
    pool: &ThreadPool,
) -> Result<IndexMap<String, LabeledDataset>, StatsError> {
    let dataset_dims = dataset.dims();
    for dim in &statistics.dims {
        if !dataset_dims.contains_key(dim) {
            return Err(StatsError::MissingDimension(dim.clone()));
        }
    }

    let mut stats = IndexMap::new();

    for op_name in &statistics.ops {
        let op: Operation = op_name.parse()?;
        debug!("Computing {} over {:?}", op, statistics.dims);

        let mut reduced = LabeledDataset::new();
        for (name, array) in dataset.variables() {
            let input = if op.diff {
                if !array.has_dim(splitting_dim) {
                    continue;
                }
                first_difference(array, splitting_dim)?
            } else {
                array.clone()
            };

            let result = pool.install(|| reduce(&input, &statistics.dims, op.reduction))?;
            reduced.insert(name, result)?;
        }

        stats.insert(op_name.clone(), reduced);
    }

    Ok(stats)
}

/// Difference of consecutive elements along `dim`,
/// labeled with the upper element of each pair.
fn first_difference(array: &LabeledArray, dim: &str) -> Result<LabeledArray, StatsError> {
    let n = array.dim_size(dim).unwrap_or(0);
    let upper_idx: Vec<usize> = (1..n).collect();
    let lower_idx: Vec<usize> = (0..n.saturating_sub(1)).collect();

    let upper = array.isel(dim, &upper_idx)?;
    let lower = array.isel(dim, &lower_idx)?;

    let diff = upper.data() - lower.data();
    Ok(upper.with_data(diff)?)
}

/// Reduces `array` over those of `dims` it spans.
fn reduce(
    array: &LabeledArray,
    dims: &[String],
    reduction: Reduction,
) -> Result<LabeledArray, StatsError> {
    let (reduced_dims, kept_dims): (Vec<String>, Vec<String>) =
        array.dims().iter().cloned().partition(|d| dims.contains(d));

    let order: Vec<&String> = kept_dims.iter().chain(&reduced_dims).collect();
    let transposed = array.transpose_to(&order)?;

    let kept_shape: Vec<usize> = kept_dims
        .iter()
        .map(|d| array.dim_size(d).unwrap_or(0))
        .collect();
    let rows: usize = kept_shape.iter().product();

    let flat: Vec<Float> = transposed.data().iter().copied().collect();
    let values: Vec<Float> = if rows == 0 || flat.is_empty() {
        vec![Float::NAN; rows]
    } else {
        flat.par_chunks(flat.len() / rows)
            .map(|row| reduction.apply(row))
            .collect()
    };

    let data = ArrayD::from_shape_vec(IxDyn(&kept_shape), values).map_err(ArrayError::from)?;
    Ok(array.reduced(&kept_dims, data)?)
}
