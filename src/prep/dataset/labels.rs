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

//! Coordinate labels, coordinates and free-form attributes
//! attached to labeled arrays.

use crate::{errors::ArrayError, Float};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Deserialize;
use std::{cmp::Ordering, fmt};

/// Free-form metadata attached to arrays and datasets.
pub type Attributes = IndexMap<String, AttrValue>;

/// Single attribute value.
///
/// Deserializes from any YAML scalar so that expected dataset
/// attributes can be written directly in the configuration file.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(Float),
    Str(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Float> {
        match self {
            AttrValue::Int(v) => Some(*v as Float),
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(v) => write!(f, "{}", v),
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<Float> for AttrValue {
    fn from(value: Float) -> Self {
        AttrValue::Float(value)
    }
}

/// A single coordinate value.
#[derive(Clone, PartialEq, Debug)]
pub enum Label {
    Int(i64),
    Float(Float),
    Str(String),
    DateTime(NaiveDateTime),
}

impl Label {
    /// Compares two labels by value.
    ///
    /// Integers and floats are compared numerically, so that a
    /// level written as `1000` in the configuration matches a
    /// coordinate stored as `1000.0`. Labels of unrelated kinds
    /// are not comparable.
    pub fn compare(&self, other: &Label) -> Option<Ordering> {
        match (self, other) {
            (Label::Int(a), Label::Int(b)) => Some(a.cmp(b)),
            (Label::Float(a), Label::Float(b)) => a.partial_cmp(b),
            (Label::Int(a), Label::Float(b)) => (*a as Float).partial_cmp(b),
            (Label::Float(a), Label::Int(b)) => a.partial_cmp(&(*b as Float)),
            (Label::Str(a), Label::Str(b)) => Some(a.cmp(b)),
            (Label::DateTime(a), Label::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn matches(&self, other: &Label) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Int(v) => write!(f, "{}", v),
            Label::Float(v) => write!(f, "{}", float_text(*v)),
            Label::Str(v) => write!(f, "{}", v),
            Label::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

/// Shortest round-trip text of a float keeping a decimal point
/// (`100.0`), in exponent form (`1e-05`) below `1e-4` and from `1e16`.
/// Matches the feature names produced by Python tooling.
fn float_text(v: Float) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let scientific = format!("{:e}", v);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some(parts) => parts,
        None => return scientific,
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if (-4..16).contains(&exponent) {
        let plain = v.to_string();
        if plain.contains('.') {
            plain
        } else {
            format!("{}.0", plain)
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

/// Typed vector of coordinate labels.
#[derive(Clone, PartialEq, Debug)]
pub enum CoordValues {
    Int(Vec<i64>),
    Float(Vec<Float>),
    Str(Vec<String>),
    DateTime(Vec<NaiveDateTime>),
}

impl CoordValues {
    /// Plain positional index `0..len`.
    pub fn range(len: usize) -> Self {
        CoordValues::Int((0..len as i64).collect())
    }

    /// The same string label repeated `count` times.
    pub fn repeat_str(label: &str, count: usize) -> Self {
        CoordValues::Str(vec![label.to_string(); count])
    }

    pub fn len(&self) -> usize {
        match self {
            CoordValues::Int(v) => v.len(),
            CoordValues::Float(v) => v.len(),
            CoordValues::Str(v) => v.len(),
            CoordValues::DateTime(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CoordValues::Int(_) => "integer",
            CoordValues::Float(_) => "float",
            CoordValues::Str(_) => "string",
            CoordValues::DateTime(_) => "datetime",
        }
    }

    pub fn get(&self, index: usize) -> Option<Label> {
        match self {
            CoordValues::Int(v) => v.get(index).map(|l| Label::Int(*l)),
            CoordValues::Float(v) => v.get(index).map(|l| Label::Float(*l)),
            CoordValues::Str(v) => v.get(index).map(|l| Label::Str(l.clone())),
            CoordValues::DateTime(v) => v.get(index).map(|l| Label::DateTime(*l)),
        }
    }

    pub fn labels(&self) -> Vec<Label> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    /// Index of the first label equal (by value) to `label`.
    pub fn position(&self, label: &Label) -> Option<usize> {
        (0..self.len()).find(|&i| self.get(i).map_or(false, |l| l.matches(label)))
    }

    /// Gathers the labels at given positions, in the given order.
    pub fn take(&self, indices: &[usize]) -> Self {
        match self {
            CoordValues::Int(v) => CoordValues::Int(indices.iter().map(|&i| v[i]).collect()),
            CoordValues::Float(v) => CoordValues::Float(indices.iter().map(|&i| v[i]).collect()),
            CoordValues::Str(v) => {
                CoordValues::Str(indices.iter().map(|&i| v[i].clone()).collect())
            }
            CoordValues::DateTime(v) => {
                CoordValues::DateTime(indices.iter().map(|&i| v[i]).collect())
            }
        }
    }

    /// Joins label vectors of the same kind end to end.
    pub fn concat(parts: &[&CoordValues]) -> Result<Self, ArrayError> {
        let first = match parts.first() {
            Some(first) => *first,
            None => return Err(ArrayError::NothingToConcatenate),
        };

        let mut result = first.clone();

        for part in &parts[1..] {
            match (&mut result, part) {
                (CoordValues::Int(acc), CoordValues::Int(v)) => acc.extend_from_slice(v),
                (CoordValues::Float(acc), CoordValues::Float(v)) => acc.extend_from_slice(v),
                (CoordValues::Str(acc), CoordValues::Str(v)) => acc.extend_from_slice(v),
                (CoordValues::DateTime(acc), CoordValues::DateTime(v)) => {
                    acc.extend_from_slice(v)
                }
                (acc, other) => {
                    return Err(ArrayError::IncompatibleLabels(
                        acc.kind(),
                        other.kind(),
                    ))
                }
            }
        }

        Ok(result)
    }
}

/// One-dimensional coordinate associated with a single dimension.
///
/// A coordinate with the same name as its dimension is the index
/// coordinate of that dimension; any other name makes it auxiliary.
#[derive(Clone, PartialEq, Debug)]
pub struct Coordinate {
    pub dim: String,
    pub values: CoordValues,
    pub attrs: Attributes,
}

impl Coordinate {
    pub fn new(dim: &str, values: CoordValues) -> Self {
        Coordinate {
            dim: dim.to_string(),
            values,
            attrs: Attributes::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
