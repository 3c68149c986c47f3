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

//! Selection of coordinate values by list or inclusive range.
//!
//! Range bounds must be present in the data, and an optional
//! step is checked against the (constant) spacing of the
//! selected labels instead of being used for subsampling.

use super::configuration::{Bound, Range, Selection};
use super::dataset::{Coordinate, Label, LabeledArray, LabeledDataset};
use crate::errors::SelectionError;
use crate::Float;
use float_cmp::approx_eq;
use indexmap::IndexMap;
use std::cmp::Ordering;

/// Applies every selection to all variables spanning the selected coordinate.
pub fn select_by_kwargs(
    dataset: &LabeledDataset,
    selections: &IndexMap<String, Selection>,
) -> Result<LabeledDataset, SelectionError> {
    let mut selected = dataset.clone();

    for (coord_name, selection) in selections {
        let coord = selected
            .coord(coord_name)
            .cloned()
            .ok_or_else(|| SelectionError::MissingCoordinate(coord_name.clone()))?;

        let indices = select_indices(coord_name, &coord, selection)?;

        selected = selected.try_map(|_, array| {
            if array.has_dim(&coord.dim) {
                array.isel(&coord.dim, &indices)
            } else {
                Ok(array.clone())
            }
        })?;
    }

    Ok(selected)
}

/// Applies ranges to a single array, e.g. to restrict output coordinates.
pub fn select_array_ranges(
    array: &LabeledArray,
    ranges: &IndexMap<String, Range>,
) -> Result<LabeledArray, SelectionError> {
    let mut selected = array.clone();

    for (coord_name, range) in ranges {
        let coord = selected
            .coord(coord_name)
            .cloned()
            .ok_or_else(|| SelectionError::MissingCoordinate(coord_name.clone()))?;

        let indices = range_indices(coord_name, &coord, range)?;
        selected = selected.isel(&coord.dim, &indices)?;
    }

    Ok(selected)
}

/// Positions along the coordinate dimension picked by `selection`.
pub fn select_indices(
    coord_name: &str,
    coord: &Coordinate,
    selection: &Selection,
) -> Result<Vec<usize>, SelectionError> {
    match selection {
        Selection::List(bounds) => bounds
            .iter()
            .map(|bound| {
                coord
                    .values
                    .position(&bound.to_label())
                    .ok_or_else(|| SelectionError::BoundNotFound {
                        coord: coord_name.to_string(),
                        bound: bound.to_string(),
                    })
            })
            .collect(),
        Selection::Range(range) => range_indices(coord_name, coord, range),
    }
}

fn range_indices(
    coord_name: &str,
    coord: &Coordinate,
    range: &Range,
) -> Result<Vec<usize>, SelectionError> {
    let start = range.start.as_ref().map(Bound::to_label);
    let end = range.end.as_ref().map(Bound::to_label);

    if start.is_none() && end.is_none() {
        return Err(SelectionError::NoBounds(coord_name.to_string()));
    }

    if let (Some(s), Some(e)) = (&start, &end) {
        if s.matches(e) {
            return Err(SelectionError::EqualBounds(coord_name.to_string()));
        }
    }

    let labels = coord.values.labels();
    check_increasing(coord_name, &labels)?;

    for (bound, raw) in [(&start, &range.start), (&end, &range.end)] {
        if let (Some(label), Some(raw)) = (bound, raw) {
            if !labels.iter().any(|l| l.matches(label)) {
                return Err(SelectionError::BoundNotFound {
                    coord: coord_name.to_string(),
                    bound: raw.to_string(),
                });
            }
        }
    }

    let mut indices = vec![];
    for (i, label) in labels.iter().enumerate() {
        let after_start = match &start {
            Some(s) => compare(coord_name, label, s)? != Ordering::Less,
            None => true,
        };
        let before_end = match &end {
            Some(e) => compare(coord_name, label, e)? != Ordering::Greater,
            None => true,
        };

        if after_start && before_end {
            indices.push(i);
        }
    }

    if indices.is_empty() {
        return Err(SelectionError::EmptySelection(coord_name.to_string()));
    }

    if let Some(step) = &range.step {
        let picked: Vec<&Label> = indices.iter().map(|&i| &labels[i]).collect();
        check_step(coord_name, &picked, step)?;
    }

    Ok(indices)
}

fn compare(coord_name: &str, label: &Label, bound: &Label) -> Result<Ordering, SelectionError> {
    label
        .compare(bound)
        .ok_or_else(|| SelectionError::IncompatibleBound {
            coord: coord_name.to_string(),
            bound: bound.to_string(),
        })
}

fn check_increasing(coord_name: &str, labels: &[Label]) -> Result<(), SelectionError> {
    for pair in labels.windows(2) {
        if pair[0].compare(&pair[1]) != Some(Ordering::Less) {
            return Err(SelectionError::NotMonotonic(coord_name.to_string()));
        }
    }
    Ok(())
}

/// Numeric position of a label on its axis, datetimes in seconds.
fn label_value(label: &Label) -> Option<Float> {
    match label {
        Label::Int(v) => Some(*v as Float),
        Label::Float(v) => Some(*v),
        Label::DateTime(v) => Some(v.and_utc().timestamp() as Float),
        Label::Str(_) => None,
    }
}

fn check_step(coord_name: &str, labels: &[&Label], step: &Bound) -> Result<(), SelectionError> {
    let expected = match step {
        Bound::Int(v) => *v as Float,
        Bound::Float(v) => *v,
        Bound::Text(text) => {
            parse_iso_duration(text).ok_or_else(|| SelectionError::InvalidStep(text.clone()))?
        }
    };

    let values = labels
        .iter()
        .map(|l| label_value(l))
        .collect::<Option<Vec<Float>>>()
        .ok_or_else(|| SelectionError::NonConstantStep(coord_name.to_string()))?;

    let steps: Vec<Float> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let first = match steps.first() {
        Some(first) => *first,
        None => return Ok(()),
    };

    if !steps.iter().all(|s| approx_eq!(Float, *s, first, ulps = 4)) {
        return Err(SelectionError::NonConstantStep(coord_name.to_string()));
    }

    if !approx_eq!(Float, first, expected, ulps = 4) {
        return Err(SelectionError::StepMismatch {
            coord: coord_name.to_string(),
            expected: step.to_string(),
            found: first.to_string(),
        });
    }

    Ok(())
}

/// Parses an ISO 8601 duration (e.g. `PT3H`, `P1DT12H`) into seconds.
///
/// Years and months have no fixed length and are not accepted.
pub fn parse_iso_duration(text: &str) -> Option<Float> {
    let rest = text.strip_prefix('P')?;

    let (date, time) = match rest.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    if date.is_empty() && time.map_or(true, str::is_empty) {
        return None;
    }

    let mut seconds = parse_components(date, &[('W', 604_800.0), ('D', 86_400.0)])?;

    if let Some(time) = time {
        if time.is_empty() {
            return None;
        }
        seconds += parse_components(time, &[('H', 3600.0), ('M', 60.0), ('S', 1.0)])?;
    }

    Some(seconds)
}

fn parse_components(text: &str, units: &[(char, Float)]) -> Option<Float> {
    let mut total = 0.0;
    let mut number = String::new();
    let mut next_unit = 0;

    for c in text.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }

        let pos = next_unit + units[next_unit..].iter().position(|(u, _)| *u == c)?;
        let value: Float = number.parse().ok()?;

        total += value * units[pos].1;
        number.clear();
        next_unit = pos + 1;
    }

    if !number.is_empty() {
        return None;
    }

    Some(total)
}
