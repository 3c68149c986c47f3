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

//! Recovery of the input variables from a prepared dataset.
//!
//! Every step that shapes an input into its target variable is
//! undone in reverse: features are split back into variables using
//! the `name_format` that labeled them, renamed dimensions get their
//! source names and stacked dimensions are unstacked. Variables that
//! were derived rather than read from the input are dropped.

use super::configuration::{Config, DimMapping, InputDataset};
use super::dataset::{CoordValues, Label, LabeledArray, LabeledDataset};
use super::loading::DatasetSource;
use crate::constants::{PER_FEATURE_ATTRS, SOURCE_DATASET_ATTR};
use crate::errors::{PrepError, RecreateError};
use crate::Float;
use indexmap::IndexMap;
use log::debug;

const VAR_NAME_FIELD: &str = "var_name";

#[derive(Clone, PartialEq, Debug)]
enum Segment {
    Literal(String),
    Field(String),
}

/// Recreates every configured input from the target
/// variables of a prepared dataset.
pub fn recreate_inputs(
    prepared: &dyn DatasetSource,
    config: &Config,
) -> Result<IndexMap<String, LabeledDataset>, PrepError> {
    let mut inputs = IndexMap::new();

    for (name, input) in &config.inputs {
        debug!("Recreating input dataset `{}`", name);

        let dataset = recreate_input(prepared, name, input).map_err(|source| {
            PrepError::Recreate {
                dataset: name.clone(),
                source,
            }
        })?;
        inputs.insert(name.clone(), dataset);
    }

    Ok(inputs)
}

fn recreate_input(
    prepared: &dyn DatasetSource,
    name: &str,
    input: &InputDataset,
) -> Result<LabeledDataset, RecreateError> {
    let (feature_dim, name_format) = input
        .dim_mapping
        .iter()
        .find_map(|(output_dim, mapping)| match mapping {
            DimMapping::StackVariablesByVarName { name_format, .. } => {
                Some((output_dim, name_format))
            }
            _ => None,
        })
        .ok_or(RecreateError::MissingFeatureMapping)?;

    let target = prepared.variable(&input.target_output_variable)?;
    let features = features_of_input(&target, feature_dim, name)?;
    let mut dataset = split_features(&features, feature_dim, name_format)?;

    for (output_dim, mapping) in &input.dim_mapping {
        dataset = match mapping {
            DimMapping::Rename { dim } => {
                dataset.try_map(|_, array| array.rename_dim(output_dim, dim))?
            }
            DimMapping::Stack { dims } => {
                let dims = dims.resolve()?;
                dataset.try_map(|_, array| array.unstack_dim(output_dim, &dims))?
            }
            DimMapping::StackVariablesByVarName { .. } => dataset,
        };
    }

    let read: Vec<(String, LabeledArray)> = dataset
        .variables()
        .filter(|(var_name, _)| !input.derived_variables.contains_key(*var_name))
        .map(|(var_name, array)| -> Result<(String, LabeledArray), RecreateError> {
            let order: Vec<&String> = input.dims.iter().filter(|d| array.has_dim(d)).collect();
            let array = if order.len() == array.dims().len() {
                array.transpose_to(&order)?
            } else {
                array.clone()
            };
            Ok((var_name.clone(), array))
        })
        .collect::<Result<_, _>>()?;

    Ok(LabeledDataset::from_arrays(read)?)
}

/// Features along `feature_dim` that come from input `name`.
///
/// A target fed by a single input may not record the source
/// of its features, in which case all of them are taken.
fn features_of_input(
    target: &LabeledArray,
    feature_dim: &str,
    name: &str,
) -> Result<LabeledArray, RecreateError> {
    let provenance = format!("{}_{}", feature_dim, SOURCE_DATASET_ATTR);

    let sources = match target.coord(&provenance).map(|c| &c.values) {
        Some(CoordValues::Str(sources)) => sources,
        _ => return Ok(target.clone()),
    };

    let indices: Vec<usize> = sources
        .iter()
        .enumerate()
        .filter(|(_, source)| *source == name)
        .map(|(i, _)| i)
        .collect();

    if indices.is_empty() {
        return Err(RecreateError::NoFeatures {
            input: name.to_string(),
            dim: feature_dim.to_string(),
        });
    }

    Ok(target.isel(feature_dim, &indices)?)
}

/// Splits the features of `array` back into the variables they were
/// stacked from.
///
/// Each feature label is matched against `name_format`. The
/// `{var_name}` field names the variable, a coordinate field (e.g.
/// `{altitude}`) gives the label of that coordinate, so features of
/// one variable at several levels are joined along it again. Units
/// and long names kept along the feature dimension become the only
/// attributes of the variables.
pub fn split_features(
    array: &LabeledArray,
    feature_dim: &str,
    name_format: &str,
) -> Result<LabeledDataset, RecreateError> {
    let segments = format_segments(name_format);

    let fields: Vec<&String> = segments
        .iter()
        .filter_map(|segment| match segment {
            Segment::Field(field) => Some(field),
            Segment::Literal(_) => None,
        })
        .collect();

    if !fields.iter().any(|f| *f == VAR_NAME_FIELD) {
        return Err(RecreateError::MissingVarNamePlaceholder(name_format.to_string()));
    }

    let coord_fields: Vec<String> = fields
        .iter()
        .filter(|f| **f != VAR_NAME_FIELD)
        .map(|f| f.to_string())
        .collect();
    if coord_fields.len() > 1 {
        return Err(RecreateError::NotImplemented(coord_fields));
    }
    let coord_field = coord_fields.first();

    let labels = match array.coord(feature_dim).map(|c| &c.values) {
        Some(CoordValues::Str(labels)) => labels,
        _ => return Err(RecreateError::NotStringLabels(feature_dim.to_string())),
    };

    let mut pieces: IndexMap<String, Vec<LabeledArray>> = IndexMap::new();

    for (i, label) in labels.iter().enumerate() {
        let mut matched = vec![];
        if !match_segments(&segments, label, &mut matched) {
            return Err(RecreateError::UnmatchedLabel {
                label: label.clone(),
                name_format: name_format.to_string(),
            });
        }

        let mut var_name = String::new();
        let mut piece = array.isel(feature_dim, &[i])?.squeeze(feature_dim)?;
        piece.attrs.clear();

        for attr in PER_FEATURE_ATTRS {
            if let Some(CoordValues::Str(values)) =
                array.coord(&format!("{}_{}", feature_dim, attr)).map(|c| &c.values)
            {
                if !values[i].is_empty() {
                    piece = piece.with_attr(attr, values[i].as_str());
                }
            }
        }

        for (field, text) in matched {
            if field == VAR_NAME_FIELD {
                var_name = text;
            } else {
                piece = piece.expand_dims(&field, coord_label(&text))?;
            }
        }

        pieces.entry(var_name).or_default().push(piece);
    }

    let mut dataset = LabeledDataset::new();

    for (var_name, mut pieces) in pieces {
        let variable = match coord_field {
            _ if pieces.len() == 1 => pieces.remove(0),
            Some(field) => LabeledArray::concat(&pieces, field)?,
            None => return Err(RecreateError::DuplicateVariable(var_name)),
        };

        dataset.insert(&var_name, variable)?;
    }

    Ok(dataset)
}

/// Coordinate label read back from a feature name.
fn coord_label(text: &str) -> CoordValues {
    let label = text
        .parse::<i64>()
        .map(Label::Int)
        .or_else(|_| text.parse::<Float>().map(Label::Float))
        .unwrap_or_else(|_| Label::Str(text.to_string()));

    match label {
        Label::Int(v) => CoordValues::Int(vec![v]),
        Label::Float(v) => CoordValues::Float(vec![v]),
        _ => CoordValues::Str(vec![text.to_string()]),
    }
}

fn format_segments(name_format: &str) -> Vec<Segment> {
    let mut segments = vec![];
    let mut rest = name_format;

    while let Some(open) = rest.find('{') {
        let close = match rest[open..].find('}') {
            Some(close) => open + close,
            None => break,
        };

        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }
        segments.push(Segment::Field(rest[open + 1..close].to_string()));
        rest = &rest[close + 1..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }

    segments
}

/// Matches `text` against `segments`, giving each field the
/// shortest non-empty text that lets the rest match.
fn match_segments(segments: &[Segment], text: &str, matched: &mut Vec<(String, String)>) -> bool {
    match segments.split_first() {
        None => text.is_empty(),
        Some((Segment::Literal(literal), rest)) => text
            .strip_prefix(literal.as_str())
            .map_or(false, |text| match_segments(rest, text, matched)),
        Some((Segment::Field(field), rest)) => {
            for (start, c) in text.char_indices() {
                let end = start + c.len_utf8();
                matched.push((field.clone(), text[..end].to_string()));
                if match_segments(rest, &text[end..], matched) {
                    return true;
                }
                matched.pop();
            }
            false
        }
    }
}
