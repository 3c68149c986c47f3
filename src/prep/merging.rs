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

//! Joining of per-input arrays into the output dataset.
//!
//! Arrays of one target are concatenated along their feature
//! dimension, then all targets are merged with exact alignment:
//! any disagreement in shared dimensions is an error, never padding.

use super::dataset::{AttrValue, CoordValues, Coordinate, LabeledArray, LabeledDataset};
use crate::constants::{SOURCE_DATASET_ATTR, VARIABLES_MAPPING_DIM_ATTR};
use crate::errors::MergeError;
use indexmap::IndexMap;
use log::info;

pub fn merge_by_target(
    arrays_by_target: IndexMap<String, Vec<LabeledArray>>,
) -> Result<LabeledDataset, MergeError> {
    let mut merged = LabeledDataset::new();

    for (target, arrays) in arrays_by_target {
        info!("Merging {} array(s) for target variable {}", arrays.len(), target);

        let feature_dim = feature_dim_of(&target, &arrays)?;

        let with_provenance = arrays
            .into_iter()
            .map(|array| provenance_to_coord(&target, &feature_dim, array))
            .collect::<Result<Vec<LabeledArray>, MergeError>>()?;

        let joined = LabeledArray::concat(&with_provenance, &feature_dim).map_err(|source| {
            MergeError::Concat {
                target: target.clone(),
                source,
            }
        })?;

        merged
            .insert(&target, joined)
            .map_err(|source| MergeError::Alignment {
                target: target.clone(),
                source,
            })?;
    }

    Ok(merged)
}

/// Feature dimension shared by all arrays of `target`.
fn feature_dim_of(target: &str, arrays: &[LabeledArray]) -> Result<String, MergeError> {
    let dims = arrays
        .iter()
        .map(|array| {
            array
                .attrs
                .get(VARIABLES_MAPPING_DIM_ATTR)
                .and_then(AttrValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| MergeError::MissingFeatureDim(target.to_string()))
        })
        .collect::<Result<Vec<String>, MergeError>>()?;

    match dims.first() {
        None => Err(MergeError::MissingFeatureDim(target.to_string())),
        Some(first) if dims.iter().all(|d| d == first) => Ok(first.clone()),
        Some(_) => Err(MergeError::FeatureDimMismatch {
            target: target.to_string(),
            dims,
        }),
    }
}

/// Moves the `source_dataset` attribute into a
/// `{feature_dim}_source_dataset` coordinate.
fn provenance_to_coord(
    target: &str,
    feature_dim: &str,
    mut array: LabeledArray,
) -> Result<LabeledArray, MergeError> {
    let source = array
        .attrs
        .shift_remove(SOURCE_DATASET_ATTR)
        .ok_or_else(|| MergeError::MissingSourceDataset(target.to_string()))?;

    let len = array
        .dim_size(feature_dim)
        .ok_or_else(|| MergeError::MissingFeatureDim(target.to_string()))?;

    array.set_coord(
        &format!("{}_{}", feature_dim, SOURCE_DATASET_ATTR),
        Coordinate::new(feature_dim, CoordValues::repeat_str(&source.to_string(), len)),
    )?;

    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::merge_by_target;
    use crate::constants::{SOURCE_DATASET_ATTR, VARIABLES_MAPPING_DIM_ATTR};
    use crate::errors::MergeError;
    use crate::prep::dataset::{CoordValues, Coordinate, LabeledArray};
    use indexmap::IndexMap;
    use ndarray::{ArrayD, IxDyn};

    fn mapped(source: &str, feature_dim: &str, features: &[&str], grid: Vec<i64>) -> LabeledArray {
        let shape = [grid.len(), features.len()];
        LabeledArray::new(ArrayD::zeros(IxDyn(&shape)), &["grid_index", feature_dim])
            .unwrap()
            .with_coord("grid_index", Coordinate::new("grid_index", CoordValues::Int(grid)))
            .unwrap()
            .with_coord(
                feature_dim,
                Coordinate::new(
                    feature_dim,
                    CoordValues::Str(features.iter().map(|f| f.to_string()).collect()),
                ),
            )
            .unwrap()
            .with_attr(VARIABLES_MAPPING_DIM_ATTR, feature_dim)
            .with_attr(SOURCE_DATASET_ATTR, source)
    }

    #[test]
    fn inputs_of_one_target_are_concatenated() {
        let mut by_target = IndexMap::new();
        by_target.insert(
            "state".to_string(),
            vec![
                mapped("height_levels", "state_feature", &["u100m", "v100m"], vec![0, 1]),
                mapped("pressure_levels", "state_feature", &["z500"], vec![0, 1]),
            ],
        );
        by_target.insert(
            "static".to_string(),
            vec![mapped("static", "static_feature", &["lsm"], vec![0, 1])],
        );

        let dataset = merge_by_target(by_target).unwrap();
        let state = dataset.get("state").unwrap();

        assert_eq!(state.shape(), [2, 3]);
        assert_eq!(
            state.coord("state_feature_source_dataset").unwrap().values,
            CoordValues::Str(
                ["height_levels", "height_levels", "pressure_levels"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            )
        );
        assert!(state.attrs.get(SOURCE_DATASET_ATTR).is_none());
        assert_eq!(
            dataset.coord("grid_index").unwrap().values,
            CoordValues::Int(vec![0, 1])
        );
    }

    #[test]
    fn shared_feature_dim_name_fails_alignment() {
        let mut by_target = IndexMap::new();
        by_target.insert(
            "state".to_string(),
            vec![mapped("a", "feature", &["1", "2", "3", "4", "5"], vec![0, 1])],
        );
        by_target.insert(
            "forcing".to_string(),
            vec![mapped("b", "feature", &["1", "2", "3"], vec![0, 1])],
        );

        let err = merge_by_target(by_target).unwrap_err();
        assert!(matches!(err, MergeError::Alignment { ref target, .. } if target == "forcing"));
        assert!(err.to_string().contains("unique name"));
    }

    #[test]
    fn misaligned_grids_fail() {
        let mut by_target = IndexMap::new();
        by_target.insert(
            "state".to_string(),
            vec![mapped("a", "state_feature", &["t"], vec![0, 1])],
        );
        by_target.insert(
            "forcing".to_string(),
            vec![mapped("b", "forcing_feature", &["toa"], vec![1, 2])],
        );

        assert!(matches!(
            merge_by_target(by_target),
            Err(MergeError::Alignment { .. })
        ));
    }

    #[test]
    fn differing_feature_dims_for_one_target_fail() {
        let mut by_target = IndexMap::new();
        by_target.insert(
            "state".to_string(),
            vec![
                mapped("a", "state_feature", &["t"], vec![0, 1]),
                mapped("b", "feature", &["q"], vec![0, 1]),
            ],
        );

        assert_eq!(
            merge_by_target(by_target).unwrap_err(),
            MergeError::FeatureDimMismatch {
                target: "state".to_string(),
                dims: vec!["state_feature".to_string(), "feature".to_string()],
            }
        );
    }
}
