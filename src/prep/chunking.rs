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

//! Resolution of output chunk shapes.

use super::dataset::LabeledDataset;
use crate::constants::CHUNK_MAX_SIZE_WARNING;
use crate::Float;
use indexmap::IndexMap;
use log::{debug, warn};

/// Chunk shape of every variable in `dataset`.
///
/// Dimensions named in `chunking` use the configured size (at most
/// the dimension length), all other dimensions are kept whole.
pub fn chunk_shapes(
    dataset: &LabeledDataset,
    chunking: &IndexMap<String, usize>,
) -> IndexMap<String, Vec<usize>> {
    let dataset_dims = dataset.dims();
    for dim in chunking.keys().filter(|d| !dataset_dims.contains_key(*d)) {
        debug!("Chunking given for dimension `{}` absent from the output", dim);
    }

    dataset
        .variables()
        .map(|(name, array)| {
            let shape: Vec<usize> = array
                .dims()
                .iter()
                .zip(array.shape())
                .map(|(dim, &len)| chunking.get(dim).map_or(len, |&c| c.min(len)))
                .collect();

            check_chunk_size(name, &shape);
            (name.clone(), shape)
        })
        .collect()
}

fn check_chunk_size(variable: &str, shape: &[usize]) {
    let bytes = shape.iter().product::<usize>() * std::mem::size_of::<Float>();

    if bytes > CHUNK_MAX_SIZE_WARNING {
        warn!(
            "The chunk size for `{}` exceeds {} GB",
            variable,
            CHUNK_MAX_SIZE_WARNING / (1024 * 1024 * 1024)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::chunk_shapes;
    use crate::prep::dataset::{LabeledArray, LabeledDataset};
    use indexmap::IndexMap;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn unchunked_dims_stay_whole() {
        let state = LabeledArray::new(
            ArrayD::zeros(IxDyn(&[10, 6, 3])),
            &["time", "grid_index", "state_feature"],
        )
        .unwrap();
        let static_field =
            LabeledArray::new(ArrayD::zeros(IxDyn(&[6, 2])), &["grid_index", "static_feature"])
                .unwrap();

        let dataset = LabeledDataset::from_arrays(vec![
            ("state".to_string(), state),
            ("static".to_string(), static_field),
        ])
        .unwrap();

        let mut chunking = IndexMap::new();
        chunking.insert("time".to_string(), 4);
        chunking.insert("grid_index".to_string(), 100);
        chunking.insert("ensemble".to_string(), 1);

        let shapes = chunk_shapes(&dataset, &chunking);
        assert_eq!(shapes["state"], vec![4, 6, 3]);
        assert_eq!(shapes["static"], vec![6, 2]);
    }
}
