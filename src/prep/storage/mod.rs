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

//! Access to the on-disk datasets read and written by the preparation.
//!
//! The pipeline only sees the [`Storage`] trait. The Zarr backend
//! is compiled in with the `zarr` cargo feature, enabled by default.

#[cfg(feature = "zarr")]
mod zarr;

use super::dataset::LabeledDataset;
use super::loading::DatasetSource;
use crate::errors::StorageError;
use indexmap::IndexMap;
use std::path::Path;

#[cfg(feature = "zarr")]
pub use zarr::ZarrStorage;

/// Chunk shape per output variable.
pub type ChunkShapes = IndexMap<String, Vec<usize>>;

pub trait Storage {
    /// Opens the dataset at `path` for reading.
    fn open(&self, path: &Path) -> Result<Box<dyn DatasetSource>, StorageError>;

    /// Writes `dataset` to `path`, which must not exist.
    fn write(
        &self,
        dataset: &LabeledDataset,
        chunks: &ChunkShapes,
        path: &Path,
    ) -> Result<(), StorageError>;
}

/// Storage backend selected at compile time.
pub fn default_storage() -> Result<Box<dyn Storage>, StorageError> {
    #[cfg(feature = "zarr")]
    {
        Ok(Box::new(ZarrStorage))
    }

    #[cfg(not(feature = "zarr"))]
    {
        Err(StorageError::NoBackend)
    }
}
