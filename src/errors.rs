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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepError {
    #[error("Error while reading config: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot cap memory at {0} MB, more is already allocated")]
    MemoryLimit(usize),

    #[error("Error while creating ThreadPool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Error while processing input dataset `{dataset}` for target `{target}`: {source}")]
    Input {
        dataset: String,
        target: String,
        source: InputError,
    },

    #[error("Error while checking projections of the inputs: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Error while merging target variables: {0}")]
    Merge(#[from] MergeError),

    #[error("Error while selecting output coordinate ranges: {0}")]
    Selection(#[from] SelectionError),

    #[error("Error while computing statistics: {0}")]
    Stats(#[from] StatsError),

    #[error("Error while assembling output dataset: {0}")]
    Array(#[from] ArrayError),

    #[error("Error while handling output storage: {0}")]
    Storage(#[from] StorageError),

    #[error("Error while recreating input dataset `{dataset}`: {source}")]
    Recreate {
        dataset: String,
        source: RecreateError,
    },

    #[error("Error while preparing output path: {0}")]
    OutputPath(#[from] std::io::Error),
}

/// Failure of a single input dataset pass, before it is
/// tagged with the dataset and target it concerns.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("{0}")]
    Load(#[from] LoadError),

    #[error("{0}")]
    Derive(#[from] DeriveError),

    #[error("{0}")]
    Mapping(#[from] MappingError),

    #[error("{0}")]
    Projection(#[from] ProjectionError),

    #[error("{0}")]
    Selection(#[from] SelectionError),

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Array(#[from] ArrayError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot open config file: {0}")]
    CantOpenFile(#[from] std::io::Error),

    #[error("Cannot deserialize config file: {0}")]
    CantDeserialize(#[from] serde_yaml::Error),

    #[error("Configuration component is out of bounds {0}")]
    OutOfBounds(&'static str),

    #[error("Unsupported schema version `{0}`, supported versions are {1:?}")]
    UnsupportedSchemaVersion(String, &'static [&'static str]),

    #[error("Section `extra` is only allowed from schema version v0.5.0, found `{0}`")]
    ExtraNotSupported(String),

    #[error("Input `{input}` targets output variable `{target}` which is not declared in `output.variables`")]
    UndeclaredTarget { input: String, target: String },

    #[error("Input `{input}` has no `dim_mapping` entry for output dimension `{dim}` of target `{target}`")]
    UnmappedOutputDim {
        input: String,
        target: String,
        dim: String,
    },

    #[error("Split `{0}` must have both `start` and `end`")]
    IncompleteSplit(String),

    #[error("Bound `{bound}` of split `{split}` is neither a number nor a datetime")]
    InvalidSplitBound { split: String, bound: String },

    #[error("Chunk size for dimension `{0}` must be at least 1")]
    InvalidChunkSize(String),

    #[error("Input `{0}` has neither `variables` nor `derived_variables`")]
    NoVariables(String),

    #[error("Unknown statistics operation `{0}`")]
    UnknownStatistic(String),

    #[error("Input `{0}` declares more than one projection, only one is supported")]
    MultipleProjections(String),

    #[error("Projection `{projection}` of input `{input}` spans dimension `{dim}` which is not in the input dims")]
    ProjectionDim {
        input: String,
        projection: String,
        dim: String,
    },

    #[error("Projection `{projection}` of input `{input}` has neither `crs_wkt` nor `grid_mapping_name`")]
    UndefinedProjection { input: String, projection: String },
}

#[derive(Error, Debug, PartialEq)]
pub enum ArrayError {
    #[error("Dimension `{0}` is present more than once")]
    DuplicateDimension(String),

    #[error("Array has {ndim} axes but {dims} dimension names were given")]
    DimensionCountMismatch { dims: usize, ndim: usize },

    #[error("Dimension `{0}` not found")]
    MissingDimension(String),

    #[error("Dimension `{0}` already exists")]
    DimensionExists(String),

    #[error("Coordinate `{name}` has length {found} but dimension `{dim}` has size {expected}")]
    CoordinateLength {
        name: String,
        dim: String,
        expected: usize,
        found: usize,
    },

    #[error("Cannot combine {0} labels with {1} labels")]
    IncompatibleLabels(&'static str, &'static str),

    #[error("Values of shape {found:?} do not fit an array of shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Nothing to concatenate")]
    NothingToConcatenate,

    #[error("Arrays cannot be concatenated along `{dim}`: {reason}")]
    ConcatMismatch { dim: String, reason: String },

    #[error("Coordinate `{0}` not found")]
    MissingCoordinate(String),

    #[error("Label `{label}` not found along dimension `{dim}`")]
    LabelNotFound { label: String, dim: String },

    #[error("Cannot broadcast dimensions {from:?} to {to:?}")]
    NotBroadcastable { from: Vec<String>, to: Vec<String> },

    #[error("Variable `{0}` not found")]
    MissingVariable(String),

    #[error("Dimension `{dim}` has size {size} and cannot be dropped")]
    NotSingleton { dim: String, size: usize },

    #[error("Labels along `{dim}` do not form a row-major product of {dims:?}")]
    NotAProduct { dim: String, dims: Vec<String> },

    #[error("Variable `{variable}` conflicts with the dataset along `{dim}`: {reason}")]
    DatasetConflict {
        variable: String,
        dim: String,
        reason: String,
    },

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

#[derive(Error, Debug, PartialEq)]
pub enum StackingError {
    #[error("The `name_format` `{0}` must include the `{{var_name}}` placeholder")]
    MissingVarNamePlaceholder(String),

    #[error("The `name_format` `{name_format}` must include the `{{{coord}}}` placeholder when stacking by `{coord}`")]
    MissingCoordPlaceholder { name_format: String, coord: String },

    #[error("Coordinate `{0}` not found in dataset, cannot stack variables by its labels")]
    MissingCoordinate(String),

    #[error("Variable `{variable}` does not span dimension `{dim}`")]
    VariableWithoutDim { variable: String, dim: String },

    #[error("There are no variables to stack into `{0}`")]
    NoVariables(String),

    #[error("{0}")]
    Array(#[from] ArrayError),
}

#[derive(Error, Debug, PartialEq)]
pub enum MappingError {
    #[error("Exactly one `stack_variables_by_var_name` mapping is required to produce the feature dimension, none was given")]
    MissingVariableStacking,

    #[error("Only one `stack_variables_by_var_name` mapping is allowed, found one for each of {0:?}")]
    MultipleVariableStackings(Vec<String>),

    #[error("Variable `{variable}` has dimensions {dims:?} not declared in the input dims {expected:?}")]
    UndeclaredDimensions {
        variable: String,
        dims: Vec<String>,
        expected: Vec<String>,
    },

    #[error("Dimensions `{0}` look like a comma-separated list, did you mean to write them as a list?")]
    MalformedList(String),

    #[error("Stacking variables along more than one coordinate ({0:?}) is not implemented")]
    NotImplemented(Vec<String>),

    #[error("Variable `{variable}` with dimensions {dims:?} has no dimension `{dim}` to map")]
    VariableWithoutDim {
        variable: String,
        dim: String,
        dims: Vec<String>,
    },

    #[error("Dimensions {0:?} are left over after mapping, map them or select them away")]
    UnmappedDimensions(Vec<String>),

    #[error("{0}")]
    Array(#[from] ArrayError),

    #[error("{0}")]
    Stacking(#[from] StackingError),

    #[error("Mapping `{mapping}` to output dimension `{output_dim}` failed for variables {variables:?} with dimensions {dims:?}: {source}")]
    InMapping {
        output_dim: String,
        mapping: String,
        variables: Vec<String>,
        dims: Vec<String>,
        source: Box<MappingError>,
    },
}

#[derive(Error, Debug)]
pub enum RecreateError {
    #[error("No `stack_variables_by_var_name` mapping gives the feature dimension")]
    MissingFeatureMapping,

    #[error("The `name_format` `{0}` must include the `{{var_name}}` placeholder")]
    MissingVarNamePlaceholder(String),

    #[error("Splitting features by more than one coordinate ({0:?}) is not implemented")]
    NotImplemented(Vec<String>),

    #[error("Labels of feature dimension `{0}` are missing or are not strings")]
    NotStringLabels(String),

    #[error("Feature `{label}` does not match `name_format` `{name_format}`")]
    UnmatchedLabel { label: String, name_format: String },

    #[error("Variable `{0}` is given by more than one feature")]
    DuplicateVariable(String),

    #[error("No feature along `{dim}` comes from input `{input}`")]
    NoFeatures { input: String, dim: String },

    #[error("{0}")]
    Mapping(#[from] MappingError),

    #[error("{0}")]
    Load(#[from] LoadError),

    #[error("{0}")]
    Array(#[from] ArrayError),
}

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error("Variables refer to more than one projection {0:?}, only one is supported")]
    MultipleReferenced(Vec<String>),

    #[error("Variables {variables:?} do not refer to projection `{projection}` used by the other variables")]
    Unreferenced {
        variables: Vec<String>,
        projection: String,
    },

    #[error("Projection `{0}` has neither `crs_wkt` nor `grid_mapping_name`")]
    Undefined(String),

    #[error("Inputs `{first}` and `{other}` use different projections, `{key}` differs")]
    Inconsistent {
        first: String,
        other: String,
        key: String,
    },

    #[error("{0}")]
    Load(#[from] LoadError),
}

#[derive(Error, Debug, PartialEq)]
pub enum MergeError {
    #[error("Array for target `{0}` does not record its feature dimension")]
    MissingFeatureDim(String),

    #[error("Inputs for target `{target}` stack features along different dimensions {dims:?}")]
    FeatureDimMismatch { target: String, dims: Vec<String> },

    #[error("Array for target `{0}` does not record its source dataset")]
    MissingSourceDataset(String),

    #[error("Inputs for target `{target}` cannot be concatenated: {source}")]
    Concat { target: String, source: ArrayError },

    #[error("Target variable `{target}` could not be merged ({source}). Give each target's feature dimension a unique name (e.g. `state_feature`, `forcing_feature`) or check that their dimensions and coordinates agree")]
    Alignment { target: String, source: ArrayError },

    #[error("{0}")]
    Array(#[from] ArrayError),
}

#[derive(Error, Debug, PartialEq)]
pub enum SelectionError {
    #[error("Coordinate `{0}` not found, cannot select on it")]
    MissingCoordinate(String),

    #[error("Range selection on `{0}` needs at least one of `start` or `end`")]
    NoBounds(String),

    #[error("Range selection on `{0}` has equal `start` and `end`")]
    EqualBounds(String),

    #[error("Bound `{bound}` of range on `{coord}` is not present in the data")]
    BoundNotFound { coord: String, bound: String },

    #[error("Bound `{bound}` cannot be compared with the labels of `{coord}`")]
    IncompatibleBound { coord: String, bound: String },

    #[error("Coordinate `{0}` is not monotonically increasing")]
    NotMonotonic(String),

    #[error("Coordinate `{0}` does not have a constant step")]
    NonConstantStep(String),

    #[error("Step of coordinate `{coord}` is {found} but {expected} was requested")]
    StepMismatch {
        coord: String,
        expected: String,
        found: String,
    },

    #[error("Step `{0}` is not a valid ISO 8601 duration or number")]
    InvalidStep(String),

    #[error("Selection on `{0}` is empty")]
    EmptySelection(String),

    #[error("{0}")]
    Array(#[from] ArrayError),
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Variable `{0}` not found in source dataset")]
    MissingVariable(String),

    #[error("Coordinate `{0}` not found in source dataset")]
    MissingCoordinate(String),

    #[error("Coordinate `{coord}` has units `{found}` but `{expected}` were requested")]
    UnitsMismatch {
        coord: String,
        expected: String,
        found: String,
    },

    #[error("Expected dataset attribute `{0}` is missing")]
    MissingAttribute(String),

    #[error("Dataset attribute `{name}` is `{found}` but `{expected}` was expected")]
    AttributeMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("{0}")]
    Selection(#[from] SelectionError),

    #[error("{0}")]
    Array(#[from] ArrayError),

    #[error("{0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum DeriveError {
    #[error("Unknown derivation function `{0}`")]
    UnknownFunction(String),

    #[error("Function `{function}` is missing argument `{argument}`")]
    MissingArgument { function: String, argument: String },

    #[error("Function `{function}` received invalid argument `{argument}`: {reason}")]
    InvalidArgument {
        function: String,
        argument: String,
        reason: String,
    },

    #[error("Derived variable `{variable}` is missing required attributes {missing:?}")]
    MissingAttributes {
        variable: String,
        missing: Vec<String>,
    },

    #[error("Coordinate `{0}` must hold datetime labels")]
    NotDateTime(String),

    #[error("Coordinate `{0}` must hold numeric labels")]
    NotNumeric(String),

    #[error("{0}")]
    Load(#[from] LoadError),

    #[error("{0}")]
    Array(#[from] ArrayError),
}

#[derive(Error, Debug, PartialEq)]
pub enum StatsError {
    #[error("Unknown statistics operation `{0}`")]
    UnknownOperation(String),

    #[error("No variable has dimension `{0}` to reduce over")]
    MissingDimension(String),

    #[error("{0}")]
    Selection(#[from] SelectionError),

    #[error("{0}")]
    Array(#[from] ArrayError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No storage backend available, rebuild with the `zarr` feature")]
    NoBackend,

    #[error("Cannot access {0}: {1}")]
    Io(String, std::io::Error),

    #[error("Unsupported data type `{dtype}` of array `{name}`")]
    UnsupportedDataType { name: String, dtype: String },

    #[error("Array `{0}` does not record its dimension names")]
    MissingDimensionNames(String),

    #[error("Cannot decode time units `{0}`")]
    TimeUnits(String),

    #[error("{0}")]
    Array(#[from] ArrayError),

    #[cfg(feature = "zarr")]
    #[error("Zarr store error: {0}")]
    Store(#[from] zarrs::filesystem::FilesystemStoreCreateError),

    #[cfg(feature = "zarr")]
    #[error("Zarr storage error: {0}")]
    Zarr(#[from] zarrs::storage::StorageError),

    #[cfg(feature = "zarr")]
    #[error("Zarr array error: {0}")]
    ZarrArray(#[from] zarrs::array::ArrayError),

    #[cfg(feature = "zarr")]
    #[error("Zarr array creation error: {0}")]
    ZarrArrayCreate(#[from] zarrs::array::ArrayCreateError),

    #[cfg(feature = "zarr")]
    #[error("Zarr group creation error: {0}")]
    ZarrGroupCreate(#[from] zarrs::group::GroupCreateError),
}
