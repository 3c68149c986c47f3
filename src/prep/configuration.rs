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

//! Module responsible for parsing and checking the configuration file.
//!
//! The configuration file uses [YAML](https://en.wikipedia.org/wiki/YAML)
//! and `serde` to enforce strong typing. Every structure rejects unknown
//! fields, so a misspelled key is reported instead of silently ignored.
//!
//! Maps are kept in file order, because the order of inputs and
//! variables decides the order of features in the output.

use super::dataset::{AttrValue, Attributes, Label};
use super::statistics::Operation;
use crate::constants::{
    CRS_WKT_ATTR, EXTRA_SECTION_SINCE, GRID_MAPPING_NAME_ATTR, SUPPORTED_SCHEMA_VERSIONS,
};
use crate::errors::{ConfigError, MappingError};
use crate::Float;
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{fmt, fs, path::Path, path::PathBuf};

/// Single value used as a selection bound or label in the configuration.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Int(i64),
    Float(Float),
    Text(String),
}

impl Bound {
    /// Converts the bound into a coordinate label.
    ///
    /// Text that reads as an ISO 8601 date or datetime becomes
    /// a datetime label, any other text stays a string.
    pub fn to_label(&self) -> Label {
        match self {
            Bound::Int(v) => Label::Int(*v),
            Bound::Float(v) => Label::Float(*v),
            Bound::Text(text) => match parse_datetime(text) {
                Some(dt) => Label::DateTime(dt),
                None => Label::Str(text.clone()),
            },
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Int(v) => write!(f, "{}", v),
            Bound::Float(v) => write!(f, "{}", v),
            Bound::Text(v) => write!(f, "{}", v),
        }
    }
}

pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Inclusive range of coordinate values.
///
/// `step` is optional and given either as a number or as
/// an ISO 8601 duration (e.g. `PT3H`). When set, the data is
/// checked to have exactly that constant step.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Range {
    #[serde(default)]
    pub start: Option<Bound>,

    #[serde(default)]
    pub end: Option<Bound>,

    #[serde(default)]
    pub step: Option<Bound>,
}

/// Values to select along a coordinate: explicit labels or a range.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum Selection {
    List(Vec<Bound>),
    Range(Range),
}

/// Selection of a variable along one of its coordinates.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueSelection {
    pub values: Selection,

    /// _(Optional)_ Units the coordinate must have in the source.
    #[serde(default)]
    pub units: Option<String>,
}

/// Variables to load from an input dataset.
///
/// Either a plain list of names, or a map from variable
/// name to per-coordinate selections.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum Variables {
    List(Vec<String>),
    Selected(IndexMap<String, IndexMap<String, ValueSelection>>),
}

impl Variables {
    pub fn names(&self) -> Vec<String> {
        match self {
            Variables::List(names) => names.clone(),
            Variables::Selected(map) => map.keys().cloned().collect(),
        }
    }
}

/// Source dimensions of a mapping, as a list or a single name.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum SourceDims {
    List(Vec<String>),
    Text(String),
}

impl Default for SourceDims {
    fn default() -> Self {
        SourceDims::List(vec![])
    }
}

impl SourceDims {
    /// Resolves to the list of dimension names.
    ///
    /// A single name is a one-element list. Text with a comma is
    /// rejected, as it is almost always a list written inline by mistake.
    pub fn resolve(&self) -> Result<Vec<String>, MappingError> {
        match self {
            SourceDims::List(dims) => Ok(dims.clone()),
            SourceDims::Text(text) if text.contains(',') => {
                Err(MappingError::MalformedList(text.clone()))
            }
            SourceDims::Text(text) => Ok(vec![text.clone()]),
        }
    }
}

impl fmt::Display for SourceDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDims::List(dims) => write!(f, "[{}]", dims.join(", ")),
            SourceDims::Text(text) => write!(f, "\"{}\"", text),
        }
    }
}

/// Instruction for producing one output dimension from the input dataset.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case", deny_unknown_fields)]
pub enum DimMapping {
    /// Input dimension `dim` becomes the output dimension.
    Rename { dim: String },

    /// Input dimensions `dims` are flattened into the output dimension.
    Stack { dims: SourceDims },

    /// Every variable becomes one or more slices of the output dimension,
    /// labeled with `name_format`.
    StackVariablesByVarName {
        #[serde(default)]
        dims: SourceDims,
        name_format: String,
    },
}

impl fmt::Display for DimMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimMapping::Rename { dim } => write!(f, "rename(dim={})", dim),
            DimMapping::Stack { dims } => write!(f, "stack(dims={})", dims),
            DimMapping::StackVariablesByVarName { dims, name_format } => write!(
                f,
                "stack_variables_by_var_name(dims={}, name_format={})",
                dims, name_format
            ),
        }
    }
}

/// Variable computed from the fields and coordinates of an input.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerivedVariable {
    /// Name of the function in the derivation registry.
    pub function: String,

    /// Arguments of the function. Values starting with `ds_input.`
    /// are read from the input dataset, others are passed as given.
    #[serde(default)]
    pub kwargs: IndexMap<String, AttrValue>,

    /// _(Optional)_ `units` and `long_name` overriding those set by the function.
    #[serde(default)]
    pub attributes: Attributes,
}

/// Coordinate reference system the variables of an input refer to.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Projection {
    /// Dimensions spanned by the projection, usually `[x, y]`.
    pub dims: Vec<String>,

    /// CF grid-mapping attributes. Must contain `crs_wkt`,
    /// `grid_mapping_name` or both.
    pub attributes: Attributes,
}

/// Fields describing one input dataset and how it maps
/// to an output variable.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDataset {
    /// Location of the source dataset.
    pub path: PathBuf,

    /// Dimensions the loaded variables are allowed to have.
    pub dims: Vec<String>,

    /// _(Optional)_ Variables to load. At least one of `variables`
    /// and `derived_variables` must be given.
    #[serde(default)]
    pub variables: Option<Variables>,

    /// _(Optional)_ Variables computed from the source.
    #[serde(default)]
    pub derived_variables: IndexMap<String, DerivedVariable>,

    /// How each output dimension is produced from the input.
    pub dim_mapping: IndexMap<String, DimMapping>,

    /// Output variable this input contributes to.
    pub target_output_variable: String,

    /// _(Optional)_ Attributes the source dataset must carry.
    #[serde(default)]
    pub attributes: Attributes,

    /// _(Optional)_ Projection of the input, replacing the one
    /// referenced in the source dataset.
    #[serde(default)]
    pub projections: IndexMap<String, Projection>,
}

/// Statistics to compute over a split.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Statistics {
    /// Operations: `mean`, `std`, `min`, `max`, optionally
    /// prefixed with `diff_`.
    pub ops: Vec<String>,

    /// Dimensions reduced over.
    pub dims: Vec<String>,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Split {
    #[serde(default)]
    pub start: Option<Bound>,

    #[serde(default)]
    pub end: Option<Bound>,

    #[serde(default)]
    pub compute_statistics: Option<Statistics>,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Splitting {
    /// Dimension along which the dataset is split.
    pub dim: String,

    pub splits: IndexMap<String, Split>,
}

impl Splitting {
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.dim.is_empty() {
            return Err(ConfigError::OutOfBounds(
                "Splitting dimension cannot be empty",
            ));
        }

        if self.splits.is_empty() {
            return Err(ConfigError::OutOfBounds(
                "Splitting needs at least one split",
            ));
        }

        for (name, split) in &self.splits {
            if split.start.is_none() || split.end.is_none() {
                return Err(ConfigError::IncompleteSplit(name.clone()));
            }

            if let Some(stats) = &split.compute_statistics {
                for op in &stats.ops {
                    if op.parse::<Operation>().is_err() {
                        return Err(ConfigError::UnknownStatistic(op.clone()));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Fields describing the assembled dataset.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Output {
    /// Output variables and their dimensions, in order.
    pub variables: IndexMap<String, Vec<String>>,

    /// _(Optional)_ Ranges selected on output coordinates.
    #[serde(default)]
    pub coord_ranges: IndexMap<String, Range>,

    /// _(Optional)_ Chunk size per dimension. Dimensions not
    /// listed are stored as a single chunk.
    #[serde(default)]
    pub chunking: IndexMap<String, usize>,

    #[serde(default)]
    pub splitting: Option<Splitting>,
}

impl Output {
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.variables.is_empty() {
            return Err(ConfigError::OutOfBounds(
                "At least one output variable must be declared",
            ));
        }

        for (dim, &size) in &self.chunking {
            if size < 1 {
                return Err(ConfigError::InvalidChunkSize(dim.clone()));
            }
        }

        if let Some(splitting) = &self.splitting {
            splitting.check_bounds()?;
        }

        Ok(())
    }
}

/// _(Optional)_ Fields with information about
/// resources available for the preparation.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    /// _(Optional)_ Thread count used for computing statistics.
    ///
    /// Cannot be less than `1`. Defaults to `1`.
    #[serde(default = "Resources::default_threads")]
    pub threads: u16,

    /// _(Optional)_ Heap memory limit in MB.
    ///
    /// The whole dataset is held in memory during assembly, so
    /// capping the allocator turns an unexplained kill by the system
    /// into an out-of-memory message. Cannot be less than `128`.
    /// Defaults to the whole addressable space.
    #[serde(default = "Resources::default_memory")]
    pub memory: usize,
}

impl Resources {
    fn default_threads() -> u16 {
        1
    }

    fn default_memory() -> usize {
        usize::MAX / (1024 * 1024)
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.threads < 1 {
            return Err(ConfigError::OutOfBounds(
                "Available threads cannot be less than 1",
            ));
        }

        if self.memory < 128 {
            return Err(ConfigError::OutOfBounds(
                "Available memory cannot be less than 128 MB",
            ));
        }

        Ok(())
    }
}

impl Default for Resources {
    fn default() -> Self {
        Resources {
            threads: Resources::default_threads(),
            memory: Resources::default_memory(),
        }
    }
}

/// Main config structure representing the fields in
/// configuration file.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub schema_version: String,

    pub dataset_version: String,

    pub inputs: IndexMap<String, InputDataset>,

    pub output: Output,

    /// _(Optional)_ Free-form section ignored by the preparation,
    /// available from schema version v0.5.0.
    #[serde(default)]
    pub extra: Option<serde_yaml::Value>,

    #[serde(default)]
    pub resources: Resources,
}

impl Config {
    /// Config structure constructor, responsible for
    /// deserializing configuration and checking it.
    pub fn new_from_file(file_path: &Path) -> Result<Config, ConfigError> {
        let data = fs::read(file_path)?;
        Config::new_from_slice(data.as_slice())
    }

    pub fn new_from_slice(data: &[u8]) -> Result<Config, ConfigError> {
        let config: Config = serde_yaml::from_slice(data)?;

        config.check_bounds()?;
        config.output.check_bounds()?;
        config.resources.check_bounds()?;

        Ok(config)
    }

    fn check_bounds(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_SCHEMA_VERSIONS.contains(&self.schema_version.as_str()) {
            return Err(ConfigError::UnsupportedSchemaVersion(
                self.schema_version.clone(),
                SUPPORTED_SCHEMA_VERSIONS,
            ));
        }

        if self.extra.is_some() && self.schema_version.as_str() < EXTRA_SECTION_SINCE {
            return Err(ConfigError::ExtraNotSupported(self.schema_version.clone()));
        }

        if self.inputs.is_empty() {
            return Err(ConfigError::OutOfBounds(
                "At least one input dataset must be given",
            ));
        }

        for (name, input) in &self.inputs {
            let has_variables = match &input.variables {
                Some(Variables::List(list)) => !list.is_empty(),
                Some(Variables::Selected(map)) => !map.is_empty(),
                None => false,
            };

            if !has_variables && input.derived_variables.is_empty() {
                return Err(ConfigError::NoVariables(name.clone()));
            }

            let output_dims = self
                .output
                .variables
                .get(&input.target_output_variable)
                .ok_or_else(|| ConfigError::UndeclaredTarget {
                    input: name.clone(),
                    target: input.target_output_variable.clone(),
                })?;

            if let Some(dim) = output_dims
                .iter()
                .find(|d| !input.dim_mapping.contains_key(*d))
            {
                return Err(ConfigError::UnmappedOutputDim {
                    input: name.clone(),
                    target: input.target_output_variable.clone(),
                    dim: dim.clone(),
                });
            }

            input.check_projections(name)?;
        }

        Ok(())
    }
}

impl InputDataset {
    fn check_projections(&self, name: &str) -> Result<(), ConfigError> {
        if self.projections.len() > 1 {
            return Err(ConfigError::MultipleProjections(name.to_string()));
        }

        for (projection_name, projection) in &self.projections {
            if let Some(dim) = projection.dims.iter().find(|d| !self.dims.contains(*d)) {
                return Err(ConfigError::ProjectionDim {
                    input: name.to_string(),
                    projection: projection_name.clone(),
                    dim: dim.clone(),
                });
            }

            if !projection.attributes.contains_key(CRS_WKT_ATTR)
                && !projection.attributes.contains_key(GRID_MAPPING_NAME_ATTR)
            {
                return Err(ConfigError::UndefinedProjection {
                    input: name.to_string(),
                    projection: projection_name.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Bound, Config, DimMapping, Selection, SourceDims, Variables};
    use crate::errors::{ConfigError, MappingError};
    use crate::prep::dataset::{AttrValue, Label};

    const MINIMAL: &str = r#"
schema_version: v0.5.0
dataset_version: v0.1.0

output:
  variables:
    state: [time, grid_index, state_feature]
  chunking:
    time: 1
  splitting:
    dim: time
    splits:
      train:
        start: 1990-09-03T00:00
        end: 1990-09-06T00:00
        compute_statistics:
          ops: [mean, std, diff_mean]
          dims: [grid_index, time]

inputs:
  danra_height_levels:
    path: data/height_levels.zarr
    dims: [time, x, y, altitude]
    variables:
      u:
        altitude:
          values: [100]
          units: m
      v:
        altitude:
          values: [100]
          units: m
    dim_mapping:
      time:
        method: rename
        dim: time
      state_feature:
        method: stack_variables_by_var_name
        dims: [altitude]
        name_format: "{var_name}{altitude}m"
      grid_index:
        method: stack
        dims: [x, y]
    target_output_variable: state
"#;

    #[test]
    fn minimal_config_parses() {
        let config = Config::new_from_slice(MINIMAL.as_bytes()).unwrap();
        let input = &config.inputs["danra_height_levels"];

        assert_eq!(
            input.dim_mapping.keys().collect::<Vec<_>>(),
            vec!["time", "state_feature", "grid_index"]
        );
        assert_eq!(
            input.dim_mapping["grid_index"],
            DimMapping::Stack {
                dims: SourceDims::List(vec!["x".to_string(), "y".to_string()])
            }
        );

        match &input.variables {
            Some(Variables::Selected(map)) => {
                let sel = &map["u"]["altitude"];
                assert_eq!(sel.values, Selection::List(vec![Bound::Int(100)]));
                assert_eq!(sel.units.as_deref(), Some("m"));
            }
            other => panic!("unexpected variables {:?}", other),
        }

        let splitting = config.output.splitting.unwrap();
        assert!(matches!(
            splitting.splits["train"].start.as_ref().unwrap().to_label(),
            Label::DateTime(_)
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let text = MINIMAL.replace("target_output_variable", "target_output_variabel");
        assert!(matches!(
            Config::new_from_slice(text.as_bytes()),
            Err(ConfigError::CantDeserialize(_))
        ));
    }

    #[test]
    fn unsupported_schema_and_extra() {
        let text = MINIMAL.replace("v0.5.0", "v0.1.0");
        assert!(matches!(
            Config::new_from_slice(text.as_bytes()),
            Err(ConfigError::UnsupportedSchemaVersion(..))
        ));

        let text = format!("{}\nextra:\n  note: hi\n", MINIMAL.replace("v0.5.0", "v0.2.0"));
        assert!(matches!(
            Config::new_from_slice(text.as_bytes()),
            Err(ConfigError::ExtraNotSupported(_))
        ));
    }

    #[test]
    fn target_and_dims_are_checked() {
        let text = MINIMAL.replace("target_output_variable: state", "target_output_variable: forcing");
        assert!(matches!(
            Config::new_from_slice(text.as_bytes()),
            Err(ConfigError::UndeclaredTarget { .. })
        ));

        let text = MINIMAL.replace("[time, grid_index, state_feature]", "[time, grid_index, state_feature, ensemble]");
        assert!(matches!(
            Config::new_from_slice(text.as_bytes()),
            Err(ConfigError::UnmappedOutputDim { .. })
        ));
    }

    #[test]
    fn comma_string_dims_resolve_to_error() {
        let dims = SourceDims::Text("x,y".to_string());
        assert_eq!(dims.resolve(), Err(MappingError::MalformedList("x,y".to_string())));
        assert_eq!(
            SourceDims::Text("altitude".to_string()).resolve(),
            Ok(vec!["altitude".to_string()])
        );
    }

    #[test]
    fn projections_are_checked() {
        let projection = "    projections:
      lambert:
        dims: [x, y]
        attributes:
          grid_mapping_name: lambert_conformal_conic
          standard_parallel: 56.7
    target_output_variable: state";
        let text = MINIMAL.replace("    target_output_variable: state", projection);

        let config = Config::new_from_slice(text.as_bytes()).unwrap();
        let projections = &config.inputs["danra_height_levels"].projections;
        assert_eq!(projections["lambert"].dims, vec!["x", "y"]);
        assert_eq!(
            projections["lambert"].attributes.get("standard_parallel"),
            Some(&AttrValue::Float(56.7))
        );

        let text = MINIMAL.replace(
            "    target_output_variable: state",
            &projection.replace("[x, y]", "[x, rlat]"),
        );
        assert!(matches!(
            Config::new_from_slice(text.as_bytes()),
            Err(ConfigError::ProjectionDim { dim, .. }) if dim == "rlat"
        ));

        let text = MINIMAL.replace(
            "    target_output_variable: state",
            &projection.replace("grid_mapping_name", "name"),
        );
        assert!(matches!(
            Config::new_from_slice(text.as_bytes()),
            Err(ConfigError::UndefinedProjection { .. })
        ));
    }
}
