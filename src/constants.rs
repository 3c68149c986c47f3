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

//! Module containing constants used by the preparation pipeline.

use crate::Float;

/// Configuration schema versions this build understands.
pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["v0.2.0", "v0.5.0"];

/// First schema version allowing the `extra` section.
pub const EXTRA_SECTION_SINCE: &str = "v0.5.0";

/// Placeholder for the variable name in feature `name_format`.
pub const VAR_NAME_PLACEHOLDER: &str = "{var_name}";

/// Array attribute naming the output dimension holding stacked features.
pub const VARIABLES_MAPPING_DIM_ATTR: &str = "variables_mapping_dim";

/// Array attribute naming the input dataset an array comes from.
pub const SOURCE_DATASET_ATTR: &str = "source_dataset";

/// Variable attributes kept per feature as auxiliary coordinates.
pub const PER_FEATURE_ATTRS: [&str; 2] = ["units", "long_name"];

/// Chunk size (in bytes) above which a warning is issued.
pub const CHUNK_MAX_SIZE_WARNING: usize = 1024 * 1024 * 1024;

/// Name of the variable holding split boundaries.
pub const SPLITS_VARIABLE: &str = "splits";

pub const SPLIT_NAME_DIM: &str = "split_name";
pub const SPLIT_PART_DIM: &str = "split_part";

/// Tool identifier written to the output attributes.
pub const CREATED_WITH: &str = "gridprep";

/// Solar constant ($W m^{-2}$) used for top-of-atmosphere radiation.
pub const SOLAR_CONSTANT: Float = 1366.0;

/// Earth obliquity in degrees used in the declination approximation.
pub const EARTH_OBLIQUITY: Float = 23.45;

/// Hours in a day, for cyclic hour-of-day encoding.
pub const HOURS_IN_DAY: Float = 24.0;

/// Days used for cyclic day-of-year encoding (leap years included).
pub const DAYS_IN_YEAR: Float = 366.0;

/// Units of datetimes stored as seconds since the Unix epoch.
pub const DATETIME_UNITS: &str = "seconds since 1970-01-01 00:00:00";

/// Variable attribute naming the projection variable (CF `grid_mapping`).
pub const GRID_MAPPING_ATTR: &str = "grid_mapping";

/// Name of the scalar output variable holding the projection attributes.
pub const PROJECTION_VARIABLE: &str = "crs";

/// Projection attributes, at least one of which defines a CRS.
pub const CRS_WKT_ATTR: &str = "crs_wkt";
pub const GRID_MAPPING_NAME_ATTR: &str = "grid_mapping_name";
