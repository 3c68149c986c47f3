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

//! Zarr backend built on `zarrs`.
//!
//! Every variable and coordinate is a separate array in the root
//! group. Dimension names are read from the array metadata or, for
//! stores written by xarray, from the `_ARRAY_DIMENSIONS` attribute.
//! CF packing (`scale_factor`, `add_offset`, `_FillValue`) and
//! CF time units (`<unit> since <datetime>`) are decoded on read;
//! datetimes are written as seconds since the Unix epoch.

use super::{ChunkShapes, Storage};
use crate::constants::DATETIME_UNITS;
use crate::errors::{LoadError, StorageError};
use crate::prep::configuration::parse_datetime;
use crate::prep::dataset::{AttrValue, Attributes, CoordValues, Coordinate, LabeledArray, LabeledDataset};
use crate::prep::loading::DatasetSource;
use crate::Float;
use chrono::{Duration, NaiveDateTime};
use log::debug;
use ndarray::{Array1, ArrayD};
use serde_json::{Map, Value};
use std::{
    fs, io,
    num::NonZeroU64,
    path::{Path, PathBuf},
    sync::Arc,
};
use zarrs::array::chunk_grid::{ChunkGrid, RegularChunkGrid};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::{Group, GroupBuilder};

const DIMENSIONS_ATTR: &str = "_ARRAY_DIMENSIONS";
const COORDINATES_ATTR: &str = "coordinates";
const CALENDAR: &str = "proleptic_gregorian";

type ZarrArray = Array<FilesystemStore>;

pub struct ZarrStorage;

impl Storage for ZarrStorage {
    fn open(&self, path: &Path) -> Result<Box<dyn DatasetSource>, StorageError> {
        Ok(Box::new(ZarrSource::open(path)?))
    }

    fn write(
        &self,
        dataset: &LabeledDataset,
        chunks: &ChunkShapes,
        path: &Path,
    ) -> Result<(), StorageError> {
        fs::create_dir_all(path)
            .map_err(|err| StorageError::Io(path.display().to_string(), err))?;

        let store = Arc::new(FilesystemStore::new(path)?);

        GroupBuilder::new()
            .attributes(to_json(&dataset.attrs))
            .build(store.clone(), "/")?
            .store_metadata()?;

        for (name, coord) in dataset.coords() {
            debug!("Writing coordinate {}", name);
            write_coordinate(&store, &name, &coord)?;
        }

        for (name, array) in dataset.variables() {
            debug!("Writing variable {}", name);
            let chunk = chunks
                .get(name)
                .cloned()
                .unwrap_or_else(|| array.shape().to_vec());
            write_variable(&store, name, array, &chunk)?;
        }

        Ok(())
    }
}

struct ZarrSource {
    path: PathBuf,
    store: Arc<FilesystemStore>,
    attrs: Attributes,
}

impl ZarrSource {
    fn open(path: &Path) -> Result<Self, StorageError> {
        if !path.is_dir() {
            return Err(StorageError::Io(
                path.display().to_string(),
                io::Error::new(io::ErrorKind::NotFound, "dataset directory does not exist"),
            ));
        }

        let store = Arc::new(FilesystemStore::new(path)?);
        let group = Group::open(store.clone(), "/")?;
        let attrs = from_json(group.attributes());

        Ok(ZarrSource {
            path: path.to_path_buf(),
            store,
            attrs,
        })
    }

    fn contains(&self, name: &str) -> bool {
        self.path.join(name).is_dir()
    }

    fn open_array(&self, name: &str) -> Result<(ZarrArray, Vec<String>), StorageError> {
        let array = Array::open(self.store.clone(), &format!("/{}", name))?;
        let dims = dimension_names(name, &array)?;
        Ok((array, dims))
    }
}

impl DatasetSource for ZarrSource {
    fn attributes(&self) -> Attributes {
        self.attrs.clone()
    }

    fn variable(&self, name: &str) -> Result<LabeledArray, LoadError> {
        if !self.contains(name) {
            return Err(LoadError::MissingVariable(name.to_string()));
        }

        let (array, dims) = self.open_array(name)?;
        let mut attrs = from_json(array.attributes());
        let data = decode_packed(read_numeric(name, &array)?, &mut attrs);

        let mut variable = LabeledArray::new(data, &dims)?;

        let aux_names: Vec<String> = attrs
            .shift_remove(COORDINATES_ATTR)
            .and_then(|v| v.as_str().map(|s| s.split_whitespace().map(str::to_string).collect()))
            .unwrap_or_default();

        for coord_name in dims.iter().chain(&aux_names) {
            if coord_name == name || !self.contains(coord_name) {
                continue;
            }

            match self.coordinate(coord_name) {
                Ok(coord) if variable.has_dim(&coord.dim) => variable.set_coord(coord_name, coord)?,
                Ok(_) | Err(LoadError::MissingCoordinate(_)) => (),
                Err(err) => return Err(err),
            }
        }

        variable.attrs = attrs;
        Ok(variable)
    }

    fn coordinate(&self, name: &str) -> Result<Coordinate, LoadError> {
        if !self.contains(name) {
            return Err(LoadError::MissingCoordinate(name.to_string()));
        }

        let (array, dims) = self.open_array(name)?;
        let dim = match dims.as_slice() {
            [dim] => dim.clone(),
            _ => return Err(LoadError::MissingCoordinate(name.to_string())),
        };

        let mut attrs = from_json(array.attributes());

        let values = match array.data_type() {
            DataType::String => CoordValues::Str(
                array
                    .retrieve_array_subset_elements::<String>(&array.subset_all())
                    .map_err(StorageError::from)?,
            ),
            data_type => {
                let raw = decode_packed(read_numeric(name, &array)?, &mut attrs);
                let raw: Vec<Float> = raw.iter().copied().collect();

                let time_units = attrs
                    .get("units")
                    .and_then(AttrValue::as_str)
                    .filter(|units| units.contains(" since "))
                    .map(str::to_string);

                match time_units {
                    Some(units) => {
                        attrs.shift_remove("units");
                        attrs.shift_remove("calendar");
                        CoordValues::DateTime(decode_times(&raw, &units)?)
                    }
                    None if is_integer(data_type) => {
                        CoordValues::Int(raw.iter().map(|&v| v as i64).collect())
                    }
                    None => CoordValues::Float(raw),
                }
            }
        };

        Ok(Coordinate { dim, values, attrs })
    }
}

fn dimension_names(name: &str, array: &ZarrArray) -> Result<Vec<String>, StorageError> {
    if let Some(names) = array.dimension_names() {
        let names: Option<Vec<String>> = names
            .iter()
            .map(|n| n.as_str().map(str::to_string))
            .collect();

        if let Some(names) = names {
            return Ok(names);
        }
    }

    array
        .attributes()
        .get(DIMENSIONS_ATTR)
        .and_then(Value::as_array)
        .and_then(|names| {
            names
                .iter()
                .map(|n| n.as_str().map(str::to_string))
                .collect::<Option<Vec<String>>>()
        })
        .ok_or_else(|| StorageError::MissingDimensionNames(name.to_string()))
}

fn is_integer(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

fn read_numeric(name: &str, array: &ZarrArray) -> Result<ArrayD<Float>, StorageError> {
    let subset = array.subset_all();

    let data = match array.data_type() {
        DataType::Float64 => array.retrieve_array_subset_ndarray::<f64>(&subset)?,
        DataType::Float32 => array
            .retrieve_array_subset_ndarray::<f32>(&subset)?
            .mapv(|v| v as Float),
        DataType::Int64 => array
            .retrieve_array_subset_ndarray::<i64>(&subset)?
            .mapv(|v| v as Float),
        DataType::Int32 => array
            .retrieve_array_subset_ndarray::<i32>(&subset)?
            .mapv(|v| v as Float),
        DataType::Int16 => array
            .retrieve_array_subset_ndarray::<i16>(&subset)?
            .mapv(|v| v as Float),
        DataType::Int8 => array
            .retrieve_array_subset_ndarray::<i8>(&subset)?
            .mapv(|v| v as Float),
        DataType::UInt64 => array
            .retrieve_array_subset_ndarray::<u64>(&subset)?
            .mapv(|v| v as Float),
        DataType::UInt32 => array
            .retrieve_array_subset_ndarray::<u32>(&subset)?
            .mapv(|v| v as Float),
        DataType::UInt16 => array
            .retrieve_array_subset_ndarray::<u16>(&subset)?
            .mapv(|v| v as Float),
        DataType::UInt8 => array
            .retrieve_array_subset_ndarray::<u8>(&subset)?
            .mapv(|v| v as Float),
        other => {
            return Err(StorageError::UnsupportedDataType {
                name: name.to_string(),
                dtype: format!("{:?}", other),
            })
        }
    };

    Ok(data)
}

/// Applies CF packing attributes and removes them.
fn decode_packed(mut data: ArrayD<Float>, attrs: &mut Attributes) -> ArrayD<Float> {
    let fill = ["_FillValue", "missing_value"]
        .iter()
        .filter_map(|key| attrs.shift_remove(*key))
        .filter_map(|v| v.as_number())
        .collect::<Vec<Float>>();
    let scale = attrs.shift_remove("scale_factor").and_then(|v| v.as_number());
    let offset = attrs.shift_remove("add_offset").and_then(|v| v.as_number());

    data.mapv_inplace(|v| {
        if fill.contains(&v) {
            Float::NAN
        } else {
            v * scale.unwrap_or(1.0) + offset.unwrap_or(0.0)
        }
    });

    data
}

/// Decodes CF time values such as `hours since 1990-01-01 00:00:00`.
fn decode_times(values: &[Float], units: &str) -> Result<Vec<NaiveDateTime>, StorageError> {
    let invalid = || StorageError::TimeUnits(units.to_string());

    let (unit, reference) = units.split_once(" since ").ok_or_else(invalid)?;

    let seconds_per_unit = match unit.trim() {
        "days" | "day" | "d" => 86_400.0,
        "hours" | "hour" | "h" => 3_600.0,
        "minutes" | "minute" | "min" => 60.0,
        "seconds" | "second" | "s" => 1.0,
        _ => return Err(invalid()),
    };

    let reference = parse_datetime(reference.trim().trim_end_matches('Z').trim_end_matches(" UTC"))
        .ok_or_else(invalid)?;

    values
        .iter()
        .map(|&v| {
            Duration::try_milliseconds((v * seconds_per_unit * 1000.0).round() as i64)
                .and_then(|offset| reference.checked_add_signed(offset))
                .ok_or_else(invalid)
        })
        .collect()
}

fn write_coordinate(
    store: &Arc<FilesystemStore>,
    name: &str,
    coord: &Coordinate,
) -> Result<(), StorageError> {
    let len = coord.len() as u64;
    let mut attrs = to_json(&coord.attrs);

    let (data_type, fill_value) = match &coord.values {
        CoordValues::Int(_) => (DataType::Int64, FillValue::from(0_i64)),
        CoordValues::DateTime(_) => {
            attrs.insert("units".to_string(), Value::from(DATETIME_UNITS));
            attrs.insert("calendar".to_string(), Value::from(CALENDAR));
            (DataType::Int64, FillValue::from(0_i64))
        }
        CoordValues::Float(_) => (DataType::Float64, FillValue::from(Float::NAN)),
        CoordValues::Str(_) => (DataType::String, FillValue::new(vec![])),
    };

    let array = ArrayBuilder::new(vec![len], data_type, chunk_grid(&[coord.len()]), fill_value)
        .dimension_names(Some([coord.dim.as_str()]))
        .attributes(attrs)
        .build(store.clone(), &format!("/{}", name))?;
    array.store_metadata()?;

    match &coord.values {
        CoordValues::Int(values) => {
            array.store_array_subset_ndarray(&[0], Array1::from(values.clone()))?
        }
        CoordValues::DateTime(values) => array.store_array_subset_ndarray(
            &[0],
            Array1::from_iter(values.iter().map(|t| t.and_utc().timestamp())),
        )?,
        CoordValues::Float(values) => {
            array.store_array_subset_ndarray(&[0], Array1::from(values.clone()))?
        }
        CoordValues::Str(values) => {
            array.store_array_subset_elements(&array.subset_all(), values)?
        }
    }

    Ok(())
}

fn write_variable(
    store: &Arc<FilesystemStore>,
    name: &str,
    variable: &LabeledArray,
    chunk: &[usize],
) -> Result<(), StorageError> {
    let shape: Vec<u64> = variable.shape().iter().map(|&n| n as u64).collect();

    let mut attrs = to_json(&variable.attrs);
    let aux_names: Vec<&str> = variable
        .coords()
        .iter()
        .filter(|(coord_name, coord)| **coord_name != coord.dim)
        .map(|(coord_name, _)| coord_name.as_str())
        .collect();
    if !aux_names.is_empty() {
        attrs.insert(COORDINATES_ATTR.to_string(), Value::from(aux_names.join(" ")));
    }

    let array = ArrayBuilder::new(
        shape.clone(),
        DataType::Float64,
        chunk_grid(chunk),
        FillValue::from(Float::NAN),
    )
    .dimension_names(Some(variable.dims().iter().map(String::as_str)))
    .attributes(attrs)
    .build(store.clone(), &format!("/{}", name))?;

    array.store_metadata()?;
    array.store_array_subset_ndarray(&vec![0; shape.len()], variable.data().clone())?;

    Ok(())
}

fn chunk_grid(chunk: &[usize]) -> ChunkGrid {
    let shape: Vec<NonZeroU64> = chunk
        .iter()
        .map(|&n| NonZeroU64::new(n as u64).unwrap_or(NonZeroU64::MIN))
        .collect();

    ChunkGrid::new(RegularChunkGrid::new(shape.into()))
}

fn to_json(attrs: &Attributes) -> Map<String, Value> {
    attrs
        .iter()
        .map(|(key, value)| {
            let value = match value {
                AttrValue::Bool(v) => Value::Bool(*v),
                AttrValue::Int(v) => Value::from(*v),
                AttrValue::Float(v) => serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number),
                AttrValue::Str(v) => Value::from(v.as_str()),
            };
            (key.clone(), value)
        })
        .collect()
}

fn from_json(map: &Map<String, Value>) -> Attributes {
    map.iter()
        .filter(|(key, _)| key.as_str() != DIMENSIONS_ATTR)
        .map(|(key, value)| {
            let value = match value {
                Value::Bool(v) => AttrValue::Bool(*v),
                Value::Number(n) => n
                    .as_i64()
                    .map(AttrValue::Int)
                    .or_else(|| n.as_f64().map(AttrValue::Float))
                    .unwrap_or_else(|| AttrValue::Str(n.to_string())),
                Value::String(v) => AttrValue::Str(v.clone()),
                other => AttrValue::Str(other.to_string()),
            };
            (key.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{decode_packed, decode_times, ZarrStorage};
    use crate::prep::dataset::{AttrValue, Attributes, CoordValues, Coordinate, LabeledArray, LabeledDataset};
    use crate::prep::storage::{ChunkShapes, Storage};
    use chrono::NaiveDate;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn cf_time_units() {
        let times = decode_times(&[0.0, 1.5, 24.0], "hours since 1990-01-01 00:00:00").unwrap();
        let start = NaiveDate::from_ymd_opt(1990, 1, 1).unwrap();

        assert_eq!(times[0], start.and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(times[1], start.and_hms_opt(1, 30, 0).unwrap());
        assert_eq!(times[2], NaiveDate::from_ymd_opt(1990, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap());

        assert!(decode_times(&[0.0], "fortnights since 1990-01-01").is_err());
        assert!(decode_times(&[0.0], "days").is_err());
    }

    #[test]
    fn cf_packing_is_decoded() {
        let mut attrs = Attributes::new();
        attrs.insert("scale_factor".to_string(), AttrValue::Float(0.5));
        attrs.insert("add_offset".to_string(), AttrValue::Int(100));
        attrs.insert("_FillValue".to_string(), AttrValue::Int(-1));
        attrs.insert("units".to_string(), AttrValue::from("K"));

        let data = ArrayD::from_shape_vec(IxDyn(&[3]), vec![0.0, 10.0, -1.0]).unwrap();
        let decoded: Vec<f64> = decode_packed(data, &mut attrs).iter().cloned().collect();

        assert_eq!(decoded[..2], [100.0, 105.0]);
        assert!(decoded[2].is_nan());
        assert_eq!(attrs.keys().collect::<Vec<_>>(), vec!["units"]);
    }

    #[test]
    fn written_dataset_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.zarr");

        let time = Coordinate::new(
            "time",
            CoordValues::DateTime(vec![
                NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
                NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(3, 0, 0).unwrap(),
            ]),
        );
        let state = LabeledArray::new(
            ArrayD::from_shape_vec(IxDyn(&[2, 3]), (0..6).map(|v| v as f64).collect()).unwrap(),
            &["time", "grid_index"],
        )
        .unwrap()
        .with_coord("time", time.clone())
        .unwrap()
        .with_coord("grid_index", Coordinate::new("grid_index", CoordValues::range(3)))
        .unwrap()
        .with_attr("units", "K");

        let mut dataset = LabeledDataset::from_arrays(vec![("state".to_string(), state)]).unwrap();
        dataset.attrs.insert("dataset_version".to_string(), AttrValue::from("v1"));

        let mut chunks = ChunkShapes::new();
        chunks.insert("state".to_string(), vec![1, 3]);
        ZarrStorage.write(&dataset, &chunks, &path).unwrap();

        let source = ZarrStorage.open(&path).unwrap();
        assert_eq!(source.attributes().get("dataset_version"), Some(&AttrValue::from("v1")));

        let read = source.variable("state").unwrap();
        assert_eq!(read.dims(), ["time", "grid_index"]);
        assert_eq!(read.data(), dataset.get("state").unwrap().data());
        assert_eq!(read.coord("time").unwrap().values, time.values);
        assert_eq!(read.attrs.get("units"), Some(&AttrValue::from("K")));
    }
}
