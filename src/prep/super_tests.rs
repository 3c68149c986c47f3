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

//! This is a module for integration tests of the pipeline,
//! but with access to private fields and methods.
//!
//! Every step reads its input through a [`Storage`], so instead of
//! writing source datasets to disk for each test the pipeline is run
//! over datasets kept in memory.

use super::configuration::Config;
use super::dataset::{AttrValue, CoordValues, Coordinate, LabeledArray, LabeledDataset};
use super::loading::DatasetSource;
use super::recreate::recreate_inputs;
use super::storage::{ChunkShapes, Storage};
use super::{create_dataset, prepare_output_path, Core};
use crate::constants::DATETIME_UNITS;
use crate::errors::{InputError, LoadError, PrepError, ProjectionError, StorageError};
use chrono::{NaiveDate, NaiveDateTime};
use float_cmp::approx_eq;
use ndarray::{ArrayD, IxDyn};
use rustc_hash::FxHashMap;
use std::{
    cell::RefCell,
    io,
    path::{Path, PathBuf},
};

#[derive(Default)]
struct MemoryStorage {
    datasets: FxHashMap<PathBuf, LabeledDataset>,
    written: RefCell<FxHashMap<PathBuf, LabeledDataset>>,
}

impl Storage for MemoryStorage {
    fn open(&self, path: &Path) -> Result<Box<dyn DatasetSource>, StorageError> {
        match self.datasets.get(path) {
            Some(dataset) => Ok(Box::new(dataset.clone())),
            None => Err(StorageError::Io(
                path.display().to_string(),
                io::Error::from(io::ErrorKind::NotFound),
            )),
        }
    }

    fn write(
        &self,
        dataset: &LabeledDataset,
        _chunks: &ChunkShapes,
        path: &Path,
    ) -> Result<(), StorageError> {
        self.written
            .borrow_mut()
            .insert(path.to_path_buf(), dataset.clone());
        Ok(())
    }
}

const CONFIG: &str = r#"
schema_version: v0.5.0
dataset_version: v0.3.0

output:
  variables:
    state: [time, grid_index, state_feature]
    static: [grid_index, static_feature]
    forcing: [time, grid_index, forcing_feature]
  coord_ranges:
    time:
      start: 2020-01-01T03:00
      end: 2020-01-01T09:00
      step: PT3H
  chunking:
    time: 2
  splitting:
    dim: time
    splits:
      train:
        start: 2020-01-01T03:00
        end: 2020-01-01T06:00
        compute_statistics:
          ops: [mean, diff_mean]
          dims: [grid_index, time]
      val:
        start: 2020-01-01T06:00
        end: 2020-01-01T09:00

inputs:
  height_levels:
    path: height_levels.zarr
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
    attributes:
      source: reanalysis

  static_fields:
    path: static.zarr
    dims: [x, y]
    variables: [lsm]
    dim_mapping:
      grid_index:
        method: stack
        dims: [x, y]
      static_feature:
        method: stack_variables_by_var_name
        name_format: "{var_name}"
    target_output_variable: static

  forcings:
    path: height_levels.zarr
    dims: [time, x, y]
    derived_variables:
      toa_radiation:
        function: toa_radiation
        kwargs:
          lat: ds_input.lat
          lon: ds_input.lon
          time: ds_input.time
      hour_sin:
        function: hour_of_day
        kwargs:
          time: ds_input.time
          component: sin
    dim_mapping:
      time:
        method: rename
        dim: time
      grid_index:
        method: stack
        dims: [x, y]
      forcing_feature:
        method: stack_variables_by_var_name
        name_format: "{var_name}"
    target_output_variable: forcing
"#;

fn datetime(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn on_grid(array: LabeledArray) -> LabeledArray {
    array
        .with_coord("x", Coordinate::new("x", CoordValues::Int(vec![0, 1])))
        .unwrap()
        .with_coord("y", Coordinate::new("y", CoordValues::Int(vec![0, 1, 2])))
        .unwrap()
}

/// Wind at two altitudes over four 3-hourly times on a 2x3 grid.
/// At 100 m `u` equals the time index plus one and `v` is constant.
fn height_levels() -> LabeledDataset {
    let times = Coordinate::new("time", CoordValues::DateTime((0..4).map(|t| datetime(3 * t)).collect()));
    let altitude = Coordinate::new("altitude", CoordValues::Int(vec![50, 100])).with_attr("units", "m");

    let wind = |f: fn(usize) -> f64| {
        let data = ArrayD::from_shape_fn(IxDyn(&[4, 2, 3, 2]), |ix| {
            if ix[3] == 1 {
                f(ix[0])
            } else {
                -999.0
            }
        });

        on_grid(LabeledArray::new(data, &["time", "x", "y", "altitude"]).unwrap())
            .with_coord("time", times.clone())
            .unwrap()
            .with_coord("altitude", altitude.clone())
            .unwrap()
            .with_attr("units", "m/s")
    };

    let surface = |value: f64| on_grid(LabeledArray::new(ArrayD::from_elem(IxDyn(&[2, 3]), value), &["x", "y"]).unwrap());

    let mut dataset = LabeledDataset::from_arrays(vec![
        ("u".to_string(), wind(|t| t as f64 + 1.0)),
        ("v".to_string(), wind(|_| 2.0)),
        ("lat".to_string(), surface(55.0)),
        ("lon".to_string(), surface(10.0)),
    ])
    .unwrap();
    dataset.attrs.insert("source".to_string(), AttrValue::from("reanalysis"));

    dataset
}

fn static_fields() -> LabeledDataset {
    let lsm = on_grid(
        LabeledArray::new(
            ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0]).unwrap(),
            &["x", "y"],
        )
        .unwrap(),
    );

    LabeledDataset::from_arrays(vec![("lsm".to_string(), lsm)]).unwrap()
}

fn storage() -> MemoryStorage {
    let mut storage = MemoryStorage::default();
    storage
        .datasets
        .insert(PathBuf::from("height_levels.zarr"), height_levels());
    storage
        .datasets
        .insert(PathBuf::from("static.zarr"), static_fields());
    storage
}

fn core(config: &str) -> Core {
    Core::from_config(Config::new_from_slice(config.as_bytes()).unwrap()).unwrap()
}

fn values(array: &LabeledArray) -> Vec<f64> {
    array.data().iter().cloned().collect()
}

#[test]
fn targets_are_assembled_in_one_coordinate_space() {
    let prepared = create_dataset(&core(CONFIG), &storage()).unwrap();
    let dataset = &prepared.dataset;

    let state = dataset.get("state").unwrap();
    assert_eq!(state.dims(), ["time", "grid_index", "state_feature"]);
    assert_eq!(state.shape(), [3, 6, 2]);
    assert_eq!(
        state.coord("state_feature").unwrap().values,
        CoordValues::Str(vec!["u100m".to_string(), "v100m".to_string()])
    );
    assert_eq!(
        state.coord("time").unwrap().values,
        CoordValues::DateTime(vec![datetime(3), datetime(6), datetime(9)])
    );
    assert_eq!(state.data()[IxDyn(&[0, 4, 0])], 2.0);
    assert_eq!(state.data()[IxDyn(&[2, 4, 1])], 2.0);

    assert_eq!(
        state.coord("state_feature_units").unwrap().values,
        CoordValues::Str(vec!["m/s".to_string(), "m/s".to_string()])
    );
    assert_eq!(
        state.coord("state_feature_source_dataset").unwrap().values,
        CoordValues::Str(vec!["height_levels".to_string(), "height_levels".to_string()])
    );

    let static_field = dataset.get("static").unwrap();
    assert_eq!(static_field.dims(), ["grid_index", "static_feature"]);
    assert_eq!(values(static_field), vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);

    let forcing = dataset.get("forcing").unwrap();
    assert_eq!(forcing.dims(), ["time", "grid_index", "forcing_feature"]);
    assert_eq!(
        forcing.coord("forcing_feature").unwrap().values,
        CoordValues::Str(vec!["toa_radiation".to_string(), "hour_sin".to_string()])
    );
    // 06 UTC hour angle, sin(2 * pi * 6 / 24)
    assert!(approx_eq!(f64, forcing.data()[IxDyn(&[1, 0, 1])], 1.0, epsilon = 1e-12));

    // every target shares the stacked grid labels
    assert_eq!(
        state.coord("grid_index").unwrap().values,
        forcing.coord("grid_index").unwrap().values
    );
    assert_eq!(
        static_field.coord("y").unwrap().values,
        CoordValues::Int(vec![0, 1, 2, 0, 1, 2])
    );
}

#[test]
fn statistics_and_splits_are_added() {
    let prepared = create_dataset(&core(CONFIG), &storage()).unwrap();
    let dataset = &prepared.dataset;

    let mean = dataset.get("state__train__mean").unwrap();
    assert_eq!(mean.dims(), ["state_feature"]);
    assert_eq!(values(mean), vec![2.5, 2.0]);

    let diff_mean = dataset.get("state__train__diff_mean").unwrap();
    assert_eq!(values(diff_mean), vec![1.0, 0.0]);

    let static_mean = dataset.get("static__train__mean").unwrap();
    assert!(approx_eq!(f64, values(static_mean)[0], 4.0 / 6.0, ulps = 4));
    assert!(dataset.get("static__train__diff_mean").is_none());
    assert!(dataset.get("forcing__train__mean").is_some());
    assert!(dataset.get("state__val__mean").is_none());

    let splits = dataset.get("splits").unwrap();
    assert_eq!(splits.dims(), ["split_name", "split_part"]);
    assert_eq!(
        splits.coord("split_name").unwrap().values,
        CoordValues::Str(vec!["train".to_string(), "val".to_string()])
    );
    assert_eq!(splits.attrs.get("units"), Some(&AttrValue::from(DATETIME_UNITS)));
    assert_eq!(
        values(splits),
        [3, 6, 6, 9]
            .iter()
            .map(|&h| datetime(h).and_utc().timestamp() as f64)
            .collect::<Vec<f64>>()
    );
}

#[test]
fn output_attributes_and_chunks() {
    let storage = storage();
    let prepared = create_dataset(&core(CONFIG), &storage).unwrap();

    let attrs = &prepared.dataset.attrs;
    assert_eq!(attrs.get("dataset_version"), Some(&AttrValue::from("v0.3.0")));
    assert_eq!(attrs.get("schema_version"), Some(&AttrValue::from("v0.5.0")));
    assert_eq!(attrs.get("created_with"), Some(&AttrValue::from("gridprep")));
    assert!(attrs.contains_key("created_on"));
    assert!(attrs.get("source").is_none());

    assert_eq!(prepared.chunks["state"], vec![2, 6, 2]);
    assert_eq!(prepared.chunks["static"], vec![6, 1]);
    assert_eq!(prepared.chunks["splits"], vec![2, 2]);

    let path = Path::new("out.zarr");
    storage.write(&prepared.dataset, &prepared.chunks, path).unwrap();
    assert_eq!(storage.written.borrow()[path], prepared.dataset);
}

const TOA_RADIATION: &str = "      toa_radiation:
        function: toa_radiation
        kwargs:
          lat: ds_input.lat
          lon: ds_input.lon
          time: ds_input.time
";

const HOUR_SIN: &str = "      hour_sin:
        function: hour_of_day
        kwargs:
          time: ds_input.time
          component: sin
";

#[test]
fn derived_variables_do_not_depend_on_declaration_order() {
    let declared = format!("{}{}", TOA_RADIATION, HOUR_SIN);
    assert!(CONFIG.contains(&declared));
    let config = CONFIG.replace(&declared, &format!("{}{}", HOUR_SIN, TOA_RADIATION));

    let reference = create_dataset(&core(CONFIG), &storage()).unwrap();
    let swapped = create_dataset(&core(&config), &storage()).unwrap();

    let reference = reference.dataset.get("forcing").unwrap();
    let forcing = swapped.dataset.get("forcing").unwrap();

    assert_eq!(forcing.dims(), ["time", "grid_index", "forcing_feature"]);
    assert_eq!(forcing.shape(), [3, 6, 2]);
    assert_eq!(
        forcing.coord("forcing_feature").unwrap().values,
        CoordValues::Str(vec!["hour_sin".to_string(), "toa_radiation".to_string()])
    );

    for t in 0..3 {
        for g in 0..6 {
            assert_eq!(forcing.data()[IxDyn(&[t, g, 0])], reference.data()[IxDyn(&[t, g, 1])]);
            assert_eq!(forcing.data()[IxDyn(&[t, g, 1])], reference.data()[IxDyn(&[t, g, 0])]);
        }
    }
}

const STATIC_PROJECTION: &str = "    projections:
      lambert:
        dims: [x, y]
        attributes:
          grid_mapping_name: lambert_conformal_conic
          standard_parallel: 56.7
    target_output_variable: static";

/// Height levels whose wind refers to a Lambert projection variable.
fn projected_height_levels(parallel: f64) -> LabeledDataset {
    let mut dataset = height_levels();

    for name in ["u", "v"] {
        let array = dataset.get(name).unwrap().clone().with_attr("grid_mapping", "lambert");
        dataset.insert(name, array).unwrap();
    }

    let lambert = LabeledArray::new(ArrayD::zeros(IxDyn(&[])), &[] as &[&str])
        .unwrap()
        .with_attr("grid_mapping_name", "lambert_conformal_conic")
        .with_attr("standard_parallel", parallel);
    dataset.insert("lambert", lambert).unwrap();

    dataset
}

#[test]
fn shared_projection_is_written_once() {
    let config = CONFIG.replace("    target_output_variable: static", STATIC_PROJECTION);

    let prepared = create_dataset(&core(&config), &storage()).unwrap();
    let dataset = &prepared.dataset;

    let crs = dataset.get("crs").unwrap();
    assert!(crs.dims().is_empty());
    assert_eq!(
        crs.attrs.get("grid_mapping_name"),
        Some(&AttrValue::from("lambert_conformal_conic"))
    );
    assert_eq!(
        dataset.get("static").unwrap().attrs.get("grid_mapping"),
        Some(&AttrValue::from("crs"))
    );
    assert!(dataset.get("state").unwrap().attrs.get("grid_mapping").is_none());
    assert!(dataset.get("crs__train__mean").is_none());

    let mut storage = storage();
    storage
        .datasets
        .insert(PathBuf::from("height_levels.zarr"), projected_height_levels(56.7));

    let prepared = create_dataset(&core(&config), &storage).unwrap();
    assert_eq!(
        prepared.dataset.get("state").unwrap().attrs.get("grid_mapping"),
        Some(&AttrValue::from("crs"))
    );

    storage
        .datasets
        .insert(PathBuf::from("height_levels.zarr"), projected_height_levels(63.3));

    assert!(matches!(
        create_dataset(&core(&config), &storage),
        Err(PrepError::Projection(ProjectionError::Inconsistent { key, .. })) if key == "standard_parallel"
    ));
}

#[test]
fn inputs_are_recreated_from_prepared_dataset() {
    let core = core(CONFIG);
    let prepared = create_dataset(&core, &storage()).unwrap();
    let inputs = recreate_inputs(&prepared.dataset, &core.config).unwrap();

    let source = height_levels();
    let recreated = &inputs["height_levels"];
    assert_eq!(recreated.names(), vec!["u", "v"]);

    for name in ["u", "v"] {
        let original = source
            .get(name)
            .unwrap()
            .isel("time", &[1, 2, 3])
            .unwrap()
            .isel("altitude", &[1])
            .unwrap();
        let variable = recreated.get(name).unwrap();

        assert_eq!(variable.dims(), ["time", "x", "y", "altitude"]);
        assert_eq!(variable.data(), original.data());
        for coord in ["time", "x", "y"] {
            assert_eq!(
                variable.coord(coord).unwrap().values,
                original.coord(coord).unwrap().values
            );
        }
        assert_eq!(variable.coord("altitude").unwrap().values, CoordValues::Int(vec![100]));
        assert_eq!(variable.attrs.get("units"), Some(&AttrValue::from("m/s")));
    }

    assert_eq!(inputs["static_fields"].get("lsm"), static_fields().get("lsm"));
    assert!(inputs["forcings"].is_empty());
}

#[test]
fn shared_target_is_split_by_source_dataset() {
    let config = CONFIG
        .replace("    forcing: [time, grid_index, forcing_feature]\n", "")
        .replace("forcing_feature", "state_feature")
        .replace("target_output_variable: forcing", "target_output_variable: state");

    let core = core(&config);
    let prepared = create_dataset(&core, &storage()).unwrap();

    let state = prepared.dataset.get("state").unwrap();
    assert_eq!(
        state.coord("state_feature").unwrap().values,
        CoordValues::Str(
            ["u100m", "v100m", "toa_radiation", "hour_sin"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        )
    );

    let inputs = recreate_inputs(&prepared.dataset, &core.config).unwrap();
    assert_eq!(inputs["height_levels"].names(), vec!["u", "v"]);
    assert!(inputs["forcings"].is_empty());
}

#[test]
fn input_failures_name_the_input() {
    let config = CONFIG.replace("      v:\n", "      w:\n");

    match create_dataset(&core(&config), &storage()) {
        Err(PrepError::Input {
            dataset,
            target,
            source: InputError::Load(LoadError::MissingVariable(var)),
        }) => {
            assert_eq!(dataset, "height_levels");
            assert_eq!(target, "state");
            assert_eq!(var, "w");
        }
        other => panic!("unexpected result {:?}", other.map(|p| p.dataset.names())),
    }

    let config = CONFIG.replace("source: reanalysis", "source: forecast");
    assert!(matches!(
        create_dataset(&core(&config), &storage()),
        Err(PrepError::Input {
            source: InputError::Load(LoadError::AttributeMismatch { .. }),
            ..
        })
    ));

    let config = CONFIG.replace("path: static.zarr", "path: missing.zarr");
    assert!(matches!(
        create_dataset(&core(&config), &storage()),
        Err(PrepError::Input {
            source: InputError::Storage(StorageError::Io(..)),
            ..
        })
    ));
}

#[test]
fn shared_feature_dim_names_fail_to_merge() {
    let config = CONFIG
        .replace("static_feature", "feature")
        .replace("state_feature", "feature");

    assert!(matches!(
        create_dataset(&core(&config), &storage()),
        Err(PrepError::Merge(_))
    ));
}

#[test]
fn existing_output_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("dataset.zarr");

    std::fs::create_dir_all(output.join("state")).unwrap();
    std::fs::write(output.join("state").join("zarr.json"), "{}").unwrap();

    prepare_output_path(&output).unwrap();
    assert!(!output.exists());

    prepare_output_path(&output).unwrap();
}

#[cfg(feature = "zarr")]
#[test]
fn prepared_dataset_round_trips_through_zarr() {
    use super::storage::ZarrStorage;

    let prepared = create_dataset(&core(CONFIG), &storage()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("dataset.zarr");
    ZarrStorage
        .write(&prepared.dataset, &prepared.chunks, &output)
        .unwrap();

    let reopened = ZarrStorage.open(&output).unwrap();
    let state = reopened.variable("state").unwrap();

    assert_eq!(state.dims(), ["time", "grid_index", "state_feature"]);
    assert_eq!(state.data(), prepared.dataset.get("state").unwrap().data());
    assert_eq!(
        reopened.coordinate("time").unwrap().values,
        CoordValues::DateTime(vec![datetime(3), datetime(6), datetime(9)])
    );
    assert_eq!(
        reopened.attributes().get("dataset_version"),
        Some(&AttrValue::from("v0.3.0"))
    );
}
