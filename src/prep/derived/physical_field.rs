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

//! Fields derived from coordinates or other physical fields.

use super::{datetime_of, DerivedArgs};
use crate::constants::{EARTH_OBLIQUITY, SOLAR_CONSTANT};
use crate::errors::DeriveError;
use crate::prep::dataset::LabeledArray;
use crate::Float;
use chrono::{Datelike, Timelike};
use log::warn;
use std::cell::Cell;
use std::f64::consts::PI;

/// Top-of-atmosphere incoming solar radiation.
///
/// Uses the declination and hour angle approximations from
/// Duffie and Beckman (Solar Engineering of Thermal Processes),
/// with night-time values clipped to zero.
pub fn toa_radiation(args: &DerivedArgs) -> Result<LabeledArray, DeriveError> {
    let lat = args.array("lat")?;
    let lon = args.array("lon")?;
    let time = args.times("time")?;

    let radiation = LabeledArray::broadcast_map(&[lat, lon, time], |v| {
        let (lat, lon) = (v[0], v[1]);
        let dt = match datetime_of(v[2]) {
            Some(dt) => dt,
            None => return Float::NAN,
        };

        let day = dt.ordinal() as Float;
        let hour = dt.hour() as Float;

        let dec = PI / 180.0 * EARTH_OBLIQUITY * (2.0 * PI * (284.0 + day) / 365.0).sin();
        let hour_angle = 15.0 * (hour + lon / 15.0 - 12.0);

        let lat = lat.to_radians();
        let cos_sza =
            lat.sin() * dec.sin() + lat.cos() * dec.cos() * hour_angle.to_radians().cos();

        (SOLAR_CONSTANT * cos_sza).max(0.0)
    })?;

    Ok(radiation
        .with_attr("units", "W*m**-2")
        .with_attr("long_name", "top-of-atmosphere incoming radiation"))
}

/// Virtual temperature from temperature (K) and specific humidity (kg/kg).
///
/// Points outside the validity range of the formula are set to NaN.
pub fn virtual_temperature(args: &DerivedArgs) -> Result<LabeledArray, DeriveError> {
    let temperature = args.array("temperature")?;
    let specific_humidity = args.array("specific_humidity")?;

    let invalid = Cell::new(0_usize);
    let tv = LabeledArray::broadcast_map(&[temperature, specific_humidity], |v| {
        floccus::virtual_temperature::general3(v[0], v[1]).unwrap_or_else(|_| {
            invalid.set(invalid.get() + 1);
            Float::NAN
        })
    })?;

    if invalid.get() > 0 {
        warn!(
            "Virtual temperature is undefined at {} point(s), set to NaN",
            invalid.get()
        );
    }

    Ok(tv
        .with_attr("units", "K")
        .with_attr("long_name", "virtual temperature"))
}

#[cfg(test)]
mod tests {
    use super::{toa_radiation, virtual_temperature};
    use crate::prep::dataset::{AttrValue, CoordValues, Coordinate, LabeledArray, LabeledDataset};
    use crate::prep::derived::DerivedArgs;
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use ndarray::{ArrayD, IxDyn};

    fn kwargs(pairs: &[(&str, &str)]) -> IndexMap<String, AttrValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), AttrValue::from(*v)))
            .collect()
    }

    #[test]
    fn radiation_is_zero_at_night_and_positive_at_noon() {
        let times = vec![
            NaiveDate::from_ymd_opt(2020, 6, 21).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            NaiveDate::from_ymd_opt(2020, 6, 21).unwrap().and_hms_opt(12, 0, 0).unwrap(),
        ];

        let grid = |values: Vec<f64>| {
            LabeledArray::new(ArrayD::from_shape_vec(IxDyn(&[2]), values).unwrap(), &["grid_index"])
                .unwrap()
        };

        let time = LabeledArray::new(ArrayD::zeros(IxDyn(&[2])), &["time"])
            .unwrap()
            .with_coord("time", Coordinate::new("time", CoordValues::DateTime(times)))
            .unwrap();

        let source = LabeledDataset::from_arrays(vec![
            ("lat".to_string(), grid(vec![55.0, 0.0])),
            ("lon".to_string(), grid(vec![0.0, 0.0])),
            ("t".to_string(), time),
        ])
        .unwrap();

        let args = DerivedArgs::resolve(
            "toa_radiation",
            &kwargs(&[("lat", "ds_input.lat"), ("lon", "ds_input.lon"), ("time", "ds_input.time")]),
            &source,
        )
        .unwrap();

        let toa = toa_radiation(&args).unwrap();
        assert_eq!(toa.dims(), ["grid_index", "time"]);

        let at = |g: usize, t: usize| toa.data()[IxDyn(&[g, t])];
        assert_eq!(at(0, 0), 0.0);
        assert_eq!(at(1, 0), 0.0);
        assert!(at(0, 1) > 1000.0);
        assert!(at(1, 1) > 1000.0 && at(1, 1) <= 1366.0);
        assert_eq!(toa.attrs.get("units"), Some(&AttrValue::from("W*m**-2")));
    }

    #[test]
    fn virtual_temperature_exceeds_temperature() {
        let field = |values: Vec<f64>| {
            LabeledArray::new(ArrayD::from_shape_vec(IxDyn(&[2]), values).unwrap(), &["x"]).unwrap()
        };

        let source = LabeledDataset::from_arrays(vec![
            ("t".to_string(), field(vec![290.0, 300.0])),
            ("q".to_string(), field(vec![0.01, 0.002])),
        ])
        .unwrap();

        let args = DerivedArgs::resolve(
            "virtual_temperature",
            &kwargs(&[("temperature", "ds_input.t"), ("specific_humidity", "ds_input.q")]),
            &source,
        )
        .unwrap();

        let tv = virtual_temperature(&args).unwrap();
        let values: Vec<f64> = tv.data().iter().cloned().collect();

        assert!(values[0] > 290.0 && values[0] < 293.0);
        assert!(values[1] > 300.0 && values[1] < values[0] + 10.0);
        assert_eq!(tv.attrs.get("units"), Some(&AttrValue::from("K")));
    }
}
