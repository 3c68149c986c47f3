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

//! Cyclic encodings of time components.

use super::{cyclic_component, datetime_of, DerivedArgs};
use crate::constants::{DAYS_IN_YEAR, HOURS_IN_DAY};
use crate::errors::DeriveError;
use crate::prep::dataset::LabeledArray;
use crate::Float;
use chrono::{Datelike, Timelike};
use std::f64::consts::PI;

/// Sine or cosine of the hour of day, over a 24 hour period.
pub fn hour_of_day(args: &DerivedArgs) -> Result<LabeledArray, DeriveError> {
    let encode = cyclic_component(args)?;
    let component = args.literal_str("component")?;
    let time = args.times("time")?;

    let encoded = LabeledArray::broadcast_map(&[time], |v| match datetime_of(v[0]) {
        Some(dt) => encode(dt.hour() as Float / HOURS_IN_DAY * 2.0 * PI),
        None => Float::NAN,
    })?;

    Ok(encoded.with_attr("units", "1").with_attr(
        "long_name",
        format!("{} component of cyclically encoded hour of day", capitalize(component)),
    ))
}

/// Sine or cosine of the day of year, over 366 days
/// so that leap years stay within one period.
pub fn day_of_year(args: &DerivedArgs) -> Result<LabeledArray, DeriveError> {
    let encode = cyclic_component(args)?;
    let component = args.literal_str("component")?;
    let time = args.times("time")?;

    let encoded = LabeledArray::broadcast_map(&[time], |v| match datetime_of(v[0]) {
        Some(dt) => encode(dt.ordinal() as Float / DAYS_IN_YEAR * 2.0 * PI),
        None => Float::NAN,
    })?;

    Ok(encoded.with_attr("units", "1").with_attr(
        "long_name",
        format!("{} component of cyclically encoded day of year", capitalize(component)),
    ))
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
