use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use std::fmt;
use std::str::FromStr;

/// Identifier of one prediction period, parsed from names like `2018_4`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodKey {
    pub year: i32,
    pub month: u32,
}

impl PeriodKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_{}", self.year, self.month)
    }
}

impl FromStr for PeriodKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('_')
            .ok_or_else(|| format!("period key {:?} is not of the form <year>_<month>", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid year in period key {:?}", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month in period key {:?}", s))?;
        PeriodKey::new(year, month)
            .ok_or_else(|| format!("month out of range in period key {:?}", s))
    }
}

/// 12-slot indicator with a one at `month - 1`
pub fn month_onehot(month: u32) -> [f32; 12] {
    let mut onehot = [0.0; 12];
    if (1..=12).contains(&month) {
        onehot[(month - 1) as usize] = 1.0;
    }
    onehot
}

/// Unit of a CF `"<unit> since <reference>"` time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn seconds(&self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3_600.0,
            TimeUnit::Days => 86_400.0,
        }
    }
}

/// Parse a CF time `units` attribute such as `"days since 1900-01-01 00:00:00"`
pub fn parse_cf_time_units(units: &str) -> Result<(TimeUnit, NaiveDateTime), String> {
    let (unit, reference) = units
        .split_once(" since ")
        .ok_or_else(|| format!("time units {:?} lack a 'since' clause", units))?;

    let unit = match unit.trim().to_ascii_lowercase().as_str() {
        "second" | "seconds" | "s" | "sec" | "secs" => TimeUnit::Seconds,
        "minute" | "minutes" | "min" | "mins" => TimeUnit::Minutes,
        "hour" | "hours" | "h" | "hr" | "hrs" => TimeUnit::Hours,
        "day" | "days" | "d" => TimeUnit::Days,
        other => return Err(format!("unsupported time unit {:?}", other)),
    };

    Ok((unit, parse_reference_time(reference.trim())?))
}

fn parse_reference_time(reference: &str) -> Result<NaiveDateTime, String> {
    // Drop a trailing UTC offset / zone marker, CF files are read as naive UTC
    let reference = reference
        .trim_end_matches('Z')
        .trim_end_matches(" UTC")
        .trim_end_matches(" +00:00");

    for format in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(reference, format) {
            return Ok(datetime);
        }
    }

    NaiveDate::parse_from_str(reference, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("unparseable reference time {:?}", reference))
}

/// Decode raw offsets of a CF time axis into timestamps.
///
/// Only the Gregorian family of calendars is supported; `calendar = None`
/// means the CF default (`standard`).
pub fn decode_cf_times(
    offsets: &[f64],
    units: &str,
    calendar: Option<&str>,
) -> Result<Vec<NaiveDateTime>, String> {
    match calendar.map(|c| c.to_ascii_lowercase()) {
        None => {}
        Some(c) if matches!(c.as_str(), "standard" | "gregorian" | "proleptic_gregorian") => {}
        Some(c) => return Err(format!("unsupported calendar {:?}", c)),
    }

    let (unit, reference) = parse_cf_time_units(units)?;
    offsets
        .iter()
        .map(|offset| {
            if !offset.is_finite() {
                return Err(format!("non-finite time offset {}", offset));
            }
            let millis = (offset * unit.seconds() * 1_000.0).round();
            if !(i64::MIN as f64..i64::MAX as f64).contains(&millis) {
                return Err(format!("time offset {} overflows", offset));
            }
            Duration::try_milliseconds(millis as i64)
                .and_then(|delta| reference.checked_add_signed(delta))
                .ok_or_else(|| format!("time offset {} overflows", offset))
        })
        .collect()
}

/// Calendar month (1-12) of a timestamp
pub fn month_of(datetime: &NaiveDateTime) -> u32 {
    datetime.month()
}
