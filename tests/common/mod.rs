#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use gridseq::{Experiment, GridDataset, MemoryReader, Mode};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};

pub fn month(year: i32, month: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Consecutive monthly timestamps ending at `last`
pub fn months_until(last: NaiveDateTime, count: usize) -> Vec<NaiveDateTime> {
    let mut times = Vec::with_capacity(count);
    let mut date = last.date();
    for _ in 0..count {
        times.push(date.and_hms_opt(0, 0, 0).unwrap());
        date = date.checked_sub_months(chrono::Months::new(1)).unwrap();
    }
    times.reverse();
    times
}

/// Random uniform values in `[0, 100)` on a regular grid
pub fn random_variable(times: usize, size: (usize, usize), seed: u64) -> Array3<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array3::from_shape_fn((times, size.0, size.1), |_| rng.random_range(0.0..100.0))
}

pub fn axes(size: (usize, usize)) -> (Vec<f64>, Vec<f64>) {
    let lats = (0..size.0).map(|i| -5.0 + i as f64).collect();
    let lons = (0..size.1).map(|j| 33.0 + j as f64).collect();
    (lats, lons)
}

/// Input and target datasets predicting `VHI` at `target`.
///
/// Forecast inputs stop one month before the target; nowcast inputs
/// include the target month.
pub fn make_period(
    experiment: Experiment,
    target: NaiveDateTime,
    size: (usize, usize),
    covariates: &[&str],
    seed: u64,
) -> (GridDataset, GridDataset) {
    let history = 6;
    let times = match experiment {
        Experiment::Nowcast => months_until(target, history + 1),
        Experiment::Forecast => {
            let mut times = months_until(target, history + 1);
            times.pop();
            times
        }
    };
    let nt = times.len();
    let (lats, lons) = axes(size);

    let mut input = GridDataset::new(times, lats.clone(), lons.clone())
        .with_variable("VHI", random_variable(nt, size, seed))
        .unwrap();
    for (k, name) in covariates.iter().enumerate() {
        input
            .insert_variable(*name, random_variable(nt, size, seed + 1 + k as u64))
            .unwrap();
    }

    let target_ds = GridDataset::new(vec![target], lats, lons)
        .with_variable("VHI", random_variable(1, size, seed + 100))
        .unwrap();
    (input, target_ds)
}

/// Create `<root>/<experiment>/<mode>/<name>/{x,y}.nc` placeholders
pub fn make_source_dirs(
    root: &Path,
    experiment: Experiment,
    mode: Mode,
    names: &[String],
) -> Vec<PathBuf> {
    let partition = root.join(experiment.dir_name()).join(mode.dir_name());
    names
        .iter()
        .map(|name| {
            let dir = partition.join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::File::create(dir.join("x.nc")).unwrap();
            fs::File::create(dir.join("y.nc")).unwrap();
            dir
        })
        .collect()
}

/// Monthly sources `<year>_<m>` for `m` in `months`, registered in a reader
pub fn monthly_fixture(
    root: &Path,
    experiment: Experiment,
    months: &[u32],
    size: (usize, usize),
    covariates: &[&str],
) -> (MemoryReader, Vec<PathBuf>) {
    let names: Vec<String> = months.iter().map(|m| format!("2018_{}", m)).collect();
    let dirs = make_source_dirs(root, experiment, Mode::Train, &names);

    let mut reader = MemoryReader::new();
    for (dir, m) in dirs.iter().zip(months) {
        let (input, target) = make_period(experiment, month(2018, *m), size, covariates, *m as u64);
        reader.insert(dir.clone(), input, target);
    }
    (reader, dirs)
}
