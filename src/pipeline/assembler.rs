//! Conversion of one per-period source into a flat, per-pixel training example.

use super::neighbors;
use crate::config::{Experiment, LoaderConfig};
use crate::error::{PipelineError, Result};
use crate::io::{GridDataset, PeriodData, SourceReader};
use crate::time_utils::{month_of, month_onehot};
use chrono::NaiveDateTime;
use ndarray::{Array1, Array2, Array3, Axis};
use std::path::Path;
use tracing::debug;

/// Assembled arrays of one prediction period.
///
/// Row `p` of every per-pixel array refers to the same grid cell; cells are
/// flattened latitude-major, longitude-minor.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainExample {
    /// `[pixels, time_steps, variables]`, ascending time, target timestep excluded
    pub historical: Array3<f32>,
    /// Column names of the last axis of `historical`
    pub historical_variables: Vec<String>,
    /// `[pixels, covariates]`, present for nowcast only
    pub current: Option<Array2<f32>>,
    /// Column names of `current`
    pub current_variables: Vec<String>,
    /// `[pixels]`
    pub target: Array1<f32>,
    /// `[pixels, 2]` as `(lat, lon)`, present when requested
    pub latlons: Option<Array2<f64>>,
    /// Length-12 indicator of the predicted calendar month
    pub pred_month_onehot: Array1<f32>,
    pub target_time: NaiveDateTime,
    pub target_variable: String,
}

impl TrainExample {
    pub fn num_pixels(&self) -> usize {
        self.target.len()
    }

    pub fn num_timesteps(&self) -> usize {
        self.historical.dim().1
    }
}

/// Builds [`TrainExample`]s from the sources served by a [`SourceReader`]
#[derive(Debug, Clone)]
pub struct ExampleAssembler<R> {
    reader: R,
    experiment: Experiment,
    target_variable: Option<String>,
    clear_nans: bool,
}

impl<R: SourceReader> ExampleAssembler<R> {
    pub fn new(reader: R, experiment: Experiment) -> Self {
        Self {
            reader,
            experiment,
            target_variable: None,
            clear_nans: false,
        }
    }

    pub fn from_config(reader: R, config: &LoaderConfig) -> Self {
        Self {
            reader,
            experiment: config.experiment,
            target_variable: config.target_variable.clone(),
            clear_nans: config.clear_nans,
        }
    }

    /// Predict `name` instead of inferring the target from the target dataset
    pub fn with_target_variable(mut self, name: impl Into<String>) -> Self {
        self.target_variable = Some(name.into());
        self
    }

    /// Drop pixels with any missing historical or current value
    pub fn with_clear_nans(mut self, clear_nans: bool) -> Self {
        self.clear_nans = clear_nans;
        self
    }

    /// Read `source` and assemble it
    pub fn assemble(
        &self,
        source: &Path,
        surrounding_pixels: Option<usize>,
        return_latlons: bool,
    ) -> Result<TrainExample> {
        let period = self.reader.read_period(source)?;
        let example = self.assemble_period(&period, surrounding_pixels, return_latlons)?;
        debug!(
            source = %source.display(),
            pixels = example.num_pixels(),
            timesteps = example.num_timesteps(),
            "assembled source"
        );
        Ok(example)
    }

    /// Assemble already-read datasets
    pub fn assemble_period(
        &self,
        period: &PeriodData,
        surrounding_pixels: Option<usize>,
        return_latlons: bool,
    ) -> Result<TrainExample> {
        let target_ds = &period.target;
        period.input.check_same_grid(target_ds)?;

        if target_ds.times().len() != 1 {
            return Err(PipelineError::DataAlignment(format!(
                "target dataset must hold exactly one timestep, found {}",
                target_ds.times().len()
            )));
        }
        let target_time = target_ds.times()[0];
        let target_name = self.resolve_target(target_ds)?;
        let target_grid = target_ds
            .slice_at(&target_name, 0)
            .ok_or_else(|| PipelineError::MissingVariable(target_name.clone()))?;

        let expanded;
        let input = match surrounding_pixels.filter(|r| *r > 0) {
            Some(radius) => {
                expanded = neighbors::expand(&period.input, radius)?;
                &expanded
            }
            None => &period.input,
        };

        let history = historical_indices(input, &target_time)?;
        let current_index = if self.experiment.has_current() {
            Some(input.time_index(&target_time).ok_or_else(|| {
                PipelineError::DataAlignment(format!(
                    "nowcast input has no timestep at the target time {}",
                    target_time
                ))
            })?)
        } else {
            None
        };

        let historical_variables: Vec<String> =
            input.variable_names().map(str::to_string).collect();
        let current_variables: Vec<String> = match current_index {
            Some(_) => historical_variables
                .iter()
                .filter(|name| **name != target_name)
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        let (_, nj, ni) = input.shape();
        let n_pixels = nj * ni;
        let hist_vars: Vec<&Array3<f32>> = input.variables().map(|(_, data)| data).collect();

        let historical = Array3::from_shape_fn(
            (n_pixels, history.len(), hist_vars.len()),
            |(p, t, v)| hist_vars[v][[history[t], p / ni, p % ni]],
        );

        let current = current_index.map(|ct| {
            let cur_vars: Vec<&Array3<f32>> = current_variables
                .iter()
                .filter_map(|name| input.variable(name))
                .collect();
            Array2::from_shape_fn((n_pixels, cur_vars.len()), |(p, c)| {
                cur_vars[c][[ct, p / ni, p % ni]]
            })
        });

        let target = Array1::from_shape_fn(n_pixels, |p| target_grid[[p / ni, p % ni]]);

        let keep: Vec<usize> = (0..n_pixels)
            .filter(|&p| {
                let row = historical.index_axis(Axis(0), p);
                if row.iter().all(|v| v.is_nan()) || target[p].is_nan() {
                    return false;
                }
                if self.clear_nans {
                    let current_missing = current
                        .as_ref()
                        .is_some_and(|c| c.row(p).iter().any(|v| v.is_nan()));
                    return !(current_missing || row.iter().any(|v| v.is_nan()));
                }
                true
            })
            .collect();

        if keep.len() < n_pixels {
            debug!(
                dropped = n_pixels - keep.len(),
                kept = keep.len(),
                clear_nans = self.clear_nans,
                "dropped missing pixels"
            );
        }

        let latlons = return_latlons.then(|| {
            Array2::from_shape_fn((keep.len(), 2), |(row, k)| {
                let p = keep[row];
                if k == 0 {
                    input.latitudes()[p / ni]
                } else {
                    input.longitudes()[p % ni]
                }
            })
        });

        Ok(TrainExample {
            historical: historical.select(Axis(0), &keep),
            historical_variables,
            current: current.map(|c| c.select(Axis(0), &keep)),
            current_variables,
            target: target.select(Axis(0), &keep),
            latlons,
            pred_month_onehot: Array1::from(month_onehot(month_of(&target_time)).to_vec()),
            target_time,
            target_variable: target_name,
        })
    }

    fn resolve_target(&self, target: &GridDataset) -> Result<String> {
        match &self.target_variable {
            Some(name) if target.has_variable(name) => Ok(name.clone()),
            Some(name) => Err(PipelineError::MissingVariable(format!(
                "target variable {} is absent from the target dataset",
                name
            ))),
            None => {
                let names: Vec<&str> = target.variable_names().collect();
                match names.as_slice() {
                    [only] => Ok(only.to_string()),
                    _ => Err(PipelineError::MissingVariable(format!(
                        "cannot infer the target variable from {:?}",
                        names
                    ))),
                }
            }
        }
    }
}

/// Indices of every input timestep other than the target one, in ascending time order
fn historical_indices(input: &GridDataset, target_time: &NaiveDateTime) -> Result<Vec<usize>> {
    let times = input.times();
    let mut indices: Vec<usize> = (0..times.len()).filter(|&t| times[t] != *target_time).collect();
    indices.sort_by_key(|&t| times[t]);

    if indices.is_empty() {
        return Err(PipelineError::DataAlignment(
            "input dataset has no historical timesteps".to_string(),
        ));
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use chrono::NaiveDate;

    fn month(m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, m, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    /// 3 months of VHI and precip on a 2x3 grid; the target is VHI in April
    fn period(target_in_input: bool) -> PeriodData {
        let mut times = vec![month(1), month(2), month(3)];
        if target_in_input {
            times.push(month(4));
        }
        let nt = times.len();
        let lats = vec![0.0, 1.0];
        let lons = vec![30.0, 31.0, 32.0];
        let vhi = Array3::from_shape_fn((nt, 2, 3), |(t, i, j)| (100 * t + 10 * i + j) as f32);
        let precip =
            Array3::from_shape_fn((nt, 2, 3), |(t, i, j)| -((100 * t + 10 * i + j) as f32));

        let input = GridDataset::new(times, lats.clone(), lons.clone())
            .with_variable("precip", precip)
            .unwrap()
            .with_variable("VHI", vhi)
            .unwrap();
        let target = GridDataset::new(vec![month(4)], lats, lons)
            .with_variable(
                "VHI",
                Array3::from_shape_fn((1, 2, 3), |(_, i, j)| (i * 3 + j) as f32 + 0.5),
            )
            .unwrap();
        PeriodData { input, target }
    }

    fn assembler(experiment: Experiment) -> ExampleAssembler<MemoryReader> {
        ExampleAssembler::new(MemoryReader::new(), experiment)
    }

    #[test]
    fn test_forecast_example_layout() {
        let example = assembler(Experiment::Forecast)
            .assemble_period(&period(false), None, true)
            .unwrap();

        assert_eq!(example.historical.dim(), (6, 3, 2));
        assert_eq!(example.historical_variables, vec!["VHI", "precip"]);
        assert!(example.current.is_none());
        assert_eq!(example.target_variable, "VHI");

        // pixel 4 is (lat index 1, lon index 1)
        assert_eq!(example.historical[[4, 2, 0]], 211.0);
        assert_eq!(example.historical[[4, 2, 1]], -211.0);
        assert_eq!(example.target[4], 4.5);

        let latlons = example.latlons.unwrap();
        assert_eq!(latlons.dim(), (6, 2));
        assert_eq!((latlons[[4, 0]], latlons[[4, 1]]), (1.0, 31.0));

        assert_eq!(example.pred_month_onehot[3], 1.0);
        assert_eq!(example.pred_month_onehot.sum(), 1.0);
    }

    #[test]
    fn test_nowcast_current_excludes_target_and_target_step() {
        let example = assembler(Experiment::Nowcast)
            .assemble_period(&period(true), None, false)
            .unwrap();

        assert_eq!(example.num_timesteps(), 3);
        assert_eq!(example.current_variables, vec!["precip"]);
        let current = example.current.unwrap();
        assert_eq!(current.dim(), (6, 1));
        assert_eq!(current[[5, 0]], -312.0);
        assert!(example.latlons.is_none());
    }

    #[test]
    fn test_nowcast_without_target_step_fails() {
        let result = assembler(Experiment::Nowcast).assemble_period(&period(false), None, false);
        assert!(matches!(result, Err(PipelineError::DataAlignment(_))));
    }

    #[test]
    fn test_missing_target_variable() {
        let result = assembler(Experiment::Forecast)
            .with_target_variable("NDVI")
            .assemble_period(&period(false), None, false);
        assert!(matches!(result, Err(PipelineError::MissingVariable(_))));
    }

    #[test]
    fn test_grid_mismatch() {
        let mut data = period(false);
        data.target = GridDataset::new(vec![month(4)], vec![0.0, 1.0], vec![30.0, 31.0])
            .with_variable("VHI", Array3::zeros((1, 2, 2)))
            .unwrap();
        let result = assembler(Experiment::Forecast).assemble_period(&data, None, false);
        assert!(matches!(result, Err(PipelineError::DataAlignment(_))));
    }

    #[test]
    fn test_pixel_dropping_policies() {
        let mut data = period(false);
        let mut vhi = data.input.variable("VHI").unwrap().clone();
        let mut precip = data.input.variable("precip").unwrap().clone();
        // pixel 0: every historical value missing
        vhi.slice_mut(ndarray::s![.., 0, 0]).fill(f32::NAN);
        precip.slice_mut(ndarray::s![.., 0, 0]).fill(f32::NAN);
        // pixel 1: a single missing value
        vhi[[1, 0, 1]] = f32::NAN;
        data.input.insert_variable("VHI", vhi).unwrap();
        data.input.insert_variable("precip", precip).unwrap();
        // pixel 2: missing target
        let mut target = data.target.variable("VHI").unwrap().clone();
        target[[0, 0, 2]] = f32::NAN;
        data.target.insert_variable("VHI", target).unwrap();

        let kept = assembler(Experiment::Forecast)
            .assemble_period(&data, None, true)
            .unwrap();
        assert_eq!(kept.num_pixels(), 4);
        assert!(kept.historical[[0, 1, 0]].is_nan());
        assert_eq!(kept.latlons.unwrap()[[0, 1]], 31.0);

        let cleared = assembler(Experiment::Forecast)
            .with_clear_nans(true)
            .assemble_period(&data, None, true)
            .unwrap();
        assert_eq!(cleared.num_pixels(), 3);
        assert!(cleared.historical.iter().all(|v| !v.is_nan()));
        assert_eq!(cleared.target.len(), cleared.latlons.unwrap().nrows());
    }

    #[test]
    fn test_neighbor_expansion_feeds_historical() {
        let example = assembler(Experiment::Forecast)
            .assemble_period(&period(false), Some(1), true)
            .unwrap();
        assert_eq!(example.historical.dim(), (6, 3, 18));
        assert!(example
            .historical_variables
            .iter()
            .all(|name| !name.starts_with("lat_0_lon_0_")));
    }
}
