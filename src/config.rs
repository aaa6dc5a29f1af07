use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Forecasting regime of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Experiment {
    /// Input is restricted to the historical window
    #[serde(rename = "one_month_forecast", alias = "forecast")]
    Forecast,
    /// Same-timestep covariates of the non-target variables are allowed
    Nowcast,
}

impl Experiment {
    /// Directory holding this experiment's engineered features
    pub fn dir_name(&self) -> &'static str {
        match self {
            Experiment::Forecast => "one_month_forecast",
            Experiment::Nowcast => "nowcast",
        }
    }

    pub fn has_current(&self) -> bool {
        matches!(self, Experiment::Nowcast)
    }
}

impl fmt::Display for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Experiment {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "one_month_forecast" | "forecast" => Ok(Experiment::Forecast),
            "nowcast" => Ok(Experiment::Nowcast),
            other => Err(PipelineError::Configuration(format!(
                "unknown experiment kind: {}",
                other
            ))),
        }
    }
}

/// Which split the loader serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Train,
    Validation,
    Test,
}

impl Mode {
    /// Partition directory on disk. Validation is carved out of `train`
    /// with the complement of the training mask.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Mode::Train | Mode::Validation => "train",
            Mode::Test => "test",
        }
    }
}

impl FromStr for Mode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Mode::Train),
            "validation" | "val" => Ok(Mode::Validation),
            "test" => Ok(Mode::Test),
            other => Err(PipelineError::Configuration(format!("unknown mode: {}", other))),
        }
    }
}

/// Options recognised by the data loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub experiment: Experiment,
    pub mode: Mode,
    /// Number of per-period sources folded into one batch
    pub batch_file_size: usize,
    pub shuffle: bool,
    /// Seed for the shuffle permutation; restarts reuse it
    pub seed: u64,
    /// Neighbour window radius, `None` disables expansion
    pub surrounding_pixels: Option<usize>,
    /// Allowed prediction months (1-12), `None` means unrestricted
    pub pred_months: Option<BTreeSet<u32>>,
    /// Allowed prediction years, `None` means unrestricted
    pub years: Option<BTreeSet<i32>>,
    /// Drop partially missing pixels instead of keeping NaN markers
    pub clear_nans: bool,
    /// Abort on the first failing source instead of skipping it
    pub strict: bool,
    /// Name of the predicted variable; inferred from the target dataset when unset
    pub target_variable: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            experiment: Experiment::Forecast,
            mode: Mode::Train,
            batch_file_size: 1,
            shuffle: false,
            seed: 42,
            surrounding_pixels: None,
            pred_months: None,
            years: None,
            clear_nans: false,
            strict: false,
            target_variable: None,
        }
    }
}

impl LoaderConfig {
    /// Load a configuration from a JSON file and validate it
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: LoaderConfig = serde_json::from_str(&text).map_err(|e| {
            PipelineError::Configuration(format!(
                "invalid loader config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_file_size == 0 {
            return Err(PipelineError::Configuration(
                "batch_file_size must be a positive integer".to_string(),
            ));
        }

        if let Some(months) = &self.pred_months {
            if months.is_empty() {
                return Err(PipelineError::Configuration(
                    "pred_months must not be empty; use None for all months".to_string(),
                ));
            }
            if let Some(bad) = months.iter().find(|m| !(1..=12).contains(*m)) {
                return Err(PipelineError::Configuration(format!(
                    "pred_months must lie within 1..=12, got {}",
                    bad
                )));
            }
        }

        if matches!(&self.years, Some(years) if years.is_empty()) {
            return Err(PipelineError::Configuration(
                "years must not be empty; use None for all years".to_string(),
            ));
        }

        if matches!(&self.target_variable, Some(name) if name.is_empty()) {
            return Err(PipelineError::Configuration(
                "target_variable must not be an empty string".to_string(),
            ));
        }

        Ok(())
    }

    /// Neighbour radius with `Some(0)` folded into "disabled"
    pub fn neighbor_radius(&self) -> Option<usize> {
        self.surrounding_pixels.filter(|r| *r > 0)
    }
}
