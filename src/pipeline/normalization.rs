//! Variable-wise standardisation fitted on the training split.

use super::assembler::TrainExample;
use super::neighbors::parse_neighbor_name;
use crate::error::{PipelineError, Result};
use crate::io::{GridDataset, SourceReader};
use crate::math::stats::RunningStats;
use ndarray::{s, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Standard deviations below this are treated as zero
pub const MIN_STD: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationEntry {
    pub mean: f64,
    pub std: f64,
}

impl NormalizationEntry {
    /// Standardise one value. Missing values stay missing; a degenerate
    /// std maps every present value to zero.
    pub fn scale(&self, value: f32) -> f32 {
        if value.is_nan() {
            value
        } else if self.std < MIN_STD {
            0.0
        } else {
            ((value as f64 - self.mean) / self.std) as f32
        }
    }
}

/// Whether the prediction target is standardised too
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPolicy {
    #[default]
    Exempt,
    Normalize,
}

/// Per-variable mean and standard deviation.
///
/// Neighbour variables (`lat_{di}_lon_{dj}_{v}`) without an entry of their
/// own use the entry of `v`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationTable {
    entries: BTreeMap<String, NormalizationEntry>,
    #[serde(default)]
    target_policy: TargetPolicy,
}

impl NormalizationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit over every value of every variable of the given training datasets
    pub fn fit<'a, I>(datasets: I) -> Self
    where
        I: IntoIterator<Item = &'a GridDataset>,
    {
        let mut stats: BTreeMap<String, RunningStats> = BTreeMap::new();
        for dataset in datasets {
            for (name, data) in dataset.variables() {
                stats
                    .entry(name.to_string())
                    .or_default()
                    .extend(data.iter().copied());
            }
        }

        let mut table = Self::new();
        for (name, acc) in stats {
            match (acc.mean(), acc.std()) {
                (Some(mean), Some(std)) => table.insert(name, mean, std),
                _ => warn!(variable = %name, "no finite values, variable left out of the table"),
            }
        }
        info!(variables = table.len(), "fitted normalization table");
        table
    }

    /// Fit over the input datasets of the given training sources
    pub fn fit_sources<R: SourceReader>(reader: &R, sources: &[PathBuf]) -> Result<Self> {
        let datasets = sources
            .iter()
            .map(|source| reader.read_input(source))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::fit(&datasets))
    }

    pub fn with_target_policy(mut self, policy: TargetPolicy) -> Self {
        self.target_policy = policy;
        self
    }

    pub fn target_policy(&self) -> TargetPolicy {
        self.target_policy
    }

    pub fn insert(&mut self, name: impl Into<String>, mean: f64, std: f64) {
        let name = name.into();
        if std < MIN_STD {
            warn!(
                variable = %name,
                std,
                "near-zero standard deviation, values will normalize to zero"
            );
        }
        self.entries.insert(name, NormalizationEntry { mean, std });
    }

    /// Entry used for `name`, falling back to the base of a neighbour variable
    pub fn get(&self, name: &str) -> Option<&NormalizationEntry> {
        self.entries.get(name).or_else(|| {
            let (_, _, base) = parse_neighbor_name(name)?;
            self.entries.get(base)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, name: &str) -> Result<&NormalizationEntry> {
        self.get(name).ok_or_else(|| {
            PipelineError::Configuration(format!("no normalization entry for variable {}", name))
        })
    }

    /// Standardise `historical` and `current` column by column
    pub fn apply(&self, mut example: TrainExample) -> Result<TrainExample> {
        for (col, name) in example.historical_variables.iter().enumerate() {
            let entry = self.entry(name)?;
            example
                .historical
                .slice_mut(s![.., .., col])
                .mapv_inplace(|v| entry.scale(v));
        }

        if let Some(current) = example.current.as_mut() {
            for (col, name) in example.current_variables.iter().enumerate() {
                let entry = self.entry(name)?;
                current
                    .index_axis_mut(Axis(1), col)
                    .mapv_inplace(|v| entry.scale(v));
            }
        }

        if self.target_policy == TargetPolicy::Normalize {
            let entry = self.entry(&example.target_variable)?;
            example.target.mapv_inplace(|v| entry.scale(v));
        }

        Ok(example)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, self).map_err(|e| std::io::Error::other(e).into())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        serde_json::from_reader(reader).map_err(|e| {
            PipelineError::Configuration(format!(
                "invalid normalization table {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::{Array1, Array2, Array3};

    fn example() -> TrainExample {
        TrainExample {
            historical: Array3::from_shape_vec((2, 1, 2), vec![10.0, 1.0, 14.0, f32::NAN]).unwrap(),
            historical_variables: vec!["VHI".into(), "lat_1_lon_0_precip".into()],
            current: Some(Array2::from_shape_vec((2, 1), vec![3.0, 5.0]).unwrap()),
            current_variables: vec!["precip".into()],
            target: Array1::from(vec![12.0, 16.0]),
            latlons: None,
            pred_month_onehot: Array1::zeros(12),
            target_time: NaiveDate::from_ymd_opt(2018, 4, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            target_variable: "VHI".into(),
        }
    }

    fn table() -> NormalizationTable {
        let mut table = NormalizationTable::new();
        table.insert("VHI", 12.0, 2.0);
        table.insert("precip", 1.0, 0.0);
        table
    }

    #[test]
    fn test_apply_scales_features_only() {
        let normalized = table().apply(example()).unwrap();
        assert_eq!(normalized.historical[[0, 0, 0]], -1.0);
        assert_eq!(normalized.historical[[1, 0, 0]], 1.0);
        // zero std guard and missing marker
        assert_eq!(normalized.historical[[0, 0, 1]], 0.0);
        assert!(normalized.historical[[1, 0, 1]].is_nan());
        assert_eq!(normalized.current.unwrap()[[1, 0]], 0.0);
        assert_eq!(normalized.target, Array1::from(vec![12.0, 16.0]));
    }

    #[test]
    fn test_target_policy() {
        let table = table().with_target_policy(TargetPolicy::Normalize);
        let normalized = table.apply(example()).unwrap();
        assert_eq!(normalized.target, Array1::from(vec![0.0, 2.0]));
    }

    #[test]
    fn test_missing_entry_is_an_error() {
        let mut table = NormalizationTable::new();
        table.insert("VHI", 0.0, 1.0);
        let result = table.apply(example());
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_neighbor_fallback() {
        let table = table();
        assert_eq!(table.get("lat_-1_lon_1_VHI"), table.get("VHI"));
        assert!(table.get("lat_-1_lon_1_NDVI").is_none());
    }

    #[test]
    fn test_fit_skips_missing_values() {
        let t = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let ds = GridDataset::new(vec![t], vec![0.0, 1.0], vec![0.0, 1.0])
            .with_variable(
                "VHI",
                Array3::from_shape_vec((1, 2, 2), vec![1.0, 3.0, f32::NAN, 5.0]).unwrap(),
            )
            .unwrap();
        let table = NormalizationTable::fit([&ds]);
        let entry = table.get("VHI").unwrap();
        assert!((entry.mean - 3.0).abs() < 1e-12);
        assert!((entry.std - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_json_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("normalizing_dict.json");
        let table = table().with_target_policy(TargetPolicy::Normalize);
        table.save_json(&path).unwrap();
        assert_eq!(NormalizationTable::load_json(&path).unwrap(), table);
    }
}
