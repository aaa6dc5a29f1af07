//! Enumeration and filtering of per-period source directories.

use crate::config::{Experiment, Mode};
use crate::error::{PipelineError, Result};
use crate::time_utils::PeriodKey;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Train-partition membership flags, aligned with the enumeration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitMask(Vec<bool>);

impl SplitMask {
    pub fn new(flags: Vec<bool>) -> Self {
        Self(flags)
    }

    /// Reproducible random mask selecting `round(len * train_fraction)` entries
    pub fn random(len: usize, train_fraction: f64, seed: u64) -> Result<Self> {
        if !(0.0..=1.0).contains(&train_fraction) {
            return Err(PipelineError::Configuration(format!(
                "train fraction must be between 0.0 and 1.0, got {}",
                train_fraction
            )));
        }
        let selected = (len as f64 * train_fraction).round() as usize;
        let mut flags: Vec<bool> = (0..len).map(|i| i < selected).collect();
        flags.shuffle(&mut StdRng::seed_from_u64(seed));
        Ok(Self(flags))
    }

    /// Mask of the validation partition
    pub fn complement(&self) -> Self {
        Self(self.0.iter().map(|flag| !flag).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count_selected(&self) -> usize {
        self.0.iter().filter(|flag| **flag).count()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

impl From<Vec<bool>> for SplitMask {
    fn from(flags: Vec<bool>) -> Self {
        Self(flags)
    }
}

/// Filters applied on top of the partition listing
#[derive(Debug, Clone, Default)]
pub struct Selection<'a> {
    pub pred_months: Option<&'a BTreeSet<u32>>,
    pub years: Option<&'a BTreeSet<i32>>,
    pub mask: Option<&'a SplitMask>,
}

/// Directory holding the sources of one experiment / mode
pub fn partition_dir(root: &Path, experiment: Experiment, mode: Mode) -> PathBuf {
    root.join(experiment.dir_name()).join(mode.dir_name())
}

/// List every source directory of a partition in lexicographic order.
///
/// A missing partition directory yields an empty listing.
pub fn enumerate_sources(root: &Path, experiment: Experiment, mode: Mode) -> Result<Vec<PathBuf>> {
    let dir = partition_dir(root, experiment, mode);
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "partition directory does not exist");
        return Ok(Vec::new());
    }

    let mut sources = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        let path = entry.path();
        // follows symlinked period directories
        if !hidden && path.is_dir() {
            sources.push(path);
        }
    }
    sources.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(sources)
}

/// Period key of a source directory, if its name has the `<year>_<month>` form
pub fn period_key(source: &Path) -> Option<PeriodKey> {
    source.file_name()?.to_str()?.parse().ok()
}

/// Resolve the ordered list of sources for a split.
///
/// The mask is checked against the full enumeration and applied first;
/// month and year filters then narrow the result further.
pub fn select(
    root: &Path,
    mode: Mode,
    experiment: Experiment,
    selection: &Selection,
) -> Result<Vec<PathBuf>> {
    let sources = enumerate_sources(root, experiment, mode)?;

    let masked: Vec<PathBuf> = match selection.mask {
        Some(mask) => {
            if mask.len() != sources.len() {
                return Err(PipelineError::Configuration(format!(
                    "mask has {} entries but {} sources were found under {}",
                    mask.len(),
                    sources.len(),
                    partition_dir(root, experiment, mode).display()
                )));
            }
            sources
                .into_iter()
                .zip(mask.as_slice())
                .filter_map(|(source, keep)| keep.then_some(source))
                .collect()
        }
        None => sources,
    };

    if selection.pred_months.is_none() && selection.years.is_none() {
        return Ok(masked);
    }

    let selected = masked
        .into_iter()
        .filter(|source| {
            let Some(key) = period_key(source) else {
                warn!(source = %source.display(), "cannot parse period key, excluding source");
                return false;
            };
            let month_ok = selection.pred_months.map_or(true, |months| months.contains(&key.month));
            let year_ok = selection.years.map_or(true, |years| years.contains(&key.year));
            if !(month_ok && year_ok) {
                debug!(source = %source.display(), "filtered out by period");
            }
            month_ok && year_ok
        })
        .collect();

    Ok(selected)
}

/// Permute sources reproducibly
pub fn shuffle_sources(sources: &mut [PathBuf], seed: u64) {
    sources.shuffle(&mut StdRng::seed_from_u64(seed));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_mask_is_reproducible() {
        let a = SplitMask::random(20, 0.8, 7).unwrap();
        let b = SplitMask::random(20, 0.8, 7).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.count_selected(), 16);
        assert_eq!(a.complement().count_selected(), 4);
        assert!(SplitMask::random(20, 1.5, 7).is_err());
    }

    #[test]
    fn test_complement_partitions() {
        let mask = SplitMask::new(vec![true, true, false, true, false]);
        let complement = mask.complement();
        assert_eq!(complement.as_slice(), &[false, false, true, false, true]);
        for (a, b) in mask.as_slice().iter().zip(complement.as_slice()) {
            assert!(a ^ b);
        }
    }

    #[test]
    fn test_period_key_of_source() {
        assert_eq!(
            period_key(Path::new("/data/train/2018_12")),
            Some(PeriodKey { year: 2018, month: 12 })
        );
        assert_eq!(period_key(Path::new("/data/train/3")), None);
    }

    #[test]
    fn test_missing_partition_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sources = enumerate_sources(dir.path(), Experiment::Nowcast, Mode::Test).unwrap();
        assert!(sources.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_sources_are_enumerated() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("store").join("2018_4");
        std::fs::create_dir_all(&store).unwrap();
        let partition = partition_dir(dir.path(), Experiment::Forecast, Mode::Train);
        std::fs::create_dir_all(&partition).unwrap();
        std::os::unix::fs::symlink(&store, partition.join("2018_4")).unwrap();
        std::fs::write(partition.join("notes.txt"), "").unwrap();

        let sources = enumerate_sources(dir.path(), Experiment::Forecast, Mode::Train).unwrap();
        assert_eq!(sources, vec![partition.join("2018_4")]);
    }
}
