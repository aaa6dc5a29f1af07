use super::{GridDataset, PeriodData, SourceReader};
use crate::error::{PipelineError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Source reader backed by already-decoded datasets keyed by source path.
///
/// Useful when an upstream stage materializes the per-period datasets in
/// memory, and for exercising the pipeline without a NetCDF installation.
#[derive(Debug, Default, Clone)]
pub struct MemoryReader {
    periods: HashMap<PathBuf, PeriodData>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the datasets served for `source`
    pub fn insert(&mut self, source: impl Into<PathBuf>, input: GridDataset, target: GridDataset) {
        self.periods.insert(source.into(), PeriodData { input, target });
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    fn period(&self, source: &Path) -> Result<&PeriodData> {
        self.periods
            .get(source)
            .ok_or_else(|| PipelineError::source_read(source, "no datasets registered for source"))
    }
}

impl SourceReader for MemoryReader {
    fn read_input(&self, source: &Path) -> Result<GridDataset> {
        Ok(self.period(source)?.input.clone())
    }

    fn read_target(&self, source: &Path) -> Result<GridDataset> {
        Ok(self.period(source)?.target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_source_is_read_error() {
        let reader = MemoryReader::new();
        let result = reader.read_input(Path::new("/nowhere/2018_1"));
        assert!(matches!(result, Err(PipelineError::SourceRead { .. })));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_serves_registered_period() {
        let mut reader = MemoryReader::new();
        let ds = GridDataset::new(Vec::new(), vec![0.0], vec![0.0]);
        reader.insert("/data/2018_1", ds.clone(), ds.clone());

        let period = reader.read_period(Path::new("/data/2018_1")).unwrap();
        assert_eq!(period.input, ds);
        assert_eq!(reader.len(), 1);
    }
}
