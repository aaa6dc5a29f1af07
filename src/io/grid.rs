use crate::error::{PipelineError, Result};
use chrono::NaiveDateTime;
use ndarray::{Array3, ArrayView2};
use std::collections::BTreeMap;

/// Tolerance used when comparing coordinate axes of two grids
pub const COORD_TOLERANCE: f64 = 1e-6;

/// Decoded gridded dataset: named `f32` variables laid out as `[time, lat, lon]`.
///
/// Variables live in a `BTreeMap`, so iteration yields them in lexicographic
/// order. Every consumer that stacks variables into columns relies on this
/// to get the same layout for every source sharing a variable set.
#[derive(Debug, Clone, PartialEq)]
pub struct GridDataset {
    times: Vec<NaiveDateTime>,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    variables: BTreeMap<String, Array3<f32>>,
}

impl GridDataset {
    /// Create an empty dataset over the given axes
    pub fn new(times: Vec<NaiveDateTime>, latitudes: Vec<f64>, longitudes: Vec<f64>) -> Self {
        Self {
            times,
            latitudes,
            longitudes,
            variables: BTreeMap::new(),
        }
    }

    /// Builder form of [`GridDataset::insert_variable`]
    pub fn with_variable(mut self, name: impl Into<String>, data: Array3<f32>) -> Result<Self> {
        self.insert_variable(name, data)?;
        Ok(self)
    }

    /// Add or replace a variable, checking its shape against the axes
    pub fn insert_variable(&mut self, name: impl Into<String>, data: Array3<f32>) -> Result<()> {
        let name = name.into();
        let expected = self.shape();
        if data.dim() != expected {
            return Err(PipelineError::DataAlignment(format!(
                "variable {} has shape {:?}, grid is {:?}",
                name,
                data.dim(),
                expected
            )));
        }
        self.variables.insert(name, data);
        Ok(())
    }

    /// `(time, lat, lon)` extent
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.times.len(), self.latitudes.len(), self.longitudes.len())
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn latitudes(&self) -> &[f64] {
        &self.latitudes
    }

    pub fn longitudes(&self) -> &[f64] {
        &self.longitudes
    }

    pub fn variable(&self, name: &str) -> Option<&Array3<f32>> {
        self.variables.get(name)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Variable names in canonical (lexicographic) order
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Variables in canonical order
    pub fn variables(&self) -> impl Iterator<Item = (&str, &Array3<f32>)> {
        self.variables.iter().map(|(name, data)| (name.as_str(), data))
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Index of the timestep equal to `time`
    pub fn time_index(&self, time: &NaiveDateTime) -> Option<usize> {
        self.times.iter().position(|t| t == time)
    }

    /// `[lat, lon]` slice of one variable at one timestep
    pub fn slice_at(&self, name: &str, time_index: usize) -> Option<ArrayView2<'_, f32>> {
        self.variables
            .get(name)
            .filter(|_| time_index < self.times.len())
            .map(|data| data.index_axis(ndarray::Axis(0), time_index))
    }

    /// Check that `other` covers exactly the same spatial grid
    pub fn check_same_grid(&self, other: &GridDataset) -> Result<()> {
        check_axis("latitude", &self.latitudes, &other.latitudes)?;
        check_axis("longitude", &self.longitudes, &other.longitudes)
    }
}

fn check_axis(name: &str, a: &[f64], b: &[f64]) -> Result<()> {
    if a.len() != b.len() {
        return Err(PipelineError::DataAlignment(format!(
            "{} axis length differs: {} vs {}",
            name,
            a.len(),
            b.len()
        )));
    }
    if let Some((i, (x, y))) = a
        .iter()
        .zip(b)
        .enumerate()
        .find(|(_, (x, y))| (*x - *y).abs() > COORD_TOLERANCE)
    {
        return Err(PipelineError::DataAlignment(format!(
            "{} axis differs at index {}: {} vs {}",
            name, i, x, y
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn month(m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, m, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_variables_are_sorted() {
        let ds = GridDataset::new(vec![month(1)], vec![0.0], vec![0.0])
            .with_variable("precip", Array3::zeros((1, 1, 1)))
            .unwrap()
            .with_variable("VHI", Array3::zeros((1, 1, 1)))
            .unwrap()
            .with_variable("E", Array3::zeros((1, 1, 1)))
            .unwrap();

        let names: Vec<&str> = ds.variable_names().collect();
        assert_eq!(names, vec!["E", "VHI", "precip"]);
    }

    #[test]
    fn test_insert_rejects_wrong_shape() {
        let mut ds = GridDataset::new(vec![month(1), month(2)], vec![0.0, 1.0], vec![0.0]);
        let result = ds.insert_variable("VHI", Array3::zeros((1, 2, 1)));
        assert!(matches!(result, Err(PipelineError::DataAlignment(_))));
    }

    #[test]
    fn test_grid_comparison() {
        let a = GridDataset::new(vec![month(1)], vec![0.0, 1.0], vec![30.0, 31.0]);
        let b = GridDataset::new(vec![month(2)], vec![0.0, 1.0], vec![30.0, 31.0]);
        assert!(a.check_same_grid(&b).is_ok());

        let shifted = GridDataset::new(vec![month(2)], vec![0.0, 1.0], vec![30.5, 31.5]);
        assert!(matches!(
            a.check_same_grid(&shifted),
            Err(PipelineError::DataAlignment(_))
        ));

        let coarser = GridDataset::new(vec![month(2)], vec![0.0], vec![30.0, 31.0]);
        assert!(a.check_same_grid(&coarser).is_err());
    }

    #[test]
    fn test_slice_at() {
        let data = Array3::from_shape_fn((2, 2, 2), |(t, i, j)| (t * 100 + i * 10 + j) as f32);
        let ds = GridDataset::new(vec![month(1), month(2)], vec![0.0, 1.0], vec![0.0, 1.0])
            .with_variable("VHI", data)
            .unwrap();

        let slice = ds.slice_at("VHI", 1).unwrap();
        assert_eq!(slice[[1, 0]], 110.0);
        assert!(ds.slice_at("VHI", 2).is_none());
        assert_eq!(ds.time_index(&month(2)), Some(1));
    }
}
