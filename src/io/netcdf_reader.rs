use super::{is_netcdf_format, GridDataset, SourceReader, INPUT_FILE, TARGET_FILE};
use crate::error::{PipelineError, Result};
use crate::time_utils::decode_cf_times;
use ndarray::Array3;
use std::path::{Path, PathBuf};
use tracing::debug;

const TIME_ALIASES: [&str; 2] = ["time", "valid_time"];
const LAT_ALIASES: [&str; 3] = ["lat", "latitude", "y"];
const LON_ALIASES: [&str; 3] = ["lon", "longitude", "x"];

/// Reads `x.nc` / `y.nc` pairs with CF-style `time`, `lat` and `lon` axes.
///
/// Every variable spanning exactly the time, latitude and longitude
/// dimensions (in any order) becomes a dataset variable laid out as
/// `[time, lat, lon]`. Fill values become `NaN` and CF packing
/// (`scale_factor` / `add_offset`) is undone.
#[derive(Debug, Clone)]
pub struct NetcdfReader {
    input_file: String,
    target_file: String,
}

impl Default for NetcdfReader {
    fn default() -> Self {
        Self {
            input_file: INPUT_FILE.to_string(),
            target_file: TARGET_FILE.to_string(),
        }
    }
}

impl NetcdfReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use different file names inside each source directory
    pub fn with_file_names(input_file: impl Into<String>, target_file: impl Into<String>) -> Self {
        Self {
            input_file: input_file.into(),
            target_file: target_file.into(),
        }
    }

    /// Decode one NetCDF file. The handle is dropped before returning.
    pub fn read_file(path: &Path) -> Result<GridDataset> {
        if !path.exists() {
            return Err(PipelineError::source_read(path, "file does not exist"));
        }
        if !is_netcdf_format(path)? {
            return Err(PipelineError::source_read(path, "not a NetCDF file"));
        }
        let file = netcdf::open(path).map_err(|e| PipelineError::source_read(path, e))?;

        let latitudes = read_axis(&file, &LAT_ALIASES, path)?;
        let longitudes = read_axis(&file, &LON_ALIASES, path)?;
        let times = read_times(&file, path)?;

        let mut dataset = GridDataset::new(times, latitudes, longitudes);
        let (nt, nj, ni) = dataset.shape();

        for var in file.variables() {
            let name = var.name();
            let dim_names: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
            let Some(order) = axis_order(&dim_names) else {
                debug!(variable = %name, dims = ?dim_names, "skipping non-gridded variable");
                continue;
            };

            let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
            let raw: Vec<f32> = var
                .get_values(..)
                .map_err(|e| PipelineError::source_read(path, format!("{}: {}", name, e)))?;

            let fill_values: Vec<f64> = ["_FillValue", "missing_value"]
                .iter()
                .filter_map(|attr| numeric_attribute(&var, attr))
                .collect();
            let scale = numeric_attribute(&var, "scale_factor").unwrap_or(1.0);
            let offset = numeric_attribute(&var, "add_offset").unwrap_or(0.0);

            let values: Vec<f32> = raw
                .into_iter()
                .map(|v| {
                    let is_fill = fill_values
                        .iter()
                        .any(|fill| (v as f64 - fill).abs() < 1e-6 * fill.abs().max(1.0));
                    if is_fill {
                        f32::NAN
                    } else {
                        (v as f64 * scale + offset) as f32
                    }
                })
                .collect();

            let array = Array3::from_shape_vec((shape[0], shape[1], shape[2]), values)
                .map_err(|e| PipelineError::source_read(path, format!("{}: {}", name, e)))?
                .permuted_axes(order)
                .as_standard_layout()
                .into_owned();

            if array.dim() != (nt, nj, ni) {
                return Err(PipelineError::source_read(
                    path,
                    format!("{} has shape {:?}, axes give {:?}", name, array.dim(), (nt, nj, ni)),
                ));
            }
            dataset.insert_variable(name, array)?;
        }

        Ok(dataset)
    }

    fn source_file(&self, source: &Path, file_name: &str) -> PathBuf {
        source.join(file_name)
    }
}

impl SourceReader for NetcdfReader {
    fn read_input(&self, source: &Path) -> Result<GridDataset> {
        Self::read_file(&self.source_file(source, &self.input_file))
    }

    fn read_target(&self, source: &Path) -> Result<GridDataset> {
        Self::read_file(&self.source_file(source, &self.target_file))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Axis {
    Time,
    Lat,
    Lon,
}

fn classify(dim: &str) -> Option<Axis> {
    if TIME_ALIASES.contains(&dim) {
        Some(Axis::Time)
    } else if LAT_ALIASES.contains(&dim) {
        Some(Axis::Lat)
    } else if LON_ALIASES.contains(&dim) {
        Some(Axis::Lon)
    } else {
        None
    }
}

/// Permutation that brings a variable's dimensions into `[time, lat, lon]`
fn axis_order(dims: &[String]) -> Option<[usize; 3]> {
    if dims.len() != 3 {
        return None;
    }
    let axes: Vec<Axis> = dims.iter().map(|d| classify(d)).collect::<Option<_>>()?;
    let position = |axis: Axis| axes.iter().position(|a| *a == axis);
    Some([position(Axis::Time)?, position(Axis::Lat)?, position(Axis::Lon)?])
}

fn find_variable<'f>(file: &'f netcdf::File, aliases: &[&str]) -> Option<netcdf::Variable<'f>> {
    aliases.iter().find_map(|name| file.variable(name))
}

fn read_axis(file: &netcdf::File, aliases: &[&str], path: &Path) -> Result<Vec<f64>> {
    let var = find_variable(file, aliases)
        .ok_or_else(|| {
            PipelineError::source_read(path, format!("no coordinate among {:?}", aliases))
        })?;
    var.get_values(..)
        .map_err(|e| PipelineError::source_read(path, e))
}

fn read_times(file: &netcdf::File, path: &Path) -> Result<Vec<chrono::NaiveDateTime>> {
    let var = find_variable(file, &TIME_ALIASES)
        .ok_or_else(|| PipelineError::source_read(path, "no time coordinate"))?;
    let offsets: Vec<f64> = var
        .get_values(..)
        .map_err(|e| PipelineError::source_read(path, e))?;
    let units = string_attribute(&var, "units")
        .ok_or_else(|| PipelineError::source_read(path, "time coordinate has no units"))?;
    let calendar = string_attribute(&var, "calendar");

    decode_cf_times(&offsets, &units, calendar.as_deref())
        .map_err(|reason| PipelineError::source_read(path, reason))
}

fn string_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute(name)?.value().ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

fn numeric_attribute(var: &netcdf::Variable, name: &str) -> Option<f64> {
    use netcdf::AttributeValue as V;

    match var.attribute(name)?.value().ok()? {
        V::Float(v) => Some(v as f64),
        V::Double(v) => Some(v),
        V::Short(v) => Some(v as f64),
        V::Int(v) => Some(v as f64),
        V::Longlong(v) => Some(v as f64),
        V::Uchar(v) => Some(v as f64),
        V::Schar(v) => Some(v as f64),
        V::Ushort(v) => Some(v as f64),
        V::Uint(v) => Some(v as f64),
        _ => None,
    }
}
