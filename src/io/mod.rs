//! Read interface for per-period sources.
//!
//! The pipeline never decodes files itself; it asks a [`SourceReader`] for
//! the input and target datasets of a source directory.

pub mod grid;
pub mod memory_reader;
#[cfg(feature = "netcdf")]
pub mod netcdf_reader;

pub use grid::GridDataset;
pub use memory_reader::MemoryReader;
#[cfg(feature = "netcdf")]
pub use netcdf_reader::NetcdfReader;

use crate::error::{PipelineError, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// File name of the input dataset inside a source directory
pub const INPUT_FILE: &str = "x.nc";
/// File name of the target dataset inside a source directory
pub const TARGET_FILE: &str = "y.nc";

/// Input and target datasets of one prediction period
#[derive(Debug, Clone)]
pub struct PeriodData {
    /// Variables over the historical window (and the target timestep in nowcast)
    pub input: GridDataset,
    /// Single timestep holding the predicted variable
    pub target: GridDataset,
}

/// Provides the decoded datasets of a per-period source.
///
/// Implementations must release any file handle before returning, on
/// success and on error alike.
pub trait SourceReader {
    /// Read the input dataset of `source`
    fn read_input(&self, source: &Path) -> Result<GridDataset>;

    /// Read the target dataset of `source`
    fn read_target(&self, source: &Path) -> Result<GridDataset>;

    /// Read both datasets
    fn read_period(&self, source: &Path) -> Result<PeriodData> {
        Ok(PeriodData {
            input: self.read_input(source)?,
            target: self.read_target(source)?,
        })
    }
}

impl<R: SourceReader + ?Sized> SourceReader for &R {
    fn read_input(&self, source: &Path) -> Result<GridDataset> {
        (**self).read_input(source)
    }

    fn read_target(&self, source: &Path) -> Result<GridDataset> {
        (**self).read_target(source)
    }
}

impl<R: SourceReader + ?Sized> SourceReader for Box<R> {
    fn read_input(&self, source: &Path) -> Result<GridDataset> {
        self.as_ref().read_input(source)
    }

    fn read_target(&self, source: &Path) -> Result<GridDataset> {
        self.as_ref().read_target(source)
    }
}

/// Check if a file is in NetCDF format by examining magic bytes
///
/// NetCDF files start with specific magic bytes:
/// - Classic NetCDF: "CDF\001" or "CDF\002"
/// - NetCDF-4 (HDF5): "\211HDF\r\n\032\n"
pub fn is_netcdf_format(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Err(PipelineError::source_read(path, "file does not exist"));
    }

    if path.is_dir() {
        return Ok(false);
    }

    let mut file = File::open(path).map_err(|e| PipelineError::source_read(path, e))?;
    let mut buffer = [0u8; 8];

    match file.read_exact(&mut buffer) {
        Ok(_) => {
            if buffer[0..3] == [b'C', b'D', b'F'] && (buffer[3] == 1 || buffer[3] == 2) {
                return Ok(true);
            }
            Ok(buffer == [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'])
        }
        // Too short to carry a header
        Err(_) => Ok(false),
    }
}
