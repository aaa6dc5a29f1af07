pub mod config;
pub mod error;
pub mod io;
pub mod math;
pub mod pipeline;
pub mod time_utils;

pub use config::{Experiment, LoaderConfig, Mode};
pub use error::{PipelineError, Result};
pub use io::{GridDataset, MemoryReader, PeriodData, SourceReader};
pub use pipeline::{
    Batch, DataLoader, ExampleAssembler, NormalizationTable, SplitMask, TrainExample,
};
