//! Windowing, feature assembly, normalization and batching.

pub mod assembler;
pub mod loader;
pub mod neighbors;
pub mod normalization;
pub mod selector;
#[cfg(feature = "burn")]
pub mod tensor;

pub use assembler::{ExampleAssembler, TrainExample};
pub use loader::{Batch, BatchIter, DataLoader};
pub use neighbors::expand as expand_neighbors;
pub use normalization::{NormalizationEntry, NormalizationTable, TargetPolicy};
pub use selector::{select, Selection, SplitMask};
#[cfg(feature = "burn")]
pub use tensor::TensorBatch;
