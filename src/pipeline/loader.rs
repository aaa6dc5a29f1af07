//! Lazy, restartable batch iteration over the sources of one split.

use super::assembler::{ExampleAssembler, TrainExample};
use super::normalization::NormalizationTable;
use super::selector::{self, Selection, SplitMask};
use crate::config::LoaderConfig;
use crate::error::{PipelineError, Result};
use crate::io::SourceReader;
use ndarray::{concatenate, Array1, Array2, Array3, ArrayView2, Axis};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Pixels of one or more sources, concatenated along the first axis
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `[pixels, time_steps, variables]`
    pub historical: Array3<f32>,
    /// `[pixels, covariates]`, nowcast only
    pub current: Option<Array2<f32>>,
    /// `[pixels]`
    pub target: Array1<f32>,
    /// `[pixels, 2]`
    pub latlons: Array2<f64>,
    /// `[pixels, 12]`, each source's month indicator repeated over its pixels
    pub pred_month_onehot: Array2<f32>,
    /// Sources contributing to this batch, in order
    pub sources: Vec<PathBuf>,
}

impl Batch {
    pub fn num_pixels(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    fn from_examples(examples: &[(PathBuf, TrainExample)]) -> Result<Self> {
        let stack_err = |e: ndarray::ShapeError| PipelineError::DataAlignment(e.to_string());

        let historical: Vec<_> = examples.iter().map(|(_, ex)| ex.historical.view()).collect();
        let target: Vec<_> = examples.iter().map(|(_, ex)| ex.target.view()).collect();

        let latlons: Vec<Array2<f64>> = examples
            .iter()
            .map(|(_, ex)| {
                ex.latlons
                    .clone()
                    .ok_or_else(|| {
                        PipelineError::DataAlignment("example without latlons".to_string())
                    })
            })
            .collect::<Result<_>>()?;
        let latlon_views: Vec<ArrayView2<f64>> = latlons.iter().map(|a| a.view()).collect();

        let months: Vec<Array2<f32>> = examples
            .iter()
            .map(|(_, ex)| {
                let onehot = ex.pred_month_onehot.view().insert_axis(Axis(0));
                onehot
                    .broadcast((ex.num_pixels(), onehot.ncols()))
                    .map(|b| b.to_owned())
                    .ok_or_else(|| PipelineError::DataAlignment("bad month indicator".to_string()))
            })
            .collect::<Result<_>>()?;
        let month_views: Vec<ArrayView2<f32>> = months.iter().map(|a| a.view()).collect();

        let current = if examples.iter().all(|(_, ex)| ex.current.is_some()) {
            let views: Vec<ArrayView2<f32>> = examples
                .iter()
                .filter_map(|(_, ex)| ex.current.as_ref().map(|c| c.view()))
                .collect();
            Some(concatenate(Axis(0), &views).map_err(stack_err)?)
        } else {
            None
        };

        Ok(Batch {
            historical: concatenate(Axis(0), &historical).map_err(stack_err)?,
            current,
            target: concatenate(Axis(0), &target).map_err(stack_err)?,
            latlons: concatenate(Axis(0), &latlon_views).map_err(stack_err)?,
            pred_month_onehot: concatenate(Axis(0), &month_views).map_err(stack_err)?,
            sources: examples.iter().map(|(source, _)| source.clone()).collect(),
        })
    }
}

/// Batch source of one split.
///
/// Construction validates the configuration and resolves the sources once,
/// so configuration problems surface before the first batch. Every call to
/// [`DataLoader::iter`] starts a fresh pass over the same sources.
pub struct DataLoader<R> {
    root: PathBuf,
    reader: R,
    config: LoaderConfig,
    normalization: Option<NormalizationTable>,
    mask: Option<SplitMask>,
}

impl<R: SourceReader> DataLoader<R> {
    pub fn new(
        root: impl Into<PathBuf>,
        reader: R,
        config: LoaderConfig,
        normalization: Option<NormalizationTable>,
        mask: Option<SplitMask>,
    ) -> Result<Self> {
        config.validate()?;
        let loader = Self {
            root: root.into(),
            reader,
            config,
            normalization,
            mask,
        };
        let sources = loader.sources()?;
        info!(
            root = %loader.root.display(),
            experiment = %loader.config.experiment,
            mode = ?loader.config.mode,
            sources = sources.len(),
            "created data loader"
        );
        Ok(loader)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Selected sources in enumeration order (before shuffling)
    pub fn sources(&self) -> Result<Vec<PathBuf>> {
        let selection = Selection {
            pred_months: self.config.pred_months.as_ref(),
            years: self.config.years.as_ref(),
            mask: self.mask.as_ref(),
        };
        selector::select(&self.root, self.config.mode, self.config.experiment, &selection)
    }

    /// Start a new pass over the split
    pub fn iter(&self) -> Result<BatchIter<'_, R>> {
        let mut sources = self.sources()?;
        if self.config.shuffle {
            selector::shuffle_sources(&mut sources, self.config.seed);
        }
        if sources.is_empty() {
            warn!(root = %self.root.display(), "no sources match the loader configuration");
        }

        Ok(BatchIter {
            assembler: ExampleAssembler::from_config(&self.reader, &self.config),
            config: &self.config,
            normalization: self.normalization.as_ref(),
            pending: sources.into_iter(),
            buffer: Vec::new(),
            consumed: 0,
            skipped: Vec::new(),
            finished: false,
        })
    }
}

/// One pass over a [`DataLoader`]'s sources.
///
/// Yields `Err` at most once, after which the iterator is exhausted.
pub struct BatchIter<'a, R> {
    assembler: ExampleAssembler<&'a R>,
    config: &'a LoaderConfig,
    normalization: Option<&'a NormalizationTable>,
    pending: std::vec::IntoIter<PathBuf>,
    buffer: Vec<(PathBuf, TrainExample)>,
    consumed: usize,
    skipped: Vec<PathBuf>,
    finished: bool,
}

impl<'a, R: SourceReader> BatchIter<'a, R> {
    /// Sources skipped so far because of recoverable failures
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    fn load(&self, source: &Path) -> Result<TrainExample> {
        let example = self
            .assembler
            .assemble(source, self.config.neighbor_radius(), true)?;
        match self.normalization {
            Some(table) => table.apply(example),
            None => Ok(example),
        }
    }

    fn ingest(&mut self, source: PathBuf) -> Result<()> {
        let example = self.load(&source)?;
        if let Some((_, first)) = self.buffer.first() {
            if first.historical_variables != example.historical_variables
                || first.current_variables != example.current_variables
                || first.num_timesteps() != example.num_timesteps()
            {
                return Err(PipelineError::DataAlignment(format!(
                    "{} has {} timesteps of {:?}, batch expects {} timesteps of {:?}",
                    source.display(),
                    example.num_timesteps(),
                    example.historical_variables,
                    first.num_timesteps(),
                    first.historical_variables
                )));
            }
        }
        self.buffer.push((source, example));
        Ok(())
    }

    fn flush(&mut self) -> Option<Result<Batch>> {
        self.consumed = 0;
        let examples = std::mem::take(&mut self.buffer);
        if examples.iter().all(|(_, ex)| ex.num_pixels() == 0) {
            return None;
        }
        let batch = Batch::from_examples(&examples);
        if let Ok(batch) = &batch {
            debug!(pixels = batch.num_pixels(), sources = batch.sources.len(), "emitting batch");
        }
        Some(batch)
    }
}

impl<'a, R: SourceReader> Iterator for BatchIter<'a, R> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let Some(source) = self.pending.next() else {
                self.finished = true;
                return self.flush();
            };

            match self.ingest(source.clone()) {
                Ok(()) => self.consumed += 1,
                Err(e) if e.is_recoverable() && !self.config.strict => {
                    warn!(source = %source.display(), error = %e, "skipping source");
                    self.skipped.push(source);
                    continue;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }

            if self.consumed >= self.config.batch_file_size {
                if let Some(batch) = self.flush() {
                    return Some(batch);
                }
            }
        }
    }
}
