use std::path::PathBuf;
use thiserror::Error;

/// Error type shared by every stage of the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data alignment error: {0}")]
    DataAlignment(String),

    #[error("Variable not found: {0}")]
    MissingVariable(String),

    #[error("Could not read source {path:?}: {reason}")]
    SourceRead { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Build a [`PipelineError::SourceRead`] for `path`
    pub fn source_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::SourceRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure is confined to one source.
    ///
    /// Recoverable errors are skipped by a non-strict loader; everything else
    /// aborts the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::DataAlignment(_)
                | PipelineError::MissingVariable(_)
                | PipelineError::SourceRead { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
