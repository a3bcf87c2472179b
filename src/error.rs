// src/error.rs

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The pipeline stage a dataset failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Stage {
    Fetch,
    Parse,
    Normalize,
    Store,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Normalize => "normalize",
            Stage::Store => "store",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A per-dataset failure. Each variant names the dataset and keeps the
/// underlying cause chain intact.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetching `{dataset}` from {url}: {source:#}")]
    Fetch {
        dataset: String,
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("parsing `{dataset}` ({}): {source:#}", .path.display())]
    Parse {
        dataset: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("normalizing `{dataset}`: {source:#}")]
    Normalize {
        dataset: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("columnar store for `{dataset}` ({}): {source:#}", .path.display())]
    Store {
        dataset: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Fetch { .. } => Stage::Fetch,
            PipelineError::Parse { .. } => Stage::Parse,
            PipelineError::Normalize { .. } => Stage::Normalize,
            PipelineError::Store { .. } => Stage::Store,
        }
    }

    pub fn dataset(&self) -> &str {
        match self {
            PipelineError::Fetch { dataset, .. }
            | PipelineError::Parse { dataset, .. }
            | PipelineError::Normalize { dataset, .. }
            | PipelineError::Store { dataset, .. } => dataset,
        }
    }
}

/// Failures of the reconciliation & exploration engine.
#[derive(Debug, Error)]
pub enum ExploreError {
    #[error("column `{column}` not found in `{table}`")]
    MissingColumn { table: String, column: String },

    #[error("column `{column}` has type {data_type}, which cannot be used as {usage}")]
    UnsupportedType {
        column: String,
        data_type: arrow::datatypes::DataType,
        usage: &'static str,
    },

    #[error("invalid histogram domain [{min}, {max}] with {bins} bins")]
    InvalidDomain { min: f64, max: f64, bins: usize },

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
}
