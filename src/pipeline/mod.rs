// src/pipeline/mod.rs
//! Per-dataset ingestion: store hit, or fetch → read → normalize → persist.

use anyhow::anyhow;
use arrow::record_batch::RecordBatch;
use futures::{stream, StreamExt};
use serde::Serialize;
use std::fmt;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::{
    config::DatasetDescriptor,
    error::PipelineError,
    fetch::Fetcher,
    normalize::{self, NormalizeReport},
    rdata, store,
};

/// Whether an existing store file may stand in for the full chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Load the store file when it is present and readable.
    Reuse,
    /// Always fetch and rebuild.
    Rebuild,
}

impl CachePolicy {
    pub fn from_refresh(refresh: bool) -> Self {
        if refresh {
            CachePolicy::Rebuild
        } else {
            CachePolicy::Reuse
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Cache,
    Fetched,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Origin::Cache => "cache",
            Origin::Fetched => "fetched",
        })
    }
}

/// A dataset's normalized table and how it was obtained.
#[derive(Debug)]
pub struct Loaded {
    pub batch: RecordBatch,
    pub origin: Origin,
    pub store_bytes: u64,
    pub normalize: Option<NormalizeReport>,
}

#[derive(Debug)]
pub struct DatasetOutcome {
    pub name: String,
    pub result: Result<Loaded, PipelineError>,
}

impl DatasetOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn batch(&self) -> Option<&RecordBatch> {
        self.result.as_ref().ok().map(|l| &l.batch)
    }
}

/// The per-dataset status line.
impl fmt::Display for DatasetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(l) => write!(
                f,
                "{:<14} ok      {:<7} {} rows x {} cols, {} bytes stored",
                self.name,
                l.origin,
                l.batch.num_rows(),
                l.batch.num_columns(),
                l.store_bytes
            ),
            Err(e) => write!(f, "{:<14} FAILED  {:<7} {}", self.name, e.stage(), e),
        }
    }
}

async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow!("blocking task failed: {e}"))?
}

/// Produce the normalized table for one dataset.
#[instrument(level = "info", skip(fetcher, desc), fields(dataset = %desc.name))]
pub async fn run_dataset(
    fetcher: &dyn Fetcher,
    desc: &DatasetDescriptor,
    policy: CachePolicy,
) -> Result<Loaded, PipelineError> {
    let start = Instant::now();

    if policy == CachePolicy::Reuse {
        let d = desc.clone();
        match blocking(move || store::load(&d)).await {
            Ok(batch) => {
                let store_bytes = std::fs::metadata(&desc.store_path)
                    .map(|m| m.len())
                    .unwrap_or(0);
                info!(rows = batch.num_rows(), elapsed = ?start.elapsed(), "store hit");
                return Ok(Loaded {
                    batch,
                    origin: Origin::Cache,
                    store_bytes,
                    normalize: None,
                });
            }
            Err(e) if desc.store_path.exists() => {
                warn!(error = %format!("{e:#}"), "store file unusable, rebuilding");
            }
            Err(_) => info!("not in store"),
        }
    }

    fetcher
        .fetch(desc)
        .await
        .map_err(|source| PipelineError::Fetch {
            dataset: desc.name.clone(),
            url: desc.url.clone(),
            source,
        })?;

    let (raw_path, object) = (desc.raw_path.clone(), desc.object.clone());
    let raw = blocking(move || rdata::read_table(&raw_path, object.as_deref()))
        .await
        .map_err(|source| PipelineError::Parse {
            dataset: desc.name.clone(),
            path: desc.raw_path.clone(),
            source,
        })?;

    // the raw table is moved into the normalizer and released there
    let (batch, report) = blocking(move || normalize::normalize(raw))
        .await
        .map_err(|source| PipelineError::Normalize {
            dataset: desc.name.clone(),
            source,
        })?;

    let (d, b) = (desc.clone(), batch.clone());
    let stats = blocking(move || store::persist(&d, &b))
        .await
        .map_err(|source| PipelineError::Store {
            dataset: desc.name.clone(),
            path: desc.store_path.clone(),
            source,
        })?;

    info!(rows = stats.rows, bytes = stats.bytes, elapsed = ?start.elapsed(), "built");
    Ok(Loaded {
        batch,
        origin: Origin::Fetched,
        store_bytes: stats.bytes,
        normalize: Some(report),
    })
}

/// Run every dataset, at most `max_concurrency` at a time. A failing dataset
/// never stops the others; outcomes come back in descriptor order.
#[instrument(level = "info", skip_all, fields(datasets = descriptors.len(), ?policy))]
pub async fn run_batch(
    fetcher: &dyn Fetcher,
    descriptors: &[DatasetDescriptor],
    policy: CachePolicy,
    max_concurrency: usize,
) -> Vec<DatasetOutcome> {
    let mut outcomes: Vec<(usize, DatasetOutcome)> = stream::iter(descriptors.iter().enumerate())
        .map(|(idx, desc)| async move {
            let result = run_dataset(fetcher, desc, policy).await;
            if let Err(e) = &result {
                error!(dataset = %desc.name, stage = %e.stage(), "{e}");
            }
            let outcome = DatasetOutcome {
                name: desc.name.clone(),
                result,
            };
            (idx, outcome)
        })
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;

    outcomes.sort_by_key(|(idx, _)| *idx);
    outcomes.into_iter().map(|(_, o)| o).collect()
}
