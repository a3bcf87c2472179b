// src/model.rs
//! Boundary to the external pricing model.

use anyhow::Result;
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use parquet::file::metadata::KeyValue;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::store;

/// Consumes the two harmonized tables. The model itself lives outside this crate.
pub trait PricingModel {
    fn fit(&mut self, policies: &RecordBatch, claims: &RecordBatch) -> Result<()>;
}

/// Hands the tables over as Parquet files for an external fitting engine.
pub struct ModelInputExport {
    dir: PathBuf,
    prefix: String,
    written: Vec<PathBuf>,
}

impl ModelInputExport {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn write(&mut self, role: &str, batch: &RecordBatch) -> Result<()> {
        let path = self.dir.join(format!("{}_{}.parquet", self.prefix, role));
        let metadata = vec![
            KeyValue::new("freqsev.role".to_string(), role.to_string()),
            KeyValue::new(store::META_WRITTEN_AT.to_string(), Utc::now().to_rfc3339()),
        ];
        let bytes = store::write_parquet(&path, batch, metadata)?;
        info!(path = %path.display(), rows = batch.num_rows(), bytes, "model input written");
        self.written.push(path);
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PricingModel for ModelInputExport {
    #[instrument(level = "info", skip_all, fields(prefix = %self.prefix))]
    fn fit(&mut self, policies: &RecordBatch, claims: &RecordBatch) -> Result<()> {
        self.write("policies", policies)?;
        self.write("claims", claims)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float32Array, Int32Array};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::{fs::File, sync::Arc};
    use tempfile::tempdir;

    #[test]
    fn exports_both_tables() -> Result<()> {
        let dir = tempdir()?;
        let policies = RecordBatch::try_from_iter(vec![(
            "IDpol",
            Arc::new(Int32Array::from(vec![1, 2, 3])) as ArrayRef,
        )])?;
        let claims = RecordBatch::try_from_iter(vec![(
            "ClaimAmount",
            Arc::new(Float32Array::from(vec![10.5])) as ArrayRef,
        )])?;

        let mut model = ModelInputExport::new(dir.path().join("model"), "freMTPL2");
        model.fit(&policies, &claims)?;
        assert_eq!(model.written().len(), 2);
        assert!(model.written()[0].ends_with("freMTPL2_policies.parquet"));

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&model.written()[1])?)?
            .build()?;
        let rows: usize = reader.map(|b| b.map(|b| b.num_rows())).sum::<Result<_, _>>()?;
        assert_eq!(rows, 1);
        Ok(())
    }
}
