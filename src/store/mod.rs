// src/store/mod.rs
//! Parquet-backed columnar cache: one file per dataset.

pub mod inspect;

use anyhow::{bail, Context, Result};
use arrow::{compute::concat_batches, datatypes::Schema, record_batch::RecordBatch};
use chrono::Utc;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::{Compression, ZstdLevel},
    file::{metadata::KeyValue, properties::WriterProperties},
};
use std::{
    collections::HashMap,
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, instrument};

use crate::config::DatasetDescriptor;

pub const META_DATASET: &str = "freqsev.dataset";
pub const META_SOURCE: &str = "freqsev.source";
pub const META_WRITTEN_AT: &str = "freqsev.written_at";

const OUR_KEYS: &[&str] = &[META_DATASET, META_SOURCE, META_WRITTEN_AT];

/// What `persist` wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: u64,
}

fn writer_props(metadata: Vec<KeyValue>) -> Result<WriterProperties> {
    Ok(WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::try_new(3)?))
        .set_dictionary_enabled(true)
        .set_key_value_metadata(Some(metadata))
        .build())
}

/// Write `batch` to the descriptor's store path, stamped with the dataset
/// name, source URL and write time.
#[instrument(level = "info", skip(desc, batch), fields(dataset = %desc.name))]
pub fn persist(desc: &DatasetDescriptor, batch: &RecordBatch) -> Result<StoreStats> {
    let metadata = vec![
        KeyValue::new(META_DATASET.to_string(), desc.name.clone()),
        KeyValue::new(META_SOURCE.to_string(), desc.url.clone()),
        KeyValue::new(META_WRITTEN_AT.to_string(), Utc::now().to_rfc3339()),
    ];
    let bytes = write_parquet(&desc.store_path, batch, metadata)?;
    debug!(rows = batch.num_rows(), bytes, "persisted");
    Ok(StoreStats {
        path: desc.store_path.clone(),
        rows: batch.num_rows(),
        bytes,
    })
}

/// Write one batch as a Parquet file, replacing any previous file at `path`
/// only once the new one is complete. Returns the file size.
pub fn write_parquet(path: &Path, batch: &RecordBatch, metadata: Vec<KeyValue>) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let temp_path = path.with_extension("parquet.tmp");

    if let Err(e) = write_file(&temp_path, batch, metadata) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    fs::rename(&temp_path, path).with_context(|| {
        format!("renaming {} -> {}", temp_path.display(), path.display())
    })?;

    Ok(fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len())
}

fn write_file(temp_path: &Path, batch: &RecordBatch, metadata: Vec<KeyValue>) -> Result<()> {
    let file = File::create(temp_path)
        .with_context(|| format!("creating {}", temp_path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_props(metadata)?))
        .context("opening parquet writer")?;
    writer.write(batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

/// Read the descriptor's store file back into one record batch.
///
/// A file written for another dataset name or source URL is stale and
/// rejected, so the caller rebuilds it.
#[instrument(level = "info", skip(desc), fields(dataset = %desc.name))]
pub fn load(desc: &DatasetDescriptor) -> Result<RecordBatch> {
    let path = &desc.store_path;
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet footer of {}", path.display()))?;

    let kv: HashMap<&str, &str> = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.value.as_deref().map(|v| (e.key.as_str(), v)))
                .collect()
        })
        .unwrap_or_default();
    for (key, expected) in [(META_DATASET, &desc.name), (META_SOURCE, &desc.url)] {
        match kv.get(key) {
            Some(found) if found == expected => {}
            Some(found) => bail!("stale store file: {} is `{}`, expected `{}`", key, found, expected),
            None => bail!("store file has no `{}` metadata", key),
        }
    }

    let schema = builder.schema().clone();
    let reader = builder.build().context("building parquet reader")?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("decoding row groups")?;
    let batch = concat_batches(&schema, &batches).context("concatenating row groups")?;

    // drop the bookkeeping keys so a loaded table equals the persisted one
    let metadata = schema
        .metadata()
        .iter()
        .filter(|(k, _)| !OUR_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let clean = Arc::new(Schema::new_with_metadata(schema.fields().clone(), metadata));
    let batch = RecordBatch::try_new_with_options(
        clean,
        batch.columns().to_vec(),
        &arrow::record_batch::RecordBatchOptions::new().with_row_count(Some(batch.num_rows())),
    )?;
    debug!(rows = batch.num_rows(), cols = batch.num_columns(), "loaded");
    Ok(batch)
}
