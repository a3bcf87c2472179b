// src/store/inspect.rs
//! Human-readable summary of a store file's footer.

use anyhow::{Context, Result};
use parquet::file::{
    metadata::{ColumnChunkMetaData, RowGroupMetaData},
    reader::{FileReader, SerializedFileReader},
};
use std::{fmt::Write, fs::File, path::Path};

use super::{META_DATASET, META_SOURCE, META_WRITTEN_AT};

/// Describe a Parquet file: provenance, columns and per-row-group sizes.
pub fn inspect(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = SerializedFileReader::new(file)
        .with_context(|| format!("reading parquet footer of {}", path.display()))?;
    let meta = reader.metadata();
    let file_meta = meta.file_metadata();
    let size_on_disk = std::fs::metadata(path)?.len();

    let lookup = |key: &str| {
        file_meta
            .key_value_metadata()
            .and_then(|kv| kv.iter().find(|e| e.key == key))
            .and_then(|e| e.value.clone())
            .unwrap_or_else(|| "<unknown>".to_string())
    };

    let mut out = String::new();
    writeln!(out, "=== {} ===", path.display())?;
    writeln!(out, "Dataset:        {}", lookup(META_DATASET))?;
    writeln!(out, "Source:         {}", lookup(META_SOURCE))?;
    writeln!(out, "Written at:     {}", lookup(META_WRITTEN_AT))?;
    writeln!(out, "Created by:     {}", file_meta.created_by().unwrap_or("<unknown>"))?;
    writeln!(out, "Rows:           {}", file_meta.num_rows())?;
    writeln!(out, "Row groups:     {}", meta.num_row_groups())?;
    writeln!(out, "Size on disk:   {} bytes", size_on_disk)?;

    writeln!(out, "--- Columns ---")?;
    for col in file_meta.schema_descr().columns() {
        let logical = col
            .logical_type()
            .map_or("<none>".to_string(), |lt| format!("{:?}", lt));
        writeln!(
            out,
            "- {:<24} | {:<10} | {}",
            col.name(),
            format!("{:?}", col.physical_type()),
            logical
        )?;
    }

    for (idx, rg) in meta.row_groups().iter().enumerate() {
        write_row_group(&mut out, idx, rg)?;
    }
    Ok(out)
}

fn write_row_group(out: &mut String, idx: usize, rg: &RowGroupMetaData) -> std::fmt::Result {
    writeln!(
        out,
        "--- Row group {} ({} rows, {} bytes uncompressed) ---",
        idx,
        rg.num_rows(),
        rg.total_byte_size()
    )?;
    for col in rg.columns() {
        write_column_chunk(out, col)?;
    }
    Ok(())
}

fn write_column_chunk(out: &mut String, col: &ColumnChunkMetaData) -> std::fmt::Result {
    let nulls = col
        .statistics()
        .and_then(|s| s.null_count_opt())
        .map_or("?".to_string(), |n| n.to_string());
    writeln!(
        out,
        "  {:<24} {:?} {} -> {} bytes, nulls {}",
        col.column_descr().name(),
        col.compression(),
        col.uncompressed_size(),
        col.compressed_size(),
        nulls
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasetDescriptor;
    use arrow::array::{ArrayRef, Float32Array, Int8Array};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn reports_provenance_and_columns() -> Result<()> {
        let dir = tempdir()?;
        let desc = DatasetDescriptor {
            name: "freMTPL2sev".into(),
            url: "https://example.org/freMTPL2sev.rda".into(),
            object: None,
            raw_path: dir.path().join("freMTPL2sev.rda"),
            store_path: dir.path().join("freMTPL2sev.parquet"),
        };
        let batch = RecordBatch::try_from_iter(vec![
            ("IDpol", Arc::new(Int8Array::from(vec![1, 2, 3])) as ArrayRef),
            ("ClaimAmount", Arc::new(Float32Array::from(vec![Some(1.0), None, Some(9.5)])) as ArrayRef),
        ])?;
        super::super::persist(&desc, &batch)?;

        let text = inspect(&desc.store_path)?;
        assert!(text.contains("Dataset:        freMTPL2sev"), "{text}");
        assert!(text.contains("Rows:           3"));
        assert!(text.contains("ClaimAmount"));
        assert!(text.contains("ZSTD"));
        Ok(())
    }
}
