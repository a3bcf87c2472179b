// src/normalize/mod.rs

use anyhow::{Context, Result};
use arrow::{
    array::{Array, ArrayRef, AsArray},
    compute::{cast, max, min},
    datatypes::{DataType, Field, Float64Type, Int16Type, Int32Type, Int64Type, Schema},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Per-column outcome of a normalization pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnChange {
    pub name: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeReport {
    pub changes: Vec<ColumnChange>,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

/// Rewrite every numeric column to its narrowest adequate type.
///
/// Row count and order never change; non-numeric columns are passed through
/// as the same array. The input batch is consumed so its buffers can be
/// released as soon as the narrowed batch exists.
#[instrument(level = "info", skip(batch), fields(rows = batch.num_rows(), cols = batch.num_columns()))]
pub fn normalize(batch: RecordBatch) -> Result<(RecordBatch, NormalizeReport)> {
    let schema = batch.schema();
    let bytes_before = batch.get_array_memory_size();

    let narrowed: Vec<(ArrayRef, Option<ColumnChange>)> = schema
        .fields()
        .par_iter()
        .zip(batch.columns().par_iter())
        .map(|(field, array)| -> Result<(ArrayRef, Option<ColumnChange>)> {
            let target = narrowest_type(array.as_ref());
            match target {
                Some(dt) if &dt != array.data_type() => {
                    let out = cast(array, &dt)
                        .with_context(|| format!("casting `{}` to {}", field.name(), dt))?;
                    let change = ColumnChange {
                        name: field.name().clone(),
                        from: array.data_type().to_string(),
                        to: dt.to_string(),
                    };
                    Ok((out, Some(change)))
                }
                _ => Ok((array.clone(), None)),
            }
        })
        .collect::<Result<_>>()?;

    let mut fields = Vec::with_capacity(narrowed.len());
    let mut arrays = Vec::with_capacity(narrowed.len());
    let mut changes = Vec::new();
    for (field, (array, change)) in schema.fields().iter().zip(narrowed) {
        fields.push(Field::new(field.name(), array.data_type().clone(), field.is_nullable())
            .with_metadata(field.metadata().clone()));
        arrays.push(array);
        if let Some(c) = change {
            debug!(column = %c.name, from = %c.from, to = %c.to, "downcast");
            changes.push(c);
        }
    }

    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    let out_schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    let out = RecordBatch::try_new_with_options(out_schema, arrays, &options)
        .context("assembling normalized batch")?;
    drop(batch);

    let report = NormalizeReport {
        changes,
        bytes_before,
        bytes_after: out.get_array_memory_size(),
    };
    info!(
        downcast = report.changes.len(),
        bytes_before = report.bytes_before,
        bytes_after = report.bytes_after,
        "normalized"
    );
    Ok((out, report))
}

/// The type a column should be narrowed to, `None` when it is left alone.
pub fn narrowest_type(array: &dyn Array) -> Option<DataType> {
    match array.data_type() {
        DataType::Float64 => {
            let fits = array
                .as_primitive::<Float64Type>()
                .iter()
                .flatten()
                .filter(|v| v.is_finite() && *v != 0.0)
                // subnormal f32 values would lose relative precision
                .all(|v| {
                    (f32::MIN_POSITIVE as f64..=f32::MAX as f64).contains(&v.abs())
                        && (v.fract() != 0.0 || (v as f32) as f64 == v)
                });
            fits.then_some(DataType::Float32)
        }
        DataType::Int16 => Some(int_width(
            min(array.as_primitive::<Int16Type>()).map(i64::from),
            max(array.as_primitive::<Int16Type>()).map(i64::from),
        )),
        DataType::Int32 => Some(int_width(
            min(array.as_primitive::<Int32Type>()).map(i64::from),
            max(array.as_primitive::<Int32Type>()).map(i64::from),
        )),
        DataType::Int64 => Some(int_width(
            min(array.as_primitive::<Int64Type>()),
            max(array.as_primitive::<Int64Type>()),
        )),
        _ => None,
    }
}

/// Narrowest signed integer type holding `[lo, hi]`; all-null columns get Int8.
fn int_width(lo: Option<i64>, hi: Option<i64>) -> DataType {
    let (lo, hi) = match (lo, hi) {
        (Some(lo), Some(hi)) => (lo, hi),
        _ => return DataType::Int8,
    };
    if lo >= i8::MIN as i64 && hi <= i8::MAX as i64 {
        DataType::Int8
    } else if lo >= i16::MIN as i64 && hi <= i16::MAX as i64 {
        DataType::Int16
    } else if lo >= i32::MIN as i64 && hi <= i32::MAX as i64 {
        DataType::Int32
    } else {
        DataType::Int64
    }
}
