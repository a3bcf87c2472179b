// src/explore/describe.rs
//! Per-column summaries of a normalized table.

use arrow::{
    array::{Array, ArrayRef, AsArray},
    compute::cast,
    datatypes::{DataType, Field, Float64Type},
    record_batch::RecordBatch,
};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::ExploreError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnSummary {
    Numeric {
        name: String,
        data_type: String,
        count: usize,
        nulls: usize,
        mean: Option<f64>,
        std: Option<f64>,
        min: Option<f64>,
        q25: Option<f64>,
        median: Option<f64>,
        q75: Option<f64>,
        max: Option<f64>,
    },
    Categorical {
        name: String,
        data_type: String,
        count: usize,
        nulls: usize,
        distinct: usize,
        top: Option<String>,
        top_count: usize,
    },
}

impl ColumnSummary {
    pub fn name(&self) -> &str {
        match self {
            ColumnSummary::Numeric { name, .. } | ColumnSummary::Categorical { name, .. } => name,
        }
    }
}

pub fn describe(batch: &RecordBatch) -> Result<Vec<ColumnSummary>, ExploreError> {
    let schema = batch.schema();
    schema
        .fields()
        .par_iter()
        .zip(batch.columns().par_iter())
        .map(|(field, array)| describe_column(field, array))
        .collect()
}

fn describe_column(field: &Field, array: &ArrayRef) -> Result<ColumnSummary, ExploreError> {
    let name = field.name().clone();
    let data_type = field.data_type().to_string();
    let nulls = array.null_count();
    let count = array.len() - nulls;

    if array.data_type().is_numeric() {
        let wide = cast(array, &DataType::Float64)?;
        let mut values: Vec<f64> = wide
            .as_primitive::<Float64Type>()
            .iter()
            .flatten()
            .filter(|v| !v.is_nan())
            .collect();
        values.sort_by(f64::total_cmp);
        let (mean, std) = moments(&values);
        return Ok(ColumnSummary::Numeric {
            name,
            data_type,
            count,
            nulls,
            mean,
            std,
            min: values.first().copied(),
            q25: quantile(&values, 0.25),
            median: quantile(&values, 0.5),
            q75: quantile(&values, 0.75),
            max: values.last().copied(),
        });
    }

    // everything else is summarized through its string form
    let strings = cast(array, &DataType::Utf8)?;
    let mut freq: HashMap<&str, usize> = HashMap::new();
    for s in strings.as_string::<i32>().iter().flatten() {
        *freq.entry(s).or_default() += 1;
    }
    let top = freq
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(s, n)| (s.to_string(), *n));
    Ok(ColumnSummary::Categorical {
        name,
        data_type,
        count,
        nulls,
        distinct: freq.len(),
        top_count: top.as_ref().map_or(0, |t| t.1),
        top: top.map(|t| t.0),
    })
}

/// Mean and sample standard deviation.
fn moments(values: &[f64]) -> (Option<f64>, Option<f64>) {
    let n = values.len();
    if n == 0 {
        return (None, None);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let std = (n > 1).then(|| {
        let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (n - 1) as f64).sqrt()
    });
    (Some(mean), std)
}

/// Linear-interpolation quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = q * last as f64;
    let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}
