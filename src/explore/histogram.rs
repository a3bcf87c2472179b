// src/explore/histogram.rs
//! Equal-width histogram of a numeric column with an explicit out-of-range policy.

use arrow::{
    array::{Array, AsArray},
    compute::cast,
    datatypes::{DataType, Float64Type},
};
use serde::Serialize;
use tracing::warn;

use crate::config::{HistogramConfig, OutOfRange};
use crate::error::ExploreError;

/// `bins` equal-width bins over `[min, max]`. Every bin is half-open except
/// the last, which includes `max`.
///
/// Counting invariants:
/// - `Exclude`: `binned() + underflow + overflow + skipped == total`
/// - `Clamp`: `binned() + skipped == total` (underflow/overflow record how many
///   values were folded into the edge bins)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub counts: Vec<u64>,
    pub out_of_range: OutOfRange,
    pub underflow: u64,
    pub overflow: u64,
    /// Nulls, NaN and infinities.
    pub skipped: u64,
    pub total: u64,
    /// Largest finite value seen, in or out of the domain.
    pub max: Option<f64>,
    pub min: Option<f64>,
}

impl Histogram {
    pub fn build<I>(values: I, cfg: &HistogramConfig) -> Result<Self, ExploreError>
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let (lo, hi, bins) = (cfg.bin_min, cfg.bin_max, cfg.bins);
        if bins == 0 || !lo.is_finite() || !hi.is_finite() || lo >= hi {
            return Err(ExploreError::InvalidDomain {
                min: lo,
                max: hi,
                bins,
            });
        }
        let width = (hi - lo) / bins as f64;
        let mut edges: Vec<f64> = (0..bins).map(|i| lo + i as f64 * width).collect();
        edges.push(hi);

        let mut h = Histogram {
            edges,
            counts: vec![0; bins],
            out_of_range: cfg.out_of_range,
            underflow: 0,
            overflow: 0,
            skipped: 0,
            total: 0,
            max: None,
            min: None,
        };

        for v in values {
            h.total += 1;
            let v = match v {
                Some(v) if v.is_finite() => v,
                _ => {
                    h.skipped += 1;
                    continue;
                }
            };
            h.max = Some(h.max.map_or(v, |m| m.max(v)));
            h.min = Some(h.min.map_or(v, |m| m.min(v)));

            let idx = if v < lo {
                h.underflow += 1;
                match h.out_of_range {
                    OutOfRange::Exclude => continue,
                    OutOfRange::Clamp => 0,
                }
            } else if v > hi {
                h.overflow += 1;
                match h.out_of_range {
                    OutOfRange::Exclude => continue,
                    OutOfRange::Clamp => bins - 1,
                }
            } else {
                (((v - lo) / width) as usize).min(bins - 1)
            };
            h.counts[idx] += 1;
        }

        if h.underflow + h.overflow > 0 {
            warn!(
                underflow = h.underflow,
                overflow = h.overflow,
                policy = ?h.out_of_range,
                max = ?h.max,
                "values outside histogram domain [{lo}, {hi}]"
            );
        }
        Ok(h)
    }

    pub fn binned(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn bins(&self) -> impl Iterator<Item = (f64, f64, u64)> + '_ {
        self.edges
            .windows(2)
            .zip(&self.counts)
            .map(|(w, &c)| (w[0], w[1], c))
    }
}

/// A numeric column as optional `f64`s, nulls kept in place.
pub fn column_values(array: &dyn Array, column: &str) -> Result<Vec<Option<f64>>, ExploreError> {
    if !array.data_type().is_numeric() {
        return Err(ExploreError::UnsupportedType {
            column: column.to_string(),
            data_type: array.data_type().clone(),
            usage: "a histogram variable",
        });
    }
    let wide = cast(array, &DataType::Float64)?;
    Ok(wide.as_primitive::<Float64Type>().iter().collect())
}
