// src/explore/mod.rs
//! Read-only analysis of a policy table and its claims table.

pub mod describe;
pub mod histogram;
pub mod reconcile;
pub mod sample;

use arrow::{array::ArrayRef, record_batch::RecordBatch};
use serde::Serialize;
use std::fmt;
use tracing::{info, instrument, warn};

use crate::config::{HistogramConfig, PairSpec};
use crate::error::ExploreError;

pub use describe::{describe, ColumnSummary};
pub use histogram::Histogram;
pub use reconcile::{ClaimUniqueness, Reconciliation};

/// A named table, so errors can say which side a column is missing from.
#[derive(Debug, Clone, Copy)]
pub struct Table<'a> {
    pub name: &'a str,
    pub batch: &'a RecordBatch,
}

impl<'a> Table<'a> {
    pub fn new(name: &'a str, batch: &'a RecordBatch) -> Self {
        Self { name, batch }
    }
}

pub fn column<'a>(table: Table<'a>, name: &str) -> Result<&'a ArrayRef, ExploreError> {
    table
        .batch
        .column_by_name(name)
        .ok_or_else(|| ExploreError::MissingColumn {
            table: table.name.to_string(),
            column: name.to_string(),
        })
}

#[derive(Debug, Clone, Serialize)]
pub struct PairReport {
    pub policies: String,
    pub claims: String,
    pub key: String,
    pub amount: String,
    pub reconciliation: Reconciliation,
    pub histogram: Histogram,
    pub policy_columns: Vec<ColumnSummary>,
    pub claim_columns: Vec<ColumnSummary>,
}

/// Reconcile the claims against the policies and histogram the claim amounts.
#[instrument(level = "info", skip_all, fields(policies = %pair.policies, claims = %pair.claims))]
pub fn explore_pair(
    pair: &PairSpec,
    policies: &RecordBatch,
    claims: &RecordBatch,
    hist: &HistogramConfig,
) -> Result<PairReport, ExploreError> {
    let p = Table::new(&pair.policies, policies);
    let c = Table::new(&pair.claims, claims);

    let policy_keys = reconcile::policy_keys(column(p, &pair.key)?.as_ref(), &pair.key)?;
    let claim_keys = reconcile::policy_keys(column(c, &pair.key)?.as_ref(), &pair.key)?;
    let claim_count_total = match &pair.claim_count {
        Some(name) => Some(reconcile::column_total(column(p, name)?.as_ref(), name)?),
        None => None,
    };
    let reconciliation = reconcile::reconcile(&policy_keys, &claim_keys, claim_count_total);
    if reconciliation.claim_count_consistent() == Some(false) {
        warn!(
            claim_count_total,
            claim_rows = reconciliation.claim_rows,
            "policy claim counter disagrees with the claims table"
        );
    }

    let amounts = histogram::column_values(column(c, &pair.amount)?.as_ref(), &pair.amount)?;
    let histogram = Histogram::build(amounts, hist)?;

    let report = PairReport {
        policies: pair.policies.clone(),
        claims: pair.claims.clone(),
        key: pair.key.clone(),
        amount: pair.amount.clone(),
        reconciliation,
        histogram,
        policy_columns: describe(policies)?,
        claim_columns: describe(claims)?,
    };
    info!(
        claims = report.reconciliation.claim_rows,
        distinct = report.reconciliation.distinct_policies,
        non_unique = report.reconciliation.non_unique,
        max_amount = ?report.histogram.max,
        "explored"
    );
    Ok(report)
}

/// Finite values of the amount column, as handed to a histogram renderer.
pub fn amount_series(pair: &PairSpec, claims: &RecordBatch) -> Result<Vec<f64>, ExploreError> {
    let c = Table::new(&pair.claims, claims);
    Ok(histogram::column_values(column(c, &pair.amount)?.as_ref(), &pair.amount)?
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .collect())
}

fn opt(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

impl fmt::Display for PairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.reconciliation;
        let h = &self.histogram;
        writeln!(f, "=== {} / {} (key {}) ===", self.policies, self.claims, self.key)?;
        writeln!(f, "policies:                 {}", r.policy_rows)?;
        writeln!(f, "claims (N):               {}", r.claim_rows)?;
        writeln!(f, "distinct policies (U):    {}", r.distinct_policies)?;
        writeln!(f, "non-unique (N - U):       {}", r.non_unique)?;
        writeln!(f, "policies with 2+ claims:  {}", r.multi_claim_policies)?;
        writeln!(f, "max claims on a policy:   {}", r.max_claims_per_policy)?;
        writeln!(f, "uniqueness U/N:           {}", r.uniqueness)?;
        writeln!(
            f,
            "policies without claims:  {} ({})",
            r.policies_without_claims,
            r.zero_claim_share
                .map_or_else(|| "-".to_string(), |s| format!("{:.2}%", s * 100.0))
        )?;
        writeln!(f, "orphan claims:            {}", r.orphan_claims)?;
        if let Some(total) = r.claim_count_total {
            writeln!(f, "claim counter total:      {}", total)?;
        }
        if r.claims_without_key > 0 {
            writeln!(f, "claims without key:       {}", r.claims_without_key)?;
        }
        writeln!(
            f,
            "{}: {} bins over [{}, {}], {:?} out-of-range values",
            self.amount,
            h.counts.len(),
            h.edges.first().copied().unwrap_or_default(),
            h.edges.last().copied().unwrap_or_default(),
            h.out_of_range
        )?;
        writeln!(
            f,
            "  binned {} / underflow {} / overflow {} / skipped {} of {}",
            h.binned(),
            h.underflow,
            h.overflow,
            h.skipped,
            h.total
        )?;
        write!(f, "  min {}  max {}", opt(h.min), opt(h.max))
    }
}
