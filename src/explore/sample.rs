// src/explore/sample.rs
//! Seeded policy subsets for the pricing model.

use arrow::{
    array::{BooleanArray, UInt32Array},
    compute::{filter_record_batch, take_record_batch},
    record_batch::RecordBatch,
};
use rand::{rngs::StdRng, SeedableRng};
use std::collections::HashSet;

use super::reconcile::policy_keys;
use super::{column, Table};
use crate::error::ExploreError;

/// `n` rows drawn without replacement, kept in their original order.
/// The same seed always picks the same rows.
pub fn sample_rows(batch: &RecordBatch, n: usize, seed: u64) -> Result<RecordBatch, ExploreError> {
    if n >= batch.num_rows() {
        return Ok(batch.clone());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, batch.num_rows(), n).into_vec();
    picked.sort_unstable();
    let indices = UInt32Array::from_iter_values(picked.into_iter().map(|i| i as u32));
    Ok(take_record_batch(batch, &indices)?)
}

/// The two tables handed to the pricing model: a seeded sample of
/// `sample_size` policies (all of them when `None`) and exactly the claims
/// that reference a sampled policy.
pub fn model_inputs(
    policies: Table<'_>,
    claims: Table<'_>,
    key: &str,
    sample_size: Option<usize>,
    seed: u64,
) -> Result<(RecordBatch, RecordBatch), ExploreError> {
    let Some(n) = sample_size else {
        return Ok((policies.batch.clone(), claims.batch.clone()));
    };
    let sampled = sample_rows(policies.batch, n, seed)?;

    let sampled_keys = column(Table::new(policies.name, &sampled), key)?;
    let keep: HashSet<_> = policy_keys(sampled_keys.as_ref(), key)?
        .into_iter()
        .flatten()
        .collect();

    let claim_keys = policy_keys(column(claims, key)?.as_ref(), key)?;
    let mask: BooleanArray = claim_keys
        .iter()
        .map(|k| Some(k.as_ref().is_some_and(|k| keep.contains(k))))
        .collect();
    let kept_claims = filter_record_batch(claims.batch, &mask)?;
    Ok((sampled, kept_claims))
}
