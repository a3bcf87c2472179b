// src/explore/reconcile.rs
//! Policy-to-claim cardinality: how many policies carry zero, one or several claims.

use arrow::{
    array::{Array, AsArray},
    compute::cast,
    datatypes::{DataType, Float64Type, Int64Type},
};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
};

use crate::error::ExploreError;

/// A policy identifier, whatever its column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKey {
    Int(i64),
    /// Bit pattern of a float key with a fractional part.
    Float(u64),
    Str(String),
}

/// Extract policy keys from a column. Integral float keys become `Int`, so a
/// Float32 key column matches an Int32 one holding the same identifiers.
pub fn policy_keys(array: &dyn Array, column: &str) -> Result<Vec<Option<PolicyKey>>, ExploreError> {
    let dt = array.data_type();
    if dt.is_integer() {
        let wide = cast(array, &DataType::Int64)?;
        return Ok(wide
            .as_primitive::<Int64Type>()
            .iter()
            .map(|v| v.map(PolicyKey::Int))
            .collect());
    }
    if dt.is_floating() {
        let wide = cast(array, &DataType::Float64)?;
        return Ok(wide
            .as_primitive::<Float64Type>()
            .iter()
            .map(|v| {
                v.filter(|v| !v.is_nan()).map(|v| {
                    if v.fract() == 0.0 && v.abs() < 9.0e15 {
                        PolicyKey::Int(v as i64)
                    } else {
                        PolicyKey::Float(v.to_bits())
                    }
                })
            })
            .collect());
    }
    match dt {
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View | DataType::Dictionary(_, _) => {
            let strings = cast(array, &DataType::Utf8)?;
            Ok(strings
                .as_string::<i32>()
                .iter()
                .map(|v| v.map(|s| PolicyKey::Str(s.to_string())))
                .collect())
        }
        other => Err(ExploreError::UnsupportedType {
            column: column.to_string(),
            data_type: other.clone(),
            usage: "a policy key",
        }),
    }
}

/// `distinct / rows` over the claims table, undefined without claims.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClaimUniqueness {
    NoClaims,
    Ratio { distinct_per_claim: f64 },
}

impl fmt::Display for ClaimUniqueness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimUniqueness::NoClaims => f.write_str("no claims"),
            ClaimUniqueness::Ratio { distinct_per_claim } => write!(f, "{distinct_per_claim:.4}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    /// N: rows in the claims table.
    pub claim_rows: usize,
    /// Claim rows without a policy key; left out of every other count.
    pub claims_without_key: usize,
    /// U: distinct policy keys among the claims.
    pub distinct_policies: usize,
    /// N − U over keyed claims: claims beyond the first on the same policy.
    pub non_unique: usize,
    pub uniqueness: ClaimUniqueness,
    /// Policies with two or more claims.
    pub multi_claim_policies: usize,
    pub max_claims_per_policy: usize,
    /// claims on one policy → number of policies with that many claims.
    pub claims_per_policy: BTreeMap<usize, usize>,
    pub policy_rows: usize,
    /// Policy keys that appear more than once in the policy table.
    pub duplicate_policy_keys: usize,
    pub policies_without_claims: usize,
    /// Share of policies absent from the claims table; `None` without policies.
    pub zero_claim_share: Option<f64>,
    /// Claims whose key is not in the policy table.
    pub orphan_claims: usize,
    /// Sum of the policy table's claim-count column, when one is configured.
    pub claim_count_total: Option<i64>,
}

impl Reconciliation {
    /// Whether the policy table's claim counter agrees with the claims rows.
    pub fn claim_count_consistent(&self) -> Option<bool> {
        self.claim_count_total
            .map(|total| total == self.claim_rows as i64)
    }
}

pub fn reconcile(
    policy_keys: &[Option<PolicyKey>],
    claim_keys: &[Option<PolicyKey>],
    claim_count_total: Option<i64>,
) -> Reconciliation {
    let mut per_policy: HashMap<&PolicyKey, usize> = HashMap::new();
    let mut claims_without_key = 0;
    for key in claim_keys {
        match key {
            Some(k) => *per_policy.entry(k).or_default() += 1,
            None => claims_without_key += 1,
        }
    }
    let keyed = claim_keys.len() - claims_without_key;
    let distinct = per_policy.len();

    let mut claims_per_policy = BTreeMap::new();
    for &n in per_policy.values() {
        *claims_per_policy.entry(n).or_insert(0) += 1;
    }

    let mut policies = HashSet::with_capacity(policy_keys.len());
    let mut duplicate_policy_keys = 0;
    for key in policy_keys.iter().flatten() {
        if !policies.insert(key) {
            duplicate_policy_keys += 1;
        }
    }

    let orphan_claims = per_policy
        .iter()
        .filter(|(k, _)| !policies.contains(*k))
        .map(|(_, n)| n)
        .sum();
    let with_claims = policies.iter().filter(|k| per_policy.contains_key(*k)).count();
    let policies_without_claims = policies.len() - with_claims;

    Reconciliation {
        claim_rows: claim_keys.len(),
        claims_without_key,
        distinct_policies: distinct,
        non_unique: keyed - distinct,
        uniqueness: if keyed == 0 {
            ClaimUniqueness::NoClaims
        } else {
            ClaimUniqueness::Ratio {
                distinct_per_claim: distinct as f64 / keyed as f64,
            }
        },
        multi_claim_policies: per_policy.values().filter(|&&n| n > 1).count(),
        max_claims_per_policy: per_policy.values().copied().max().unwrap_or(0),
        claims_per_policy,
        policy_rows: policy_keys.len(),
        duplicate_policy_keys,
        policies_without_claims,
        zero_claim_share: (!policies.is_empty())
            .then(|| policies_without_claims as f64 / policies.len() as f64),
        orphan_claims,
        claim_count_total,
    }
}

/// Sum of an integer-valued column, nulls ignored.
pub fn column_total(array: &dyn Array, column: &str) -> Result<i64, ExploreError> {
    let dt = array.data_type();
    if dt.is_integer() {
        let wide = cast(array, &DataType::Int64)?;
        return Ok(wide.as_primitive::<Int64Type>().iter().flatten().sum());
    }
    if dt.is_floating() {
        let wide = cast(array, &DataType::Float64)?;
        let sum: f64 = wide
            .as_primitive::<Float64Type>()
            .iter()
            .flatten()
            .filter(|v| v.is_finite())
            .sum();
        return Ok(sum.round() as i64);
    }
    Err(ExploreError::UnsupportedType {
        column: column.to_string(),
        data_type: dt.clone(),
        usage: "a claim count",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{
        ArrayRef, BooleanArray, DictionaryArray, Float32Array, Float64Array, Int32Array, Int8Array,
    };
    use arrow::datatypes::Int32Type;
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn ints(v: &[i64]) -> Vec<Option<PolicyKey>> {
        v.iter().map(|&k| Some(PolicyKey::Int(k))).collect()
    }

    #[test]
    fn non_unique_is_rows_minus_distinct() {
        let policies = ints(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let claims = ints(&[1, 1, 1, 3, 5, 5]);
        let r = reconcile(&policies, &claims, None);
        assert_eq!(r.claim_rows, 6);
        assert_eq!(r.distinct_policies, 3);
        assert_eq!(r.non_unique, 3);
        assert_eq!(r.multi_claim_policies, 2);
        assert_eq!(r.max_claims_per_policy, 3);
        assert_eq!(r.claims_per_policy, BTreeMap::from([(1, 1), (2, 1), (3, 1)]));
        assert_eq!(r.policies_without_claims, 5);
        assert_eq!(r.zero_claim_share, Some(5.0 / 8.0));
        assert_eq!(r.orphan_claims, 0);
        assert_eq!(
            r.uniqueness,
            ClaimUniqueness::Ratio {
                distinct_per_claim: 0.5
            }
        );
    }

    #[test]
    fn empty_claims_report_no_claims() {
        let r = reconcile(&ints(&[1, 2]), &[], Some(0));
        assert_eq!(r.uniqueness, ClaimUniqueness::NoClaims);
        assert_eq!(r.uniqueness.to_string(), "no claims");
        assert_eq!(r.non_unique, 0);
        assert_eq!(r.max_claims_per_policy, 0);
        assert_eq!(r.zero_claim_share, Some(1.0));
        assert_eq!(r.claim_count_consistent(), Some(true));
    }

    #[test]
    fn orphans_and_missing_keys_are_counted() {
        let claims = vec![Some(PolicyKey::Int(9)), None, Some(PolicyKey::Int(1)), Some(PolicyKey::Int(9))];
        let r = reconcile(&ints(&[1, 1, 2]), &claims, Some(3));
        assert_eq!(r.claims_without_key, 1);
        assert_eq!(r.orphan_claims, 2);
        assert_eq!(r.duplicate_policy_keys, 1);
        assert_eq!(r.non_unique, 1);
        assert_eq!(r.claim_count_consistent(), Some(false));
    }

    #[test]
    fn float_and_integer_keys_match() {
        let f = Float32Array::from(vec![Some(1.0), Some(2.5), None, Some(f32::NAN)]);
        let keys = policy_keys(&f, "IDpol").unwrap();
        assert_eq!(keys[0], Some(PolicyKey::Int(1)));
        assert!(matches!(keys[1], Some(PolicyKey::Float(_))));
        assert_eq!(keys[2], None);
        assert_eq!(keys[3], None);

        let i = Int32Array::from(vec![1]);
        assert_eq!(policy_keys(&i, "IDpol").unwrap(), vec![Some(PolicyKey::Int(1))]);
    }

    #[test]
    fn large_double_keys_survive_normalization() {
        let ids: ArrayRef = Arc::new(Float64Array::from(vec![16_777_216.0, 16_777_217.0, 16_777_217.0]));
        let raw = RecordBatch::try_from_iter(vec![("IDpol", ids)]).unwrap();
        let before = reconcile(&[], &policy_keys(raw.column(0).as_ref(), "IDpol").unwrap(), None);

        let (normalized, _) = crate::normalize::normalize(raw).unwrap();
        let after = reconcile(&[], &policy_keys(normalized.column(0).as_ref(), "IDpol").unwrap(), None);

        assert_eq!(before.distinct_policies, 2);
        assert_eq!(after.distinct_policies, before.distinct_policies);
        assert_eq!(after.non_unique, 1);
    }

    #[test]
    fn dictionary_keys_resolve_to_strings() {
        let d: DictionaryArray<Int32Type> = vec![Some("p1"), None, Some("p2")].into_iter().collect();
        let keys = policy_keys(&d, "PolicyID").unwrap();
        assert_eq!(keys[0], Some(PolicyKey::Str("p1".into())));
        assert_eq!(keys[1], None);
    }

    #[test]
    fn boolean_keys_are_rejected() {
        let b = BooleanArray::from(vec![true]);
        assert!(matches!(
            policy_keys(&b, "flag"),
            Err(ExploreError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn totals_claim_counts() {
        let n = Int8Array::from(vec![Some(0), Some(2), None, Some(1)]);
        assert_eq!(column_total(&n, "ClaimNb").unwrap(), 3);
    }
}
