//! Range-query predicate wrappers over the raw B+-tree `range` primitive
//! (§4.G): `>`, `≥`, `<`, `≤`, `between`, `starts_with`, `like`, `in`.

use std::ops::Bound;

use crate::document::Value;
use crate::errors::Result;
use crate::index::btree::BTree;
use crate::index::key::{IndexKey, like_match};
use crate::txn::{Transaction, TransactionManager};
use crate::types::{DocumentLocation, PageId};

pub enum Predicate {
    Gt(IndexKey),
    Ge(IndexKey),
    Lt(IndexKey),
    Le(IndexKey),
    Between(IndexKey, IndexKey),
    StartsWith(Vec<u8>),
    /// `%` (any run) and `_` (single code unit), matched against decoded
    /// UTF-8 string keys; non-string keys never match.
    Like(String),
    In(Vec<IndexKey>),
    All,
}

impl Predicate {
    /// Evaluates the predicate against `tree`, returning matching
    /// `(key, location)` pairs in ascending key order (ascending location
    /// order for equal keys).
    pub fn apply(
        &self,
        tree: &BTree<'_>,
        mgr: &TransactionManager,
        txn: &Transaction,
        root: PageId,
    ) -> Result<Vec<(Vec<u8>, DocumentLocation)>> {
        match self {
            Predicate::All => tree.range(mgr, txn, root, Bound::Unbounded, Bound::Unbounded),
            Predicate::Gt(k) => tree.range(mgr, txn, root, Bound::Excluded(k.as_bytes()), Bound::Unbounded),
            Predicate::Ge(k) => tree.range(mgr, txn, root, Bound::Included(k.as_bytes()), Bound::Unbounded),
            Predicate::Lt(k) => tree.range(mgr, txn, root, Bound::Unbounded, Bound::Excluded(k.as_bytes())),
            Predicate::Le(k) => tree.range(mgr, txn, root, Bound::Unbounded, Bound::Included(k.as_bytes())),
            Predicate::Between(lo, hi) => {
                tree.range(mgr, txn, root, Bound::Included(lo.as_bytes()), Bound::Included(hi.as_bytes()))
            }
            Predicate::StartsWith(prefix) => {
                let high = IndexKey::prefix_upper_bound(prefix);
                let high_bound = match &high {
                    Some(h) => Bound::Excluded(h.as_slice()),
                    None => Bound::Unbounded,
                };
                tree.range(mgr, txn, root, Bound::Included(prefix.as_slice()), high_bound)
            }
            Predicate::Like(pattern) => {
                let literal_prefix: String = pattern.chars().take_while(|c| *c != '%' && *c != '_').collect();
                let prefix_key = IndexKey::from_value(&Value::String(literal_prefix.clone()))?;
                let prefix_bytes = prefix_key.as_bytes().to_vec();
                let high = IndexKey::prefix_upper_bound(&prefix_bytes);
                let high_bound = match &high {
                    Some(h) => Bound::Excluded(h.as_slice()),
                    None => Bound::Unbounded,
                };
                let candidates = tree.range(mgr, txn, root, Bound::Included(prefix_bytes.as_slice()), high_bound)?;
                Ok(candidates
                    .into_iter()
                    .filter(|(k, _)| {
                        decode_string_key(k).is_some_and(|s| like_match(pattern, &s))
                    })
                    .collect())
            }
            Predicate::In(keys) => {
                let mut out = Vec::new();
                for k in keys {
                    if let Some(loc) = tree.find(mgr, txn, root, k)? {
                        out.push((k.as_bytes().to_vec(), loc));
                    }
                }
                out.sort();
                Ok(out)
            }
        }
    }
}

/// Decodes a string key's payload (discriminant byte stripped) back to
/// UTF-8, for `like` post-filtering. Keys not encoded from a string are not
/// valid UTF-8 in general and are skipped rather than erroring.
fn decode_string_key(key: &[u8]) -> Option<String> {
    const UTF8_STRING_DISCRIMINANT: u8 = 4;
    match key.first() {
        Some(&UTF8_STRING_DISCRIMINANT) => std::str::from_utf8(&key[1..]).ok().map(str::to_owned),
        _ => None,
    }
}
