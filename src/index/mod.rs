//! Ordered secondary-index engine: opaque-byte-string B+-tree keys, range
//! predicates, split/merge maintenance (§4.G).
//!
//! Vector-similarity (HNSW) and geospatial (R-tree) indexes are external
//! collaborators: only their `{insert(value, location, txn), search(...)}`
//! contract is a concern of the collection engine, which treats them
//! opaquely. No implementation of either lives in this crate.

pub mod btree;
pub mod key;
pub mod predicate;

pub use btree::BTree;
pub use key::IndexKey;
pub use predicate::Predicate;

/// The kind of a secondary index, as recorded in catalog metadata. Only
/// `Ordered` has an implementation here; `Vector`/`Spatial` are recorded for
/// descriptor compatibility but any attempt to use one fails at the
/// collection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IndexKind {
    Ordered,
    Vector,
    Spatial,
}
