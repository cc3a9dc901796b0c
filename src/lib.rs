//! BLite: an embedded, single-file document database.
//!
//! A paged file with a free-list backs a write-ahead log and an MVCC
//! transaction manager; a B+-tree provides both the primary and ordered
//! secondary indexes over a self-describing binary document codec with a
//! shared field-name dictionary (§3, §4).

pub mod asynch;
pub mod cache;
pub mod catalog;
pub mod collection;
pub mod db;
pub mod document;
pub mod errors;
pub mod index;
pub mod logger;
pub mod page;
pub mod recovery;
pub mod txn;
pub mod types;
pub mod wal;

pub use asynch::AsyncDatabase;
pub use db::Database;
pub use document::{ObjectId, PolymorphicId, Value};
pub use errors::{DbError, Result};
pub use types::{Isolation, OpenConfig};
