//! Catalog & metadata (§4.H): the collection registry and the persisted
//! key-dictionary chain, both built on the chained-page blob store in
//! `chain`.

pub mod chain;

use serde::{Deserialize, Serialize};

use crate::document::KeyDictionary;
use crate::errors::Result;
use crate::index::IndexKind;
use crate::page::PageFile;
use crate::page::header::PageType;
use crate::txn::{Transaction, TransactionManager};
use crate::types::PageId;

const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub kind: IndexKind,
    pub root_page: PageId,
    pub field_paths: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub name: String,
    pub primary_root_page: PageId,
    pub indexes: Vec<IndexDescriptor>,
}

/// The collection registry: a chained-page blob holding every collection's
/// metadata, rooted at the file header's `catalog_root_page`. See the
/// module doc for why this is a rewrite-whole-blob store rather than a
/// literal B+-tree keyed by collection name.
pub struct Catalog<'a> {
    disk: &'a PageFile,
}

impl<'a> Catalog<'a> {
    #[must_use]
    pub fn new(disk: &'a PageFile) -> Self {
        Self { disk }
    }

    pub fn load(&self, mgr: &TransactionManager, txn: &Transaction) -> Result<Vec<CollectionMetadata>> {
        let head = self.disk.catalog_root_page();
        if head == 0 {
            return Ok(Vec::new());
        }
        let bytes = chain::read_chain(mgr, txn, head)?;
        let (entries, _) = bincode::serde::decode_from_slice(&bytes, BINCODE_CONFIG)
            .map_err(crate::errors::DbError::Decode)?;
        Ok(entries)
    }

    pub fn save(&self, mgr: &TransactionManager, txn: &mut Transaction, entries: &[CollectionMetadata]) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(entries, BINCODE_CONFIG).map_err(crate::errors::DbError::Encode)?;
        let old_head = self.disk.catalog_root_page();
        let new_head = chain::write_chain(self.disk, mgr, txn, old_head, PageType::Catalog, &bytes)?;
        self.disk.set_catalog_root_page(new_head)
    }
}

/// Persists the key dictionary as `(id, name)` pairs on its own chained
/// page store, rooted at `key_dictionary_root_page`.
pub struct KeyDictionaryStore<'a> {
    disk: &'a PageFile,
}

impl<'a> KeyDictionaryStore<'a> {
    #[must_use]
    pub fn new(disk: &'a PageFile) -> Self {
        Self { disk }
    }

    pub fn load(&self, mgr: &TransactionManager, txn: &Transaction, dict: &KeyDictionary) -> Result<()> {
        let head = self.disk.key_dictionary_root_page();
        if head == 0 {
            return Ok(());
        }
        let bytes = chain::read_chain(mgr, txn, head)?;
        let (entries, _): (Vec<(u16, String)>, _) =
            bincode::serde::decode_from_slice(&bytes, BINCODE_CONFIG).map_err(crate::errors::DbError::Decode)?;
        dict.load(&entries);
        Ok(())
    }

    pub fn save(&self, mgr: &TransactionManager, txn: &mut Transaction, dict: &KeyDictionary) -> Result<()> {
        let entries = dict.entries();
        let bytes = bincode::serde::encode_to_vec(&entries, BINCODE_CONFIG).map_err(crate::errors::DbError::Encode)?;
        let old_head = self.disk.key_dictionary_root_page();
        let new_head = chain::write_chain(self.disk, mgr, txn, old_head, PageType::IndexMeta, &bytes)?;
        self.disk.set_key_dictionary_root_page(new_head)
    }
}
