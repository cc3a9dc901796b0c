//! Index administration: `create_index` (with back-fill), `drop_index`,
//! `list_indexes` (§4.I, §4.G).

use std::ops::Bound;

use crate::catalog::IndexDescriptor;
use crate::document::KeyDictionary;
use crate::errors::{DbError, Result};
use crate::index::{BTree, IndexKey, IndexKind};
use crate::page::PageFile;
use crate::txn::{Transaction, TransactionManager};

use super::{Collection, extract_path};

impl Collection {
    /// Builds a new ordered secondary index over `field_paths` (only the
    /// first path is indexed; compound keys are not implemented) by
    /// scanning every live document via the primary index and inserting
    /// each one's extracted value. The whole back-fill runs inside the
    /// caller's transaction, so a conflict or duplicate-key violation part
    /// way through aborts index creation along with everything else in it.
    pub fn create_index(
        &self,
        disk: &PageFile,
        dict: &KeyDictionary,
        mgr: &TransactionManager,
        txn: &mut Transaction,
        name: &str,
        field_paths: Vec<String>,
        kind: IndexKind,
        unique: bool,
    ) -> Result<()> {
        if self.metadata().indexes.iter().any(|i| i.name == name) {
            return Err(DbError::Corrupt(format!("index {name} already exists")));
        }

        let primary_root = self.metadata().primary_root_page;
        let tree = BTree::new(disk);
        let entries = tree.range(mgr, txn, primary_root, Bound::Unbounded, Bound::Unbounded)?;

        let mut root_page = 0;
        let path = field_paths.first().cloned();
        if kind == IndexKind::Ordered {
            for (_, loc) in &entries {
                let Some(raw) = self.read_document_raw(mgr, txn, *loc)? else { continue };
                let fields = crate::document::codec::decode_document(&raw, dict)?;
                let Some(path) = &path else { break };
                let Some(value) = extract_path(&fields, path) else { continue };
                let key = IndexKey::from_value(value)?;
                root_page = tree.insert(mgr, txn, root_page, &key, *loc, unique)?;
            }
        }

        let descriptor = IndexDescriptor { name: name.to_string(), kind, root_page, field_paths, unique };
        self.meta.write().indexes.push(descriptor);
        Ok(())
    }

    /// Drops a named secondary index, freeing its entire page tree.
    pub fn drop_index(&self, disk: &PageFile, mgr: &TransactionManager, txn: &Transaction, name: &str) -> Result<()> {
        let root_page = {
            let mut meta = self.meta.write();
            let pos = meta.indexes.iter().position(|i| i.name == name).ok_or_else(|| DbError::NoSuchIndex(name.to_string()))?;
            meta.indexes.remove(pos).root_page
        };
        let tree = BTree::new(disk);
        tree.free_all(mgr, txn, root_page)
    }

    #[must_use]
    pub fn list_indexes(&self) -> Vec<IndexDescriptor> {
        self.metadata().indexes
    }
}
