//! Collection engine (§4.I): stitches the document codec, slotted pages,
//! the primary (and ordered secondary) B+-tree indexes, and the catalog
//! into insert/find/update/delete with index maintenance.
//!
//! Every operation here runs inside a transaction the caller supplies. The
//! database facade aborts that transaction on any `Err` it sees (§7 "every
//! public engine operation ... must abort that transaction before
//! propagating") — this module itself never calls `abort`, only `?`.

pub mod index_admin;

use parking_lot::{Mutex, RwLock};

use crate::catalog::CollectionMetadata;
use crate::document::{self, KeyDictionary, ObjectId, PolymorphicId, Value, codec};
use crate::errors::{DbError, Result};
use crate::index::{BTree, IndexKey, IndexKind, Predicate};
use crate::page::header::write_checksum;
use crate::page::{PageFile, PageType, SlottedPage};
use crate::txn::{Transaction, TransactionManager};
use crate::types::{DocumentLocation, PageId};

/// In-memory collection handle. Structural changes (root-page pointers,
/// index descriptors) live in `meta`; the database facade persists a
/// snapshot of every collection's metadata back to the catalog after each
/// mutating call.
pub struct Collection {
    meta: RwLock<CollectionMetadata>,
    data_pages: RwLock<Vec<PageId>>,
    writer_lock: Mutex<()>,
}

impl Collection {
    #[must_use]
    pub fn new(meta: CollectionMetadata) -> Self {
        Self { meta: RwLock::new(meta), data_pages: RwLock::new(Vec::new()), writer_lock: Mutex::new(()) }
    }

    /// Registers a data page discovered while loading an existing catalog
    /// (the catalog itself doesn't enumerate data pages; the database
    /// facade walks the primary index at `open` and reports each distinct
    /// page it finds here).
    pub fn note_data_page(&self, page_id: PageId) {
        let mut pages = self.data_pages.write();
        if !pages.contains(&page_id) {
            pages.push(page_id);
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.meta.read().name.clone()
    }

    #[must_use]
    pub fn metadata(&self) -> CollectionMetadata {
        self.meta.read().clone()
    }

    fn find_or_allocate_data_page(&self, disk: &PageFile, mgr: &TransactionManager, txn: &Transaction, needed: usize) -> Result<PageId> {
        {
            let pages = self.data_pages.read();
            for &page_id in pages.iter() {
                let buf = mgr.read_page(txn, page_id)?;
                if SlottedPage::free_space(&buf) >= needed {
                    return Ok(page_id);
                }
            }
        }
        let page_id = disk.allocate_page(PageType::Data)?;
        {
            let mut buf = disk.read_page(page_id)?;
            SlottedPage::init(&mut buf);
            write_checksum(&mut buf);
            disk.write_page(page_id, &mut buf)?;
        }
        self.data_pages.write().push(page_id);
        Ok(page_id)
    }

    fn write_slot(&self, mgr: &TransactionManager, txn: &mut Transaction, page_id: PageId, record: &[u8]) -> Result<u16> {
        let before = mgr.read_page(txn, page_id)?;
        let mut after = before.clone();
        let slot = SlottedPage::insert(&mut after, record)?;
        write_checksum(&mut after);
        mgr.stage_write(txn, page_id, before, after)?;
        Ok(slot)
    }

    /// Replaces the document at `loc` with `record`, in place if it still
    /// fits in the existing slot. A grown document that no longer fits is
    /// relocated through the same page-allocating path `insert` uses, which
    /// may land it back on this page (once other slots free room) or on a
    /// different one — the old slot is freed either way.
    fn overwrite_slot(
        &self,
        disk: &PageFile,
        mgr: &TransactionManager,
        txn: &mut Transaction,
        loc: DocumentLocation,
        record: &[u8],
    ) -> Result<DocumentLocation> {
        let before = mgr.read_page(txn, loc.page_id)?;
        if SlottedPage::fits_in_place(&before, loc.slot_index, record.len()) {
            let mut after = before.clone();
            SlottedPage::update(&mut after, loc.slot_index, record)?;
            write_checksum(&mut after);
            mgr.stage_write(txn, loc.page_id, before, after)?;
            return Ok(loc);
        }

        let mut tombstoned = before.clone();
        SlottedPage::delete(&mut tombstoned, loc.slot_index)?;
        write_checksum(&mut tombstoned);
        mgr.stage_write(txn, loc.page_id, before, tombstoned)?;

        let page_id = self.find_or_allocate_data_page(disk, mgr, txn, record.len())?;
        let slot = self.write_slot(mgr, txn, page_id, record)?;
        Ok(DocumentLocation::new(page_id, slot))
    }

    fn tombstone_slot(&self, mgr: &TransactionManager, txn: &mut Transaction, loc: DocumentLocation) -> Result<()> {
        let before = mgr.read_page(txn, loc.page_id)?;
        let mut after = before.clone();
        SlottedPage::delete(&mut after, loc.slot_index)?;
        write_checksum(&mut after);
        mgr.stage_write(txn, loc.page_id, before, after)
    }

    fn read_document_raw(&self, mgr: &TransactionManager, txn: &Transaction, loc: DocumentLocation) -> Result<Option<Vec<u8>>> {
        let buf = mgr.read_page(txn, loc.page_id)?;
        Ok(SlottedPage::get(&buf, loc.slot_index).map(<[u8]>::to_vec))
    }

    fn resolve_location(&self, disk: &PageFile, mgr: &TransactionManager, txn: &Transaction, id: &PolymorphicId) -> Result<Option<DocumentLocation>> {
        let tree = BTree::new(disk);
        let root = self.meta.read().primary_root_page;
        let key = IndexKey::from_polymorphic_id(id);
        tree.find(mgr, txn, root, &key)
    }

    /// Maintains every ordered secondary index for a document whose fields
    /// are `fields`, inserting `loc` under each index's extracted key.
    /// Errors (including unique-index violations) abort the whole insert.
    fn index_insert_all(&self, disk: &PageFile, mgr: &TransactionManager, txn: &mut Transaction, fields: &[(String, Value)], loc: DocumentLocation) -> Result<()> {
        let tree = BTree::new(disk);
        let mut meta = self.meta.write();
        for idx in &mut meta.indexes {
            if idx.kind != IndexKind::Ordered {
                continue;
            }
            let Some(path) = idx.field_paths.first() else { continue };
            let Some(value) = extract_path(fields, path) else { continue };
            let Ok(ikey) = IndexKey::from_value(value) else { continue };
            idx.root_page = tree.insert(mgr, txn, idx.root_page, &ikey, loc, idx.unique)?;
        }
        Ok(())
    }

    fn index_delete_all(&self, disk: &PageFile, mgr: &TransactionManager, txn: &mut Transaction, fields: &[(String, Value)], loc: DocumentLocation) -> Result<()> {
        let tree = BTree::new(disk);
        let mut meta = self.meta.write();
        for idx in &mut meta.indexes {
            if idx.kind != IndexKind::Ordered {
                continue;
            }
            let Some(path) = idx.field_paths.first() else { continue };
            let Some(value) = extract_path(fields, path) else { continue };
            let Ok(ikey) = IndexKey::from_value(value) else { continue };
            let (new_root, _) = tree.delete(mgr, txn, idx.root_page, &ikey, loc)?;
            idx.root_page = new_root;
        }
        Ok(())
    }

    /// Inserts a document, generating `_id` if absent. Returns the id used.
    pub fn insert(
        &self,
        disk: &PageFile,
        dict: &KeyDictionary,
        mgr: &TransactionManager,
        txn: &mut Transaction,
        mut fields: Vec<(String, Value)>,
    ) -> Result<PolymorphicId> {
        let _guard = self.writer_lock.lock();
        let id = match fields.iter().find(|(k, _)| k == "_id") {
            Some((_, v)) => document::value_to_id(v.clone())?,
            None => {
                let oid = ObjectId::new();
                fields.insert(0, ("_id".to_string(), document::id_to_value(&PolymorphicId::ObjectId(oid))));
                PolymorphicId::ObjectId(oid)
            }
        };
        if self.resolve_location(disk, mgr, txn, &id)?.is_some() {
            return Err(DbError::DuplicateKey);
        }

        let encoded = codec::encode_document(&fields, dict);
        let page_id = self.find_or_allocate_data_page(disk, mgr, txn, encoded.len())?;
        let slot = self.write_slot(mgr, txn, page_id, &encoded)?;
        let loc = DocumentLocation::new(page_id, slot);

        let tree = BTree::new(disk);
        let key = IndexKey::from_polymorphic_id(&id);
        {
            let mut meta = self.meta.write();
            meta.primary_root_page = tree.insert(mgr, txn, meta.primary_root_page, &key, loc, true)?;
        }
        self.index_insert_all(disk, mgr, txn, &fields, loc)?;
        Ok(id)
    }

    /// Inserts every document in `docs` within the same transaction.
    /// Returns the ids used, in order.
    pub fn insert_bulk(
        &self,
        disk: &PageFile,
        dict: &KeyDictionary,
        mgr: &TransactionManager,
        txn: &mut Transaction,
        docs: Vec<Vec<(String, Value)>>,
    ) -> Result<Vec<PolymorphicId>> {
        docs.into_iter().map(|fields| self.insert(disk, dict, mgr, txn, fields)).collect()
    }

    pub fn find_by_id(
        &self,
        disk: &PageFile,
        dict: &KeyDictionary,
        mgr: &TransactionManager,
        txn: &Transaction,
        id: &PolymorphicId,
    ) -> Result<Option<Vec<(String, Value)>>> {
        let Some(loc) = self.resolve_location(disk, mgr, txn, id)? else { return Ok(None) };
        match self.read_document_raw(mgr, txn, loc)? {
            None => Ok(None),
            Some(raw) => Ok(Some(codec::decode_document(&raw, dict)?)),
        }
    }

    /// Returns every document in primary-key order.
    pub fn find_all(&self, dict: &KeyDictionary, disk: &PageFile, mgr: &TransactionManager, txn: &Transaction) -> Result<Vec<Vec<(String, Value)>>> {
        let tree = BTree::new(disk);
        let root = self.meta.read().primary_root_page;
        let pairs = tree.range(mgr, txn, root, std::ops::Bound::Unbounded, std::ops::Bound::Unbounded)?;
        pairs
            .into_iter()
            .filter_map(|(_, loc)| self.read_document_raw(mgr, txn, loc).transpose())
            .map(|raw| raw.and_then(|b| codec::decode_document(&b, dict)))
            .collect()
    }

    /// Evaluates `predicate` against the named index and returns the
    /// matching documents, decoded, in index order.
    pub fn scan(
        &self,
        dict: &KeyDictionary,
        disk: &PageFile,
        mgr: &TransactionManager,
        txn: &Transaction,
        index_name: &str,
        predicate: &Predicate,
    ) -> Result<Vec<Vec<(String, Value)>>> {
        let root = {
            let meta = self.meta.read();
            meta.indexes
                .iter()
                .find(|i| i.name == index_name)
                .map(|i| i.root_page)
                .ok_or_else(|| DbError::NoSuchIndex(index_name.to_string()))?
        };
        let tree = BTree::new(disk);
        let pairs = predicate.apply(&tree, mgr, txn, root)?;
        pairs
            .into_iter()
            .filter_map(|(_, loc)| self.read_document_raw(mgr, txn, loc).transpose())
            .map(|raw| raw.and_then(|b| codec::decode_document(&b, dict)))
            .collect()
    }

    /// Convenience alias for `scan` under the name the spec's operation list
    /// uses for a single-predicate query against one named index.
    pub fn find(
        &self,
        dict: &KeyDictionary,
        disk: &PageFile,
        mgr: &TransactionManager,
        txn: &Transaction,
        index_name: &str,
        predicate: &Predicate,
    ) -> Result<Vec<Vec<(String, Value)>>> {
        self.scan(dict, disk, mgr, txn, index_name, predicate)
    }

    /// Range query convenience wrapping `Predicate::Between`/unbounded forms
    /// directly over encoded index bounds.
    pub fn range_query(
        &self,
        dict: &KeyDictionary,
        disk: &PageFile,
        mgr: &TransactionManager,
        txn: &Transaction,
        index_name: &str,
        low: Option<&Value>,
        high: Option<&Value>,
    ) -> Result<Vec<Vec<(String, Value)>>> {
        let predicate = match (low, high) {
            (Some(l), Some(h)) => Predicate::Between(IndexKey::from_value(l)?, IndexKey::from_value(h)?),
            (Some(l), None) => Predicate::Ge(IndexKey::from_value(l)?),
            (None, Some(h)) => Predicate::Le(IndexKey::from_value(h)?),
            (None, None) => Predicate::All,
        };
        self.scan(dict, disk, mgr, txn, index_name, &predicate)
    }

    /// Replaces the stored document for `id` with `fields` (which need not
    /// repeat `_id`; it is preserved from the existing document).
    pub fn update(
        &self,
        disk: &PageFile,
        dict: &KeyDictionary,
        mgr: &TransactionManager,
        txn: &mut Transaction,
        id: &PolymorphicId,
        mut fields: Vec<(String, Value)>,
    ) -> Result<bool> {
        let _guard = self.writer_lock.lock();
        let Some(loc) = self.resolve_location(disk, mgr, txn, id)? else { return Ok(false) };
        let Some(old_raw) = self.read_document_raw(mgr, txn, loc)? else { return Ok(false) };
        let old_fields = codec::decode_document(&old_raw, dict)?;

        if !fields.iter().any(|(k, _)| k == "_id") {
            fields.insert(0, ("_id".to_string(), document::id_to_value(id)));
        }
        let encoded = codec::encode_document(&fields, dict);
        let new_loc = self.overwrite_slot(disk, mgr, txn, loc, &encoded)?;

        self.index_delete_all(disk, mgr, txn, &old_fields, loc)?;
        self.index_insert_all(disk, mgr, txn, &fields, new_loc)?;

        if new_loc != loc {
            let tree = BTree::new(disk);
            let key = IndexKey::from_polymorphic_id(id);
            let mut meta = self.meta.write();
            let (root, _) = tree.delete(mgr, txn, meta.primary_root_page, &key, loc)?;
            meta.primary_root_page = tree.insert(mgr, txn, root, &key, new_loc, true)?;
        }
        Ok(true)
    }

    pub fn update_bulk(
        &self,
        disk: &PageFile,
        dict: &KeyDictionary,
        mgr: &TransactionManager,
        txn: &mut Transaction,
        updates: Vec<(PolymorphicId, Vec<(String, Value)>)>,
    ) -> Result<usize> {
        let mut count = 0;
        for (id, fields) in updates {
            if self.update(disk, dict, mgr, txn, &id, fields)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Removes the document for `id`, clearing it from every index. Returns
    /// whether a document was found.
    pub fn delete(
        &self,
        disk: &PageFile,
        dict: &KeyDictionary,
        mgr: &TransactionManager,
        txn: &mut Transaction,
        id: &PolymorphicId,
    ) -> Result<bool> {
        let _guard = self.writer_lock.lock();
        let Some(loc) = self.resolve_location(disk, mgr, txn, id)? else { return Ok(false) };
        let Some(raw) = self.read_document_raw(mgr, txn, loc)? else { return Ok(false) };
        let fields = codec::decode_document(&raw, dict)?;

        self.tombstone_slot(mgr, txn, loc)?;
        self.index_delete_all(disk, mgr, txn, &fields, loc)?;

        let tree = BTree::new(disk);
        let key = IndexKey::from_polymorphic_id(id);
        let mut meta = self.meta.write();
        let (new_root, found) = tree.delete(mgr, txn, meta.primary_root_page, &key, loc)?;
        meta.primary_root_page = new_root;
        Ok(found)
    }

    pub fn delete_bulk(
        &self,
        disk: &PageFile,
        dict: &KeyDictionary,
        mgr: &TransactionManager,
        txn: &mut Transaction,
        ids: &[PolymorphicId],
    ) -> Result<usize> {
        let mut count = 0;
        for id in ids {
            if self.delete(disk, dict, mgr, txn, id)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Number of live documents, via a full primary-index range scan.
    pub fn count(&self, disk: &PageFile, mgr: &TransactionManager, txn: &Transaction) -> Result<usize> {
        let tree = BTree::new(disk);
        let root = self.meta.read().primary_root_page;
        Ok(tree.range(mgr, txn, root, std::ops::Bound::Unbounded, std::ops::Bound::Unbounded)?.len())
    }
}

/// Resolves a dot-separated field path (e.g. `"address.city"`) against a
/// decoded document's top-level fields, recursing into nested `Document`
/// values. Returns `None` if any segment is absent or the path runs through
/// a non-document value.
fn extract_path<'a>(fields: &'a [(String, Value)], path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = fields.iter().find(|(k, _)| k == first).map(|(_, v)| v)?;
    for part in parts {
        match current {
            Value::Document(inner) => {
                current = inner.iter().find(|(k, _)| k == part).map(|(_, v)| v)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, PageCache};
    use crate::catalog::IndexDescriptor;
    use crate::types::Isolation;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn harness() -> (tempfile::TempDir, Arc<PageFile>, Arc<TransactionManager>, KeyDictionary) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(PageFile::create(dir.path().join("db.blite"), 4096).unwrap());
        let cache = Arc::new(PageCache::new(disk.clone(), CacheConfig { capacity: 64 }));
        let wal = Arc::new(crate::wal::WriteAheadLog::open(dir.path().join("db.wal")).unwrap());
        let mgr = Arc::new(TransactionManager::new(wal, cache, disk.clone(), 0));
        (dir, disk, mgr, KeyDictionary::new())
    }

    fn meta(name: &str) -> CollectionMetadata {
        CollectionMetadata { name: name.to_string(), primary_root_page: 0, indexes: Vec::new() }
    }

    #[test]
    fn insert_then_find_by_id_round_trips() {
        let (_dir, disk, mgr, dict) = harness();
        let coll = Collection::new(meta("people"));
        let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();
        let fields = vec![("name".to_string(), Value::String("Ada".into()))];
        let id = coll.insert(&disk, &dict, &mgr, &mut txn, fields).unwrap();
        let found = coll.find_by_id(&disk, &dict, &mgr, &txn, &id).unwrap().unwrap();
        assert!(found.iter().any(|(k, v)| k == "name" && *v == Value::String("Ada".into())));
    }

    #[test]
    fn duplicate_explicit_id_is_rejected() {
        let (_dir, disk, mgr, dict) = harness();
        let coll = Collection::new(meta("people"));
        let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();
        let fields = vec![("_id".to_string(), Value::Int32(1))];
        coll.insert(&disk, &dict, &mgr, &mut txn, fields.clone()).unwrap();
        let err = coll.insert(&disk, &dict, &mgr, &mut txn, fields).unwrap_err();
        assert!(matches!(err, DbError::DuplicateKey));
    }

    #[test]
    fn update_changes_fields_in_place() {
        let (_dir, disk, mgr, dict) = harness();
        let coll = Collection::new(meta("people"));
        let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();
        let id = coll.insert(&disk, &dict, &mgr, &mut txn, vec![("age".to_string(), Value::Int32(1))]).unwrap();
        coll.update(&disk, &dict, &mgr, &mut txn, &id, vec![("age".to_string(), Value::Int32(2))]).unwrap();
        let found = coll.find_by_id(&disk, &dict, &mgr, &txn, &id).unwrap().unwrap();
        assert_eq!(found.iter().find(|(k, _)| k == "age").unwrap().1, Value::Int32(2));
    }

    #[test]
    fn delete_removes_document_and_primary_entry() {
        let (_dir, disk, mgr, dict) = harness();
        let coll = Collection::new(meta("people"));
        let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();
        let id = coll.insert(&disk, &dict, &mgr, &mut txn, vec![("x".to_string(), Value::Int32(1))]).unwrap();
        assert!(coll.delete(&disk, &dict, &mgr, &mut txn, &id).unwrap());
        assert!(coll.find_by_id(&disk, &dict, &mgr, &txn, &id).unwrap().is_none());
        assert_eq!(coll.count(&disk, &mgr, &txn).unwrap(), 0);
    }

    #[test]
    fn scan_uses_secondary_index() {
        let (_dir, disk, mgr, dict) = harness();
        let mut m = meta("people");
        m.indexes.push(IndexDescriptor {
            name: "by_age".into(),
            kind: IndexKind::Ordered,
            root_page: 0,
            field_paths: vec!["age".into()],
            unique: false,
        });
        let coll = Collection::new(m);
        let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();
        for age in [25, 30, 35] {
            coll.insert(&disk, &dict, &mgr, &mut txn, vec![("age".to_string(), Value::Int32(age))]).unwrap();
        }
        let key = IndexKey::from_value(&Value::Int32(30)).unwrap();
        let results = coll.scan(&dict, &disk, &mgr, &txn, "by_age", &Predicate::Ge(key)).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn find_all_returns_every_live_document() {
        let (_dir, disk, mgr, dict) = harness();
        let coll = Collection::new(meta("people"));
        let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();
        for i in 0..5 {
            coll.insert(&disk, &dict, &mgr, &mut txn, vec![("n".to_string(), Value::Int32(i))]).unwrap();
        }
        assert_eq!(coll.find_all(&dict, &disk, &mgr, &txn).unwrap().len(), 5);
    }
}
