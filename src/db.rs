//! Top-level database facade (§5, §6.3): opens the page file and WAL, runs
//! recovery, loads the catalog and key dictionary, and exposes the
//! collection-level operations as auto-transactional convenience wrappers.

use std::collections::HashMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use parking_lot::RwLock;

use crate::cache::{CacheConfig, PageCache};
use crate::catalog::{Catalog, CollectionMetadata, IndexDescriptor, KeyDictionaryStore};
use crate::collection::Collection;
use crate::document::{KeyDictionary, PolymorphicId, Value};
use crate::errors::{DbError, Result};
use crate::index::{BTree, IndexKind, Predicate};
use crate::page::PageFile;
use crate::recovery;
use crate::txn::{Transaction, TransactionManager};
use crate::types::{Isolation, Lsn, OpenConfig};
use crate::wal::WriteAheadLog;

pub struct Database {
    path: PathBuf,
    disk: Arc<PageFile>,
    mgr: Arc<TransactionManager>,
    dict: Arc<KeyDictionary>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    config: OpenConfig,
}

impl Database {
    /// Opens (creating if absent) the database file at `path`, running
    /// crash recovery against its companion WAL before accepting new
    /// transactions, and loading the catalog and field-name dictionary.
    pub fn open(path: impl AsRef<Path>, config: OpenConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let wal_path = path.with_extension("wal");

        let disk = if path.exists() { PageFile::open(&path)? } else { PageFile::create(&path, config.page_size)? };
        let wal = WriteAheadLog::open(&wal_path)?;
        let recovered_lsn = recovery::recover(&wal, &disk)?;

        let disk = Arc::new(disk);
        let cache = Arc::new(PageCache::new(disk.clone(), CacheConfig { capacity: config.cache_capacity }));
        let wal = Arc::new(wal);
        let mgr = Arc::new(TransactionManager::new(wal, cache, disk.clone(), recovered_lsn));
        let dict = Arc::new(KeyDictionary::new());

        let mut load_txn = mgr.begin(Isolation::ReadCommitted)?;
        KeyDictionaryStore::new(&disk).load(&mgr, &load_txn, &dict)?;
        let entries = Catalog::new(&disk).load(&mgr, &load_txn)?;

        let collections = RwLock::new(HashMap::new());
        for meta in entries {
            let collection = Arc::new(Collection::new(meta.clone()));
            let tree = BTree::new(&disk);
            let locations = tree.range(&mgr, &load_txn, meta.primary_root_page, Bound::Unbounded, Bound::Unbounded)?;
            for (_, loc) in locations {
                collection.note_data_page(loc.page_id);
            }
            collections.write().insert(meta.name.clone(), collection);
        }
        mgr.commit(&mut load_txn)?;

        info!("opened database at {} (recovered watermark {recovered_lsn})", path.display());
        Ok(Self { path, disk, mgr, dict, collections, config })
    }

    /// Checkpoints and releases the underlying file handles.
    pub fn close(self) -> Result<()> {
        self.mgr.checkpoint()?;
        info!("closed database at {}", self.path.display());
        Ok(())
    }

    pub fn begin_transaction(&self, isolation: Isolation) -> Result<Transaction> {
        self.mgr.begin(isolation)
    }

    /// Commits `txn`, first persisting a fresh catalog and key-dictionary
    /// snapshot within the same transaction (§4.H: any change to a root
    /// page is durable in the same transaction as the structural change
    /// that produced it), then checkpoints if the commit interval is due.
    pub fn commit(&self, txn: &mut Transaction) -> Result<Lsn> {
        self.persist_catalog(txn)?;
        KeyDictionaryStore::new(&self.disk).save(&self.mgr, txn, &self.dict)?;
        let lsn = self.mgr.commit(txn)?;
        if self.mgr.checkpoint_due(self.config.checkpoint_interval_commits) {
            self.mgr.checkpoint()?;
        }
        Ok(lsn)
    }

    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        self.mgr.abort(txn)
    }

    fn persist_catalog(&self, txn: &mut Transaction) -> Result<()> {
        let snapshot: Vec<CollectionMetadata> = self.collections.read().values().map(|c| c.metadata()).collect();
        Catalog::new(&self.disk).save(&self.mgr, txn, &snapshot)
    }

    /// Runs `f` inside a fresh transaction, aborting it on any error `f`
    /// returns and committing (persisting the catalog snapshot) otherwise.
    fn with_txn<R>(&self, isolation: Isolation, f: impl FnOnce(&mut Transaction) -> Result<R>) -> Result<R> {
        let mut txn = self.mgr.begin(isolation)?;
        match f(&mut txn) {
            Ok(value) => {
                self.commit(&mut txn)?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.abort(&mut txn);
                Err(e)
            }
        }
    }

    /// Registers a new, empty collection. No-op if one by that name exists.
    pub fn create_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Ok(());
        }
        let meta = CollectionMetadata { name: name.to_string(), primary_root_page: 0, indexes: Vec::new() };
        collections.insert(name.to_string(), Arc::new(Collection::new(meta)));
        Ok(())
    }

    #[must_use]
    pub fn list_collections(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections.read().get(name).cloned().ok_or_else(|| DbError::NoSuchCollection(name.to_string()))
    }

    pub fn insert(&self, collection: &str, fields: Vec<(String, Value)>) -> Result<PolymorphicId> {
        let coll = self.collection(collection)?;
        self.with_txn(self.config.default_isolation, |txn| coll.insert(&self.disk, &self.dict, &self.mgr, txn, fields))
    }

    pub fn insert_bulk(&self, collection: &str, docs: Vec<Vec<(String, Value)>>) -> Result<Vec<PolymorphicId>> {
        let coll = self.collection(collection)?;
        self.with_txn(self.config.default_isolation, |txn| coll.insert_bulk(&self.disk, &self.dict, &self.mgr, txn, docs))
    }

    pub fn find_by_id(&self, collection: &str, id: &PolymorphicId) -> Result<Option<Vec<(String, Value)>>> {
        let coll = self.collection(collection)?;
        let txn = self.mgr.begin(self.config.default_isolation)?;
        let result = coll.find_by_id(&self.disk, &self.dict, &self.mgr, &txn, id);
        let mut txn = txn;
        let _ = self.mgr.commit(&mut txn);
        result
    }

    pub fn find_all(&self, collection: &str) -> Result<Vec<Vec<(String, Value)>>> {
        let coll = self.collection(collection)?;
        let txn = self.mgr.begin(self.config.default_isolation)?;
        let result = coll.find_all(&self.dict, &self.disk, &self.mgr, &txn);
        let mut txn = txn;
        let _ = self.mgr.commit(&mut txn);
        result
    }

    pub fn scan(&self, collection: &str, index_name: &str, predicate: &Predicate) -> Result<Vec<Vec<(String, Value)>>> {
        let coll = self.collection(collection)?;
        let txn = self.mgr.begin(self.config.default_isolation)?;
        let result = coll.scan(&self.dict, &self.disk, &self.mgr, &txn, index_name, predicate);
        let mut txn = txn;
        let _ = self.mgr.commit(&mut txn);
        result
    }

    pub fn range_query(
        &self,
        collection: &str,
        index_name: &str,
        low: Option<&Value>,
        high: Option<&Value>,
    ) -> Result<Vec<Vec<(String, Value)>>> {
        let coll = self.collection(collection)?;
        let txn = self.mgr.begin(self.config.default_isolation)?;
        let result = coll.range_query(&self.dict, &self.disk, &self.mgr, &txn, index_name, low, high);
        let mut txn = txn;
        let _ = self.mgr.commit(&mut txn);
        result
    }

    pub fn update(&self, collection: &str, id: &PolymorphicId, fields: Vec<(String, Value)>) -> Result<bool> {
        let coll = self.collection(collection)?;
        self.with_txn(self.config.default_isolation, |txn| coll.update(&self.disk, &self.dict, &self.mgr, txn, id, fields))
    }

    pub fn delete(&self, collection: &str, id: &PolymorphicId) -> Result<bool> {
        let coll = self.collection(collection)?;
        self.with_txn(self.config.default_isolation, |txn| coll.delete(&self.disk, &self.dict, &self.mgr, txn, id))
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let coll = self.collection(collection)?;
        let txn = self.mgr.begin(self.config.default_isolation)?;
        let result = coll.count(&self.disk, &self.mgr, &txn);
        let mut txn = txn;
        let _ = self.mgr.commit(&mut txn);
        result
    }

    pub fn create_index(&self, collection: &str, name: &str, field_paths: Vec<String>, kind: IndexKind, unique: bool) -> Result<()> {
        let coll = self.collection(collection)?;
        self.with_txn(self.config.default_isolation, |txn| {
            coll.create_index(&self.disk, &self.dict, &self.mgr, txn, name, field_paths, kind, unique)
        })
    }

    pub fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
        let coll = self.collection(collection)?;
        self.with_txn(self.config.default_isolation, |txn| coll.drop_index(&self.disk, &self.mgr, txn, name))
    }

    pub fn list_indexes(&self, collection: &str) -> Result<Vec<IndexDescriptor>> {
        Ok(self.collection(collection)?.list_indexes())
    }

    /// Checkpoints, then copies the page file to `dest_path`. The WAL is
    /// empty immediately after a checkpoint, so the copied file alone is a
    /// self-consistent snapshot (§5 "backup").
    pub fn backup(&self, dest_path: impl AsRef<Path>) -> Result<()> {
        self.mgr.checkpoint()?;
        std::fs::copy(&self.path, dest_path)?;
        Ok(())
    }
}
