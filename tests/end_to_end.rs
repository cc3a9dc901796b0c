//! End-to-end scenarios exercised through the public `Database` facade, plus
//! a couple that need the lower-level `Collection`/`TransactionManager` seam
//! because the facade always runs a whole operation in one auto-committed
//! transaction (so a second, independent in-flight transaction on the same
//! page isn't reachable through `Database` alone).

use std::ops::Bound;
use std::sync::Arc;

use blite::document::{KeyDictionary, ObjectId, Value};
use blite::index::{BTree, IndexKey, Predicate};
use blite::{DbError, Isolation, OpenConfig};
use tempfile::tempdir;

fn config() -> OpenConfig {
    OpenConfig { page_size: 4096, cache_capacity: 64, default_isolation: Isolation::ReadCommitted, checkpoint_interval_commits: 1000 }
}

/// S1: insert a document with an explicit `_id`, find it back, count it.
#[test]
fn s1_insert_find_count() {
    let dir = tempdir().unwrap();
    let db = blite::Database::open(dir.path().join("db.blite"), config()).unwrap();
    db.create_collection("users").unwrap();

    let id = db
        .insert(
            "users",
            vec![
                ("_id".to_string(), Value::ObjectId(ObjectId::from_bytes([0u8; 12]))),
                ("name".to_string(), Value::String("A".to_string())),
                ("age".to_string(), Value::Int32(30)),
            ],
        )
        .unwrap();

    let found = db.find_by_id("users", &id).unwrap().unwrap();
    assert!(found.iter().any(|(k, v)| k == "name" && *v == Value::String("A".to_string())));
    assert_eq!(db.count("users").unwrap(), 1);
}

/// S2: an ordered index over `age`, range `[28, 36]` returns the two matches
/// in ascending order.
#[test]
fn s2_ordered_index_range_query() {
    let dir = tempdir().unwrap();
    let db = blite::Database::open(dir.path().join("db.blite"), config()).unwrap();
    db.create_collection("users").unwrap();
    for age in [25, 30, 35] {
        db.insert("users", vec![("age".to_string(), Value::Int32(age))]).unwrap();
    }
    db.create_index("users", "by_age", vec!["age".to_string()], blite::index::IndexKind::Ordered, false).unwrap();

    let low = Value::Int32(28);
    let high = Value::Int32(36);
    let results = db.range_query("users", "by_age", Some(&low), Some(&high)).unwrap();

    let ages: Vec<i32> = results
        .iter()
        .map(|fields| match fields.iter().find(|(k, _)| k == "age").unwrap().1 {
            Value::Int32(v) => v,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(ages, vec![30, 35]);
}

/// S3: inserting the same explicit `_id` twice fails the second time and
/// leaves the collection at one document.
#[test]
fn s3_duplicate_primary_key_rejected() {
    let dir = tempdir().unwrap();
    let db = blite::Database::open(dir.path().join("db.blite"), config()).unwrap();
    db.create_collection("users").unwrap();
    db.insert("users", vec![("_id".to_string(), Value::Int32(1)), ("name".to_string(), Value::String("X".into()))])
        .unwrap();
    let err = db
        .insert("users", vec![("_id".to_string(), Value::Int32(1)), ("name".to_string(), Value::String("X".into()))])
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey));
    assert_eq!(db.count("users").unwrap(), 1);
}

/// S4/S5: crash-safety at the WAL level. A `Write` with no trailing
/// `Commit` record is undone by recovery; a `Write` followed by a flushed
/// `Commit` survives recovery even though no checkpoint ever ran.
///
/// These drive `recovery::recover` directly rather than through
/// `Database::open`, since the facade always commits an insert synchronously
/// within the same call and can't leave a transaction uncommitted to
/// simulate a kill partway through it.
#[test]
fn s4_uncommitted_write_is_undone_by_recovery() {
    use blite::page::PageType;
    use blite::wal::{WalRecord, WriteAheadLog};

    let dir = tempdir().unwrap();
    let disk = blite::page::PageFile::create(dir.path().join("db.blite"), 512).unwrap();
    let page_id = disk.allocate_page(PageType::Data).unwrap();
    let wal = WriteAheadLog::open(dir.path().join("db.wal")).unwrap();

    let before = disk.read_page(page_id).unwrap();
    let mut after = before.clone();
    after[40] = 0x7F;

    wal.append(WalRecord::Begin { txn_id: 1 }).unwrap();
    wal.append(WalRecord::Write { txn_id: 1, page_id, before: before.clone(), after }).unwrap();
    wal.flush().unwrap();
    // No Commit record: the process was killed before the transaction finished.

    blite::recovery::recover(&wal, &disk).unwrap();
    assert_eq!(disk.read_page(page_id).unwrap(), before, "uncommitted write must not survive recovery");
}

#[test]
fn s5_committed_write_survives_recovery_without_checkpoint() {
    use blite::page::PageType;
    use blite::wal::{WalRecord, WriteAheadLog};

    let dir = tempdir().unwrap();
    let disk = blite::page::PageFile::create(dir.path().join("db.blite"), 512).unwrap();
    let page_id = disk.allocate_page(PageType::Data).unwrap();
    let wal = WriteAheadLog::open(dir.path().join("db.wal")).unwrap();

    let before = disk.read_page(page_id).unwrap();
    let mut after = before.clone();
    after[40] = 0x7F;

    wal.append(WalRecord::Begin { txn_id: 1 }).unwrap();
    wal.append(WalRecord::Write { txn_id: 1, page_id, before: before.clone(), after: after.clone() }).unwrap();
    wal.append(WalRecord::Commit { txn_id: 1 }).unwrap();
    wal.flush().unwrap();
    // No checkpoint: the on-disk page still shows `before`, only the WAL has the after-image.

    blite::recovery::recover(&wal, &disk).unwrap();
    assert_eq!(disk.read_page(page_id).unwrap(), after, "committed write must survive recovery even without a prior checkpoint");
}

/// S6: two transactions racing to update the same page conflict. This
/// exercises `Collection`/`TransactionManager` directly since `Database`'s
/// auto-committed operations never leave two transactions open on the same
/// document at once.
#[test]
fn s6_concurrent_updates_to_same_document_conflict() {
    use blite::cache::{CacheConfig, PageCache};
    use blite::collection::Collection;
    use blite::txn::TransactionManager;
    use blite::wal::WriteAheadLog;

    let dir = tempdir().unwrap();
    let disk = Arc::new(blite::page::PageFile::create(dir.path().join("db.blite"), 4096).unwrap());
    let cache = Arc::new(PageCache::new(disk.clone(), CacheConfig { capacity: 64 }));
    let wal = Arc::new(WriteAheadLog::open(dir.path().join("db.wal")).unwrap());
    let mgr = Arc::new(TransactionManager::new(wal, cache, disk.clone(), 0));
    let dict = KeyDictionary::new();

    let coll = Collection::new(blite::catalog::CollectionMetadata {
        name: "docs".to_string(),
        primary_root_page: 0,
        indexes: Vec::new(),
    });

    let mut setup_txn = mgr.begin(Isolation::ReadCommitted).unwrap();
    let id = coll.insert(&disk, &dict, &mgr, &mut setup_txn, vec![("v".to_string(), Value::Int32(1))]).unwrap();
    mgr.commit(&mut setup_txn).unwrap();

    let mut txn_a = mgr.begin(Isolation::ReadCommitted).unwrap();
    let mut txn_b = mgr.begin(Isolation::ReadCommitted).unwrap();

    coll.update(&disk, &dict, &mgr, &mut txn_a, &id, vec![("v".to_string(), Value::Int32(2))]).unwrap();
    let result_b = coll.update(&disk, &dict, &mgr, &mut txn_b, &id, vec![("v".to_string(), Value::Int32(3))]);

    assert!(matches!(result_b, Err(DbError::Conflict)), "second writer on the same page must conflict");
    mgr.commit(&mut txn_a).unwrap();
    mgr.abort(&mut txn_b).unwrap();

    let read_txn = mgr.begin(Isolation::ReadCommitted).unwrap();
    let found = coll.find_by_id(&disk, &dict, &mgr, &read_txn, &id).unwrap().unwrap();
    assert_eq!(found.iter().find(|(k, _)| k == "v").unwrap().1, Value::Int32(2));
}

/// A full collection reopen round-trips both the primary index and a
/// secondary index's contents, including `data_pages` reconstruction.
#[test]
fn reopen_preserves_indexes_and_documents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.blite");
    {
        let db = blite::Database::open(&path, config()).unwrap();
        db.create_collection("users").unwrap();
        for age in [18, 45, 62] {
            db.insert("users", vec![("age".to_string(), Value::Int32(age))]).unwrap();
        }
        db.create_index("users", "by_age", vec!["age".to_string()], blite::index::IndexKind::Ordered, false).unwrap();
        db.close().unwrap();
    }

    let db = blite::Database::open(&path, config()).unwrap();
    assert_eq!(db.count("users").unwrap(), 3);
    let key = IndexKey::from_value(&Value::Int32(40)).unwrap();
    let results = db.scan("users", "by_age", &Predicate::Ge(key)).unwrap();
    assert_eq!(results.len(), 2);
}

/// Direct B+-tree sanity check backing invariant 5 (order) at the
/// integration level, across inserts and deletes of a realistic size.
#[test]
fn btree_range_scan_stays_ordered_after_mixed_operations() {
    use blite::cache::{CacheConfig, PageCache};
    use blite::txn::TransactionManager;
    use blite::wal::WriteAheadLog;

    let dir = tempdir().unwrap();
    let disk = Arc::new(blite::page::PageFile::create(dir.path().join("db.blite"), 512).unwrap());
    let cache = Arc::new(PageCache::new(disk.clone(), CacheConfig { capacity: 64 }));
    let wal = Arc::new(WriteAheadLog::open(dir.path().join("db.wal")).unwrap());
    let mgr = Arc::new(TransactionManager::new(wal, cache, disk.clone(), 0));
    let tree = BTree::new(&disk);

    let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();
    let mut root = 0;
    for v in 0..200 {
        let key = IndexKey::from_value(&Value::Int32(v)).unwrap();
        root = tree.insert(&mgr, &mut txn, root, &key, blite::types::DocumentLocation::new(1, v as u16), false).unwrap();
    }
    for v in (0..200).step_by(3) {
        let key = IndexKey::from_value(&Value::Int32(v)).unwrap();
        let (new_root, _) = tree.delete(&mgr, &mut txn, root, &key, blite::types::DocumentLocation::new(1, v as u16)).unwrap();
        root = new_root;
    }
    let all = tree.range(&mgr, &txn, root, Bound::Unbounded, Bound::Unbounded).unwrap();
    let keys: Vec<Vec<u8>> = all.into_iter().map(|(k, _)| k).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    mgr.commit(&mut txn).unwrap();
}
