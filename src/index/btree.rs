//! Persistent B+-tree (§4.G): keys are opaque byte strings with a
//! documented total order; leaves are linked for bidirectional range scans.
//!
//! Node pages are mutated through the transaction manager, same as data
//! pages, so index structure changes are WAL-protected and recovered by the
//! same REDO/UNDO pass (§4.D) as everything else. Page allocation itself
//! (picking a fresh page id) is not transactional, matching §4.B: only the
//! *content* written into an allocated page goes through the WAL.
//!
//! Rebalancing policy: insert splits a node the moment its encoded size
//! would exceed the page budget, propagating a separator upward exactly as
//! specified. Delete merges a node with its right sibling only when it
//! becomes completely empty, rather than at a fill-factor threshold; this
//! keeps the tree correct (order-preserving, no dangling children) without
//! requiring a fixed fanout constant for variable-length keys. A root that
//! collapses to a single child is replaced by that child, shrinking the
//! tree's height.

use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::errors::{DbError, Result};
use crate::index::key::IndexKey;
use crate::page::header::{PAGE_HEADER_LEN, PageHeader, PageType, write_checksum};
use crate::page::PageFile;
use crate::txn::{Transaction, TransactionManager};
use crate::types::{DocumentLocation, PageId};

const NONE_PAGE: PageId = 0;
const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Internal { keys: Vec<Vec<u8>>, children: Vec<PageId> },
    Leaf { entries: Vec<(Vec<u8>, DocumentLocation)>, prev: PageId, next: PageId },
}

impl Node {
    fn page_type(&self) -> PageType {
        match self {
            Node::Internal { .. } => PageType::IndexInternal,
            Node::Leaf { .. } => PageType::IndexLeaf,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, BINCODE_CONFIG).map_err(DbError::Encode)
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let (node, _) = bincode::serde::decode_from_slice(buf, BINCODE_CONFIG).map_err(DbError::Decode)?;
        Ok(node)
    }
}

/// Result of a recursive insert: whether the child split, and if so the
/// separator key and new right sibling page to insert into the parent.
enum InsertOutcome {
    Done,
    Split { separator: Vec<u8>, right_page: PageId },
}

pub struct BTree<'a> {
    disk: &'a PageFile,
}

impl<'a> BTree<'a> {
    #[must_use]
    pub fn new(disk: &'a PageFile) -> Self {
        Self { disk }
    }

    fn node_capacity(&self) -> usize {
        self.disk.page_size() as usize - PAGE_HEADER_LEN
    }

    fn read_node(&self, mgr: &TransactionManager, txn: &Transaction, page_id: PageId) -> Result<Node> {
        let buf = mgr.read_page(txn, page_id)?;
        Node::decode(&buf[PAGE_HEADER_LEN..])
    }

    fn write_node(&self, mgr: &TransactionManager, txn: &mut Transaction, page_id: PageId, node: &Node) -> Result<()> {
        let before = mgr.read_page(txn, page_id)?;
        let page_size = self.disk.page_size() as usize;
        let body = node.encode()?;
        if body.len() > self.node_capacity() {
            return Err(DbError::TooLarge(body.len()));
        }
        let mut after = vec![0u8; page_size];
        PageHeader::new(node.page_type(), page_id).write_into(&mut after);
        after[PAGE_HEADER_LEN..PAGE_HEADER_LEN + body.len()].copy_from_slice(&body);
        write_checksum(&mut after);
        mgr.stage_write(txn, page_id, before, after)
    }

    fn alloc_leaf(&self) -> Result<PageId> {
        self.disk.allocate_page(PageType::IndexLeaf)
    }

    fn alloc_internal(&self) -> Result<PageId> {
        self.disk.allocate_page(PageType::IndexInternal)
    }

    /// Inserts `(key, location)`. Returns the (possibly new) root page id.
    /// `root == 0` means the tree is empty; the first insert allocates the
    /// initial leaf and becomes the new root.
    pub fn insert(
        &self,
        mgr: &TransactionManager,
        txn: &mut Transaction,
        root: PageId,
        key: &IndexKey,
        location: DocumentLocation,
        unique: bool,
    ) -> Result<PageId> {
        if root == NONE_PAGE {
            let page_id = self.alloc_leaf()?;
            let node = Node::Leaf { entries: vec![(key.as_bytes().to_vec(), location)], prev: NONE_PAGE, next: NONE_PAGE };
            self.write_node(mgr, txn, page_id, &node)?;
            return Ok(page_id);
        }

        match self.insert_into(mgr, txn, root, key, location, unique)? {
            InsertOutcome::Done => Ok(root),
            InsertOutcome::Split { separator, right_page } => {
                let new_root_id = self.alloc_internal()?;
                let new_root = Node::Internal { keys: vec![separator], children: vec![root, right_page] };
                self.write_node(mgr, txn, new_root_id, &new_root)?;
                Ok(new_root_id)
            }
        }
    }

    fn insert_into(
        &self,
        mgr: &TransactionManager,
        txn: &mut Transaction,
        page_id: PageId,
        key: &IndexKey,
        location: DocumentLocation,
        unique: bool,
    ) -> Result<InsertOutcome> {
        let node = self.read_node(mgr, txn, page_id)?;
        match node {
            Node::Leaf { mut entries, prev, next } => {
                let key_bytes = key.as_bytes();
                let pos = entries.partition_point(|(k, loc)| (k.as_slice(), *loc) < (key_bytes, location));
                if unique {
                    if entries.iter().any(|(k, _)| k.as_slice() == key_bytes) {
                        return Err(DbError::DuplicateKey);
                    }
                } else if let Some((k, loc)) = entries.get(pos) {
                    if k.as_slice() == key_bytes && *loc == location {
                        return Ok(InsertOutcome::Done);
                    }
                }
                entries.insert(pos, (key_bytes.to_vec(), location));

                let candidate = Node::Leaf { entries: entries.clone(), prev, next };
                if candidate.encode()?.len() <= self.node_capacity() {
                    self.write_node(mgr, txn, page_id, &candidate)?;
                    return Ok(InsertOutcome::Done);
                }

                let mid = entries.len() / 2;
                let right_entries = entries.split_off(mid);
                let right_page = self.alloc_leaf()?;
                let right_node = Node::Leaf { entries: right_entries, prev: page_id, next };
                self.write_node(mgr, txn, right_page, &right_node)?;
                let left_node = Node::Leaf { entries, prev, next: right_page };
                self.write_node(mgr, txn, page_id, &left_node)?;
                if next != NONE_PAGE {
                    self.relink_prev(mgr, txn, next, right_page)?;
                }
                let separator = match &self.read_node(mgr, txn, right_page)? {
                    Node::Leaf { entries, .. } => entries[0].0.clone(),
                    Node::Internal { .. } => unreachable!(),
                };
                Ok(InsertOutcome::Split { separator, right_page })
            }
            Node::Internal { mut keys, mut children } => {
                let key_bytes = key.as_bytes();
                let child_idx = keys.partition_point(|k| k.as_slice() <= key_bytes);
                let child_page = children[child_idx];
                match self.insert_into(mgr, txn, child_page, key, location, unique)? {
                    InsertOutcome::Done => Ok(InsertOutcome::Done),
                    InsertOutcome::Split { separator, right_page } => {
                        keys.insert(child_idx, separator);
                        children.insert(child_idx + 1, right_page);
                        let candidate = Node::Internal { keys: keys.clone(), children: children.clone() };
                        if candidate.encode()?.len() <= self.node_capacity() {
                            self.write_node(mgr, txn, page_id, &candidate)?;
                            return Ok(InsertOutcome::Done);
                        }
                        let mid = keys.len() / 2;
                        let up_key = keys[mid].clone();
                        let right_keys = keys.split_off(mid + 1);
                        keys.pop();
                        let right_children = children.split_off(mid + 1);
                        let right_page = self.alloc_internal()?;
                        let right_node = Node::Internal { keys: right_keys, children: right_children };
                        self.write_node(mgr, txn, right_page, &right_node)?;
                        let left_node = Node::Internal { keys, children };
                        self.write_node(mgr, txn, page_id, &left_node)?;
                        Ok(InsertOutcome::Split { separator: up_key, right_page })
                    }
                }
            }
        }
    }

    fn relink_prev(&self, mgr: &TransactionManager, txn: &mut Transaction, page_id: PageId, new_prev: PageId) -> Result<()> {
        if let Node::Leaf { entries, next, .. } = self.read_node(mgr, txn, page_id)? {
            self.write_node(mgr, txn, page_id, &Node::Leaf { entries, prev: new_prev, next })?;
        }
        Ok(())
    }

    /// Deletes `(key, location)` if present. Returns `(new_root, found)`.
    pub fn delete(
        &self,
        mgr: &TransactionManager,
        txn: &mut Transaction,
        root: PageId,
        key: &IndexKey,
        location: DocumentLocation,
    ) -> Result<(PageId, bool)> {
        if root == NONE_PAGE {
            return Ok((root, false));
        }
        let found = self.delete_from(mgr, txn, root, key, location)?;
        let new_root = self.collapse_if_needed(mgr, txn, root)?;
        Ok((new_root, found))
    }

    fn delete_from(&self, mgr: &TransactionManager, txn: &mut Transaction, page_id: PageId, key: &IndexKey, location: DocumentLocation) -> Result<bool> {
        let node = self.read_node(mgr, txn, page_id)?;
        match node {
            Node::Leaf { mut entries, prev, next } => {
                let key_bytes = key.as_bytes();
                let before_len = entries.len();
                entries.retain(|(k, loc)| !(k.as_slice() == key_bytes && *loc == location));
                let found = entries.len() != before_len;
                if found {
                    self.write_node(mgr, txn, page_id, &Node::Leaf { entries, prev, next })?;
                }
                Ok(found)
            }
            Node::Internal { keys, children } => {
                let key_bytes = key.as_bytes();
                let child_idx = keys.partition_point(|k| k.as_slice() <= key_bytes);
                let child_page = children[child_idx];
                let found = self.delete_from(mgr, txn, child_page, key, location)?;
                if found {
                    self.merge_if_empty(mgr, txn, page_id, child_idx)?;
                }
                Ok(found)
            }
        }
    }

    /// If the child at `child_idx` is now empty, merges it away into a
    /// sibling (preferring the right sibling) and removes its separator.
    fn merge_if_empty(&self, mgr: &TransactionManager, txn: &mut Transaction, parent_page: PageId, child_idx: usize) -> Result<()> {
        let parent = self.read_node(mgr, txn, parent_page)?;
        let Node::Internal { mut keys, mut children } = parent else { return Ok(()) };
        let child_page = children[child_idx];
        let child = self.read_node(mgr, txn, child_page)?;
        let is_empty = match &child {
            Node::Leaf { entries, .. } => entries.is_empty(),
            Node::Internal { keys, .. } => keys.is_empty(),
        };
        if !is_empty {
            return Ok(());
        }

        if let Node::Leaf { prev, next, .. } = child {
            if prev != NONE_PAGE {
                self.relink_next(mgr, txn, prev, next)?;
            }
            if next != NONE_PAGE {
                self.relink_prev(mgr, txn, next, prev)?;
            }
        }
        self.disk.free_page(child_page)?;
        children.remove(child_idx);
        if child_idx < keys.len() {
            keys.remove(child_idx);
        } else if child_idx > 0 {
            keys.remove(child_idx - 1);
        }
        self.write_node(mgr, txn, parent_page, &Node::Internal { keys, children })
    }

    fn relink_next(&self, mgr: &TransactionManager, txn: &mut Transaction, page_id: PageId, new_next: PageId) -> Result<()> {
        if let Node::Leaf { entries, prev, .. } = self.read_node(mgr, txn, page_id)? {
            self.write_node(mgr, txn, page_id, &Node::Leaf { entries, prev, next: new_next })?;
        }
        Ok(())
    }

    /// If the root is an internal node with a single child (every key
    /// merged away), replaces it with that child, shrinking tree height.
    fn collapse_if_needed(&self, mgr: &TransactionManager, txn: &mut Transaction, root: PageId) -> Result<PageId> {
        match self.read_node(mgr, txn, root)? {
            Node::Internal { keys, children } if keys.is_empty() && children.len() == 1 => {
                self.disk.free_page(root)?;
                Ok(children[0])
            }
            _ => Ok(root),
        }
    }

    /// Finds the first matching location for `key` (unique: the sole
    /// location; non-unique: the one with the smallest `DocumentLocation`).
    pub fn find(&self, mgr: &TransactionManager, txn: &Transaction, root: PageId, key: &IndexKey) -> Result<Option<DocumentLocation>> {
        if root == NONE_PAGE {
            return Ok(None);
        }
        let leaf_page = self.descend_to_leaf(mgr, txn, root, key.as_bytes())?;
        let Node::Leaf { entries, .. } = self.read_node(mgr, txn, leaf_page)? else { unreachable!() };
        Ok(entries.into_iter().find(|(k, _)| k.as_slice() == key.as_bytes()).map(|(_, loc)| loc))
    }

    fn descend_to_leaf(&self, mgr: &TransactionManager, txn: &Transaction, mut page_id: PageId, key_bytes: &[u8]) -> Result<PageId> {
        loop {
            match self.read_node(mgr, txn, page_id)? {
                Node::Leaf { .. } => return Ok(page_id),
                Node::Internal { keys, children } => {
                    let idx = keys.partition_point(|k| k.as_slice() <= key_bytes);
                    page_id = children[idx];
                }
            }
        }
    }

    /// Recursively frees every page in the tree rooted at `root` (used by
    /// `drop_index`). `root == 0` is a no-op.
    pub fn free_all(&self, mgr: &TransactionManager, txn: &Transaction, root: PageId) -> Result<()> {
        if root == NONE_PAGE {
            return Ok(());
        }
        if let Node::Internal { children, .. } = self.read_node(mgr, txn, root)? {
            for child in children {
                self.free_all(mgr, txn, child)?;
            }
        }
        self.disk.free_page(root)
    }

    /// Materializes every `(key, location)` pair with `low <= key <= high`
    /// (per the supplied bounds) by walking the leaf chain from the
    /// leftmost matching leaf, in ascending order.
    pub fn range(
        &self,
        mgr: &TransactionManager,
        txn: &Transaction,
        root: PageId,
        low: Bound<&[u8]>,
        high: Bound<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, DocumentLocation)>> {
        if root == NONE_PAGE {
            return Ok(Vec::new());
        }
        let seek_key: &[u8] = match low {
            Bound::Included(k) | Bound::Excluded(k) => k,
            Bound::Unbounded => &[],
        };
        let mut page_id = self.descend_to_leaf(mgr, txn, root, seek_key)?;
        let mut out = Vec::new();
        loop {
            let Node::Leaf { entries, next, .. } = self.read_node(mgr, txn, page_id)? else { unreachable!() };
            for (k, loc) in entries {
                if below_low(&k, low) {
                    continue;
                }
                if above_high(&k, high) {
                    return Ok(out);
                }
                out.push((k, loc));
            }
            if next == NONE_PAGE {
                break;
            }
            page_id = next;
        }
        Ok(out)
    }
}

fn below_low(k: &[u8], low: Bound<&[u8]>) -> bool {
    match low {
        Bound::Included(l) => k < l,
        Bound::Excluded(l) => k <= l,
        Bound::Unbounded => false,
    }
}

fn above_high(k: &[u8], high: Bound<&[u8]>) -> bool {
    match high {
        Bound::Included(h) => k > h,
        Bound::Excluded(h) => k >= h,
        Bound::Unbounded => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, PageCache};
    use crate::types::Isolation;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn harness() -> (tempfile::TempDir, Arc<PageFile>, Arc<PageCache>, Arc<TransactionManager>) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(PageFile::create(dir.path().join("db.blite"), 512).unwrap());
        let cache = Arc::new(PageCache::new(disk.clone(), CacheConfig { capacity: 64 }));
        let wal = Arc::new(crate::wal::WriteAheadLog::open(dir.path().join("db.wal")).unwrap());
        let mgr = Arc::new(TransactionManager::new(wal, cache.clone(), disk.clone(), 0));
        (dir, disk, cache, mgr)
    }

    #[test]
    fn insert_find_delete_roundtrip() {
        let (_dir, disk, _cache, mgr) = harness();
        let tree = BTree::new(&disk);
        let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();
        let key = IndexKey::from_value(&crate::document::Value::Int32(7)).unwrap();
        let loc = DocumentLocation::new(1, 0);
        let root = tree.insert(&mgr, &mut txn, 0, &key, loc, true).unwrap();
        assert_eq!(tree.find(&mgr, &txn, root, &key).unwrap(), Some(loc));

        let (root, found) = tree.delete(&mgr, &mut txn, root, &key, loc).unwrap();
        assert!(found);
        assert_eq!(tree.find(&mgr, &txn, root, &key).unwrap(), None);
        mgr.commit(&mut txn).unwrap();
    }

    #[test]
    fn unique_violation_rejected() {
        let (_dir, disk, _cache, mgr) = harness();
        let tree = BTree::new(&disk);
        let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();
        let key = IndexKey::from_value(&crate::document::Value::Int32(1)).unwrap();
        let root = tree.insert(&mgr, &mut txn, 0, &key, DocumentLocation::new(1, 0), true).unwrap();
        let err = tree.insert(&mgr, &mut txn, root, &key, DocumentLocation::new(1, 1), true).unwrap_err();
        assert!(matches!(err, DbError::DuplicateKey));
    }

    #[test]
    fn range_scan_is_ordered_after_many_inserts() {
        let (_dir, disk, _cache, mgr) = harness();
        let tree = BTree::new(&disk);
        let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();
        let mut root = 0;
        let values = [30, 10, 50, 20, 40, 5, 45, 15, 25, 35];
        for (i, v) in values.iter().enumerate() {
            let key = IndexKey::from_value(&crate::document::Value::Int32(*v)).unwrap();
            root = tree.insert(&mgr, &mut txn, root, &key, DocumentLocation::new(1, i as u16), false).unwrap();
        }
        let all = tree.range(&mgr, &txn, root, Bound::Unbounded, Bound::Unbounded).unwrap();
        let keys: Vec<Vec<u8>> = all.into_iter().map(|(k, _)| k).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted, "range scan must return keys in non-decreasing order");
    }

    #[test]
    fn non_unique_duplicate_pair_is_idempotent() {
        let (_dir, disk, _cache, mgr) = harness();
        let tree = BTree::new(&disk);
        let mut txn = mgr.begin(Isolation::ReadCommitted).unwrap();
        let key = IndexKey::from_value(&crate::document::Value::Int32(1)).unwrap();
        let loc = DocumentLocation::new(1, 0);
        let root = tree.insert(&mgr, &mut txn, 0, &key, loc, false).unwrap();
        let root = tree.insert(&mgr, &mut txn, root, &key, loc, false).unwrap();
        let all = tree.range(&mgr, &txn, root, Bound::Unbounded, Bound::Unbounded).unwrap();
        assert_eq!(all.len(), 1);
    }
}
