mod bptree;
mod btree;
mod radix;

pub(crate) use bptree::BPTREE_INDEX_FILE_NAME;

use crate::data::log_record::LogRecordPos;
use crate::error::Result;
use crate::options::IndexType;

use std::path::Path;

/// The key directory: an ordered map from live user keys to the on-disk
/// position of their latest record. Implementations are interchangeable;
/// the engine names one at open and only ever talks through this set.
pub(crate) trait Indexer: Send + Sync {
    /// Inserts or replaces a key, returning the displaced position if the
    /// key was already present (the caller accounts it as reclaimable).
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos>;
    /// Looks up the position of a key.
    fn get(&self, key: &[u8]) -> Option<LogRecordPos>;
    /// Removes a key, returning the position it held if it was present.
    fn delete(&self, key: &[u8]) -> Option<LogRecordPos>;
    /// Number of live keys.
    fn len(&self) -> usize;
    /// A point-in-time iterator over the directory; see [`IndexIterator`].
    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator>;
    /// Flushes directory state that lives outside process memory.
    fn close(&self) -> Result<()>;
}

/// Cursor protocol shared by every index flavor. The cursor starts on the
/// first entry in traversal order; `next` advances until `valid` turns
/// false. `key`/`value` must only be called while `valid`.
pub(crate) trait IndexIterator: Send + Sync {
    /// Returns to the first entry in traversal order.
    fn rewind(&mut self);
    /// Positions at the first key `>=` the target (forward), or `<=` it
    /// (reverse).
    fn seek(&mut self, key: &[u8]);
    /// Advances one entry.
    fn next(&mut self);
    fn valid(&self) -> bool;
    fn key(&self) -> &[u8];
    fn value(&self) -> LogRecordPos;
}

/// Constructs the directory flavor picked in the options. The disk-resident
/// flavor stores its tree in a single file inside the database directory.
pub(crate) fn new_indexer(index_type: IndexType, dir_path: &Path) -> Result<Box<dyn Indexer>> {
    match index_type {
        IndexType::BTree => Ok(Box::new(btree::BTreeIndex::new())),
        IndexType::RadixTree => Ok(Box::new(radix::RadixTreeIndex::new())),
        IndexType::BPlusTree => Ok(Box::new(bptree::BPlusTreeIndex::new(dir_path)?)),
    }
}

/// Iterator over a materialized snapshot of the directory, taken when the
/// iterator is built. Later writers cannot invalidate the cursor; they
/// simply aren't visible through it. `items` is ordered for the requested
/// direction, so seeking is a partition-point search in either case.
pub(crate) struct SnapshotIterator {
    items: Vec<(Vec<u8>, LogRecordPos)>,
    reverse: bool,
    current: usize,
}

impl SnapshotIterator {
    /// `items` must be sorted ascending for forward traversal and
    /// descending for reverse.
    pub(crate) fn new(items: Vec<(Vec<u8>, LogRecordPos)>, reverse: bool) -> Self {
        Self { items, reverse, current: 0 }
    }
}

impl IndexIterator for SnapshotIterator {
    fn rewind(&mut self) {
        self.current = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.current = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) {
        self.current += 1;
    }

    fn valid(&self) -> bool {
        self.current < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.current].0
    }

    fn value(&self) -> LogRecordPos {
        self.items[self.current].1
    }
}
