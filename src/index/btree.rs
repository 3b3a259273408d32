use super::{Indexer, IndexIterator, SnapshotIterator};
use crate::data::log_record::LogRecordPos;
use crate::error::Result;

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-memory ordered-map directory. The default flavor: every operation is
/// a short critical section on one reader-writer lock.
pub(crate) struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, LogRecordPos>>,
}

impl BTreeIndex {
    pub(crate) fn new() -> Self {
        Self { tree: RwLock::new(BTreeMap::new()) }
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
        self.tree.write().insert(key, pos)
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.tree.write().remove(key)
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let tree = self.tree.read();
        let mut items: Vec<_> = tree.iter().map(|(k, v)| (k.clone(), *v)).collect();
        if reverse {
            items.reverse();
        }
        Box::new(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::check_indexer_contract;

    #[test]
    fn btree_indexer_contract() {
        check_indexer_contract(&BTreeIndex::new());
    }
}
