use super::{Indexer, IndexIterator, SnapshotIterator};
use crate::data::log_record::LogRecordPos;
use crate::error::Result;

use parking_lot::RwLock;
use radix_trie::{Trie, TrieCommon};

/// In-memory radix-tree directory. Same lock discipline and iterator
/// snapshotting as the ordered map; the trie trades pointer chasing for
/// prefix compression on long, similar keys.
pub(crate) struct RadixTreeIndex {
    tree: RwLock<Trie<Vec<u8>, LogRecordPos>>,
}

impl RadixTreeIndex {
    pub(crate) fn new() -> Self {
        Self { tree: RwLock::new(Trie::new()) }
    }
}

impl Indexer for RadixTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
        self.tree.write().insert(key, pos)
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.tree.read().get(&key.to_vec()).copied()
    }

    fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.tree.write().remove(&key.to_vec())
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let tree = self.tree.read();
        let mut items: Vec<_> = tree.iter().map(|(k, v)| (k.clone(), *v)).collect();
        // Trie traversal is already lexicographic; sorting keeps the
        // snapshot contract independent of the container.
        items.sort_by(|a, b| a.0.cmp(&b.0));
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
    fn radix_indexer_contract() {
        check_indexer_contract(&RadixTreeIndex::new());
    }
}
