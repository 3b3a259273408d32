use super::{Indexer, IndexIterator, SnapshotIterator};
use crate::data::log_record::LogRecordPos;
use crate::error::Result;

use jammdb::DB;
use std::path::Path;
use std::sync::Arc;

pub(crate) const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";
const BPTREE_BUCKET_NAME: &str = "caskdb-index";

/// Disk-resident B+-tree directory: keys and serialized positions live in
/// a single bucket of an embedded tree file, so the engine can open without
/// replaying the data files. Every operation is a short transaction on that
/// file; a failing transaction means the index store itself broke an
/// invariant, which is a bug rather than a recoverable condition.
pub(crate) struct BPlusTreeIndex {
    tree: Arc<DB>,
}

impl BPlusTreeIndex {
    pub(crate) fn new(dir_path: &Path) -> Result<Self> {
        let tree = DB::open(dir_path.join(BPTREE_INDEX_FILE_NAME))?;
        let tx = tree.tx(true)?;
        tx.get_or_create_bucket(BPTREE_BUCKET_NAME)?;
        tx.commit()?;
        Ok(Self { tree: Arc::new(tree) })
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
        let tx = self.tree.tx(true).expect("failed to begin b+tree transaction");
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME).expect("b+tree bucket missing");
        let old = bucket
            .put(key, pos.encode())
            .expect("failed to write b+tree entry")
            .map(|kv| LogRecordPos::decode(kv.value()));
        tx.commit().expect("failed to commit b+tree transaction");
        old
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        let tx = self.tree.tx(false).expect("failed to begin b+tree transaction");
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME).expect("b+tree bucket missing");
        bucket.get_kv(key).map(|kv| LogRecordPos::decode(kv.value()))
    }

    fn delete(&self, key: &[u8]) -> Option<LogRecordPos> {
        let tx = self.tree.tx(true).expect("failed to begin b+tree transaction");
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME).expect("b+tree bucket missing");
        let old = bucket.get_kv(key).map(|kv| LogRecordPos::decode(kv.value()));
        if old.is_some() {
            bucket.delete(key).expect("failed to delete b+tree entry");
        }
        tx.commit().expect("failed to commit b+tree transaction");
        old
    }

    fn len(&self) -> usize {
        let tx = self.tree.tx(false).expect("failed to begin b+tree transaction");
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME).expect("b+tree bucket missing");
        bucket.kv_pairs().count()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let tx = self.tree.tx(false).expect("failed to begin b+tree transaction");
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME).expect("b+tree bucket missing");
        let mut items: Vec<_> = bucket
            .kv_pairs()
            .map(|kv| (kv.key().to_vec(), LogRecordPos::decode(kv.value())))
            .collect();
        if reverse {
            items.reverse();
        }
        Box::new(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        // The embedded tree commits durably per transaction; nothing is
        // buffered in this process.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::{check_indexer_contract, pos};

    #[test]
    fn bptree_indexer_contract() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        check_indexer_contract(&BPlusTreeIndex::new(dir.path())?);
        Ok(())
    }

    #[test]
    fn bptree_entries_survive_reopen() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        {
            let index = BPlusTreeIndex::new(dir.path())?;
            let _ = index.put(b"key-a".to_vec(), pos(1, 0));
            let _ = index.put(b"key-b".to_vec(), pos(1, 16));
        }
        let index = BPlusTreeIndex::new(dir.path())?;
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(b"key-a"), Some(pos(1, 0)));
        Ok(())
    }
}
