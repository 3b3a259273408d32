use crate::db::Engine;
use crate::error::Result;
use crate::index::IndexIterator;
use crate::options::IteratorOptions;

use bytes::Bytes;

/// Iterates the engine's keys in byte order, forward or reverse, optionally
/// restricted to a key prefix.
///
/// The key set is a snapshot taken when the iterator is built; values are
/// read live through the engine on each [`Iterator::value`] call, so a key
/// overwritten after construction yields its newest value.
pub struct Iterator<'a> {
    index_iter: Box<dyn IndexIterator>,
    engine: &'a Engine,
    options: IteratorOptions,
}

impl Engine {
    /// Opens an iterator over the current keys.
    pub fn iter(&self, options: IteratorOptions) -> Iterator<'_> {
        let mut iter =
            Iterator { index_iter: self.index.iterator(options.reverse), engine: self, options };
        iter.skip_to_next();
        iter
    }
}

#[allow(clippy::should_implement_trait)]
impl Iterator<'_> {
    /// Returns to the first matching key.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_next();
    }

    /// Positions at the first matching key `>=` the target (`<=` when
    /// reversed).
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_next();
    }

    /// Advances to the next matching key.
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_next();
    }

    /// Whether the cursor is on a key.
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// The current key. Only call while [`Iterator::valid`].
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// The current key's value, read through the engine.
    pub fn value(&self) -> Result<Bytes> {
        self.engine.get_value_by_position(&self.index_iter.value())
    }

    /// Releases the snapshot.
    pub fn close(self) {}

    /// Skips keys outside the configured prefix.
    fn skip_to_next(&mut self) {
        if self.options.prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() {
            if self.index_iter.key().starts_with(&self.options.prefix) {
                break;
            }
            self.index_iter.next();
        }
    }
}
