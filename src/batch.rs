use crate::data::log_record::{LogRecord, LogRecordType};
use crate::db::Engine;
use crate::error::{Error, Result};
use crate::options::{IndexType, WriteBatchOptions};

use bytes::Bytes;
use parking_lot::Mutex;
use prost::encoding::{decode_varint, encode_varint, encoded_len_varint};
use std::collections::HashMap;
use std::sync::atomic::Ordering;

/// Key of the marker record that closes a batch's sequence.
const TXN_FIN_KEY: &[u8] = b"txn-fin";
/// The sequence number stamped on standalone (non-batch) writes.
pub(crate) const NON_TXN_SEQ_NO: u64 = 0;

/// Buffers a group of writes and deletes, then commits them atomically:
/// either every operation survives a crash or none does.
///
/// Operations are staged in memory keyed by user key, so a later operation
/// on the same key within one batch replaces the earlier one. Nothing is
/// visible to readers until [`WriteBatch::commit`] returns.
pub struct WriteBatch<'a> {
    pending_writes: Mutex<HashMap<Vec<u8>, LogRecord>>,
    engine: &'a Engine,
    options: WriteBatchOptions,
}

impl Engine {
    /// Creates an empty write batch against this engine.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch<'_>> {
        // The disk-resident index never replays the log, so without the
        // seq-no sidecar a non-fresh database cannot stamp new batches.
        if self.options.index_type == IndexType::BPlusTree
            && !self.seq_file_exists
            && !self.is_initial
        {
            return Err(Error::UnableToUseWriteBatch);
        }
        Ok(WriteBatch {
            pending_writes: Mutex::new(HashMap::new()),
            engine: self,
            options,
        })
    }
}

impl WriteBatch<'_> {
    /// Stages a key-value pair.
    pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let record = LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            record_type: LogRecordType::Normal,
        };
        self.pending_writes.lock().insert(key.to_vec(), record);
        Ok(())
    }

    /// Stages a deletion. Deleting a key unknown to both the engine and
    /// this batch is a no-op; deleting a key only staged here just drops
    /// the staged write.
    pub fn delete(&self, key: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let mut pending_writes = self.pending_writes.lock();
        if self.engine.index.get(&key).is_none() {
            pending_writes.remove(key.as_ref() as &[u8]);
            return Ok(());
        }
        let record = LogRecord {
            key: key.to_vec(),
            value: Vec::new(),
            record_type: LogRecordType::Deleted,
        };
        pending_writes.insert(key.to_vec(), record);
        Ok(())
    }

    /// Writes every staged operation under a fresh sequence number,
    /// finishing with the marker record that makes the batch real at
    /// recovery, and only then applies the batch to the key directory.
    ///
    /// Committing an empty batch is a no-op. The batch can be reused after
    /// a successful commit.
    pub fn commit(&self) -> Result<()> {
        let mut pending_writes = self.pending_writes.lock();
        if pending_writes.is_empty() {
            return Ok(());
        }
        if pending_writes.len() > self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum);
        }

        // One batch at a time claims a sequence number and hits the log.
        let _commit_guard = self.engine.batch_commit_lock.lock();
        let seq_no = self.engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut active = self.engine.active_file.write();
        let mut positions = HashMap::with_capacity(pending_writes.len());
        for (key, record) in pending_writes.iter() {
            let pos = self.engine.append_to(
                &mut active,
                &LogRecord {
                    key: key_with_seq_no(key, seq_no),
                    value: record.value.clone(),
                    record_type: record.record_type,
                },
            )?;
            positions.insert(key.clone(), pos);
        }

        self.engine.append_to(
            &mut active,
            &LogRecord {
                key: key_with_seq_no(TXN_FIN_KEY, seq_no),
                value: Vec::new(),
                record_type: LogRecordType::TxnFinished,
            },
        )?;
        if self.options.sync_writes {
            active.sync()?;
        }

        // Durable now; make it visible.
        for (key, record) in pending_writes.iter() {
            let old_pos = match record.record_type {
                LogRecordType::Normal => self.engine.index.put(key.clone(), positions[key]),
                LogRecordType::Deleted => self.engine.index.delete(key),
                LogRecordType::TxnFinished => unreachable!("markers are never staged"),
            };
            if let Some(old_pos) = old_pos {
                self.engine.reclaim_size.fetch_add(old_pos.size as u64, Ordering::SeqCst);
            }
        }

        pending_writes.clear();
        Ok(())
    }
}

/// Prefixes a user key with its unsigned-varint sequence number; this is
/// the form every key takes on disk.
pub(crate) fn key_with_seq_no(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(encoded_len_varint(seq_no) + key.len());
    encode_varint(seq_no, &mut encoded);
    encoded.extend_from_slice(key);
    encoded
}

/// Splits an on-disk key into the user key and its sequence number.
pub(crate) fn parse_key_with_seq_no(key: &[u8]) -> (Vec<u8>, u64) {
    let mut buf = key;
    let seq_no = decode_varint(&mut buf).expect("corrupt sequence number prefix");
    (buf.to_vec(), seq_no)
}
