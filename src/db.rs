use crate::batch::{key_with_seq_no, parse_key_with_seq_no, NON_TXN_SEQ_NO};
use crate::data::data_file::{
    DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use crate::data::log_record::{LogRecord, LogRecordPos, LogRecordType, TransactionRecord};
use crate::error::{Error, Result};
use crate::fio::IoType;
use crate::index::{new_indexer, Indexer};
use crate::merge::{load_merge_files, load_non_merge_file_id};
use crate::options::{IndexType, Options};
use crate::util;

use bytes::Bytes;
use fs4::fs_std::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

const INITIAL_FILE_ID: u32 = 0;
const SEQ_NO_KEY: &str = "seq.no";
pub(crate) const FILE_LOCK_NAME: &str = "flock";

/// A Bitcask-model key-value store: an append-only log of segment files on
/// disk plus a full in-memory key directory mapping every live key to its
/// latest on-disk position. See:
/// https://riak.com/assets/bitcask-intro.pdf
///
/// Writes append a record to the single active segment and update the
/// directory; reads follow the directory straight to one positional read.
/// Deletes append a tombstone. Once the active segment reaches the
/// configured size it becomes immutable and a fresh one is rotated in, so
/// a database directory is a set of numbered segments of which only the
/// highest-numbered accepts writes. Superseded and deleted records are
/// reclaimed by [`Engine::merge`], which rewrites live records into fresh
/// segments behind a shadow directory and publishes them atomically.
///
/// One directory is one database, held exclusively via a lock file. Within
/// the process the engine serves concurrent readers and writers: appends
/// are serialized by a write lock on the active segment, the directory has
/// its own lock, and rotated segments are immutable.
pub struct Engine {
    pub(crate) options: Arc<Options>,
    /// The segment currently open for append.
    pub(crate) active_file: Arc<RwLock<DataFile>>,
    /// Immutable rotated segments, by file id.
    pub(crate) older_files: Arc<RwLock<HashMap<u32, DataFile>>>,
    /// The key directory.
    pub(crate) index: Box<dyn Indexer>,
    /// Serializes batch commits so sequence numbers hit the log in order.
    pub(crate) batch_commit_lock: Mutex<()>,
    /// Last claimed transaction sequence number.
    pub(crate) seq_no: AtomicU64,
    /// Held for the duration of a merge; one merge at a time.
    pub(crate) merging_lock: Mutex<()>,
    /// Whether a seq-no sidecar was found at open. The disk-resident index
    /// cannot learn the sequence number any other way, so batches refuse to
    /// run without it on a non-fresh directory.
    pub(crate) seq_file_exists: bool,
    /// Whether this open created (or found empty) the database directory.
    pub(crate) is_initial: bool,
    lock_file: File,
    /// Unsynced append bytes, driving the bytes-per-sync accumulator.
    bytes_write: AtomicUsize,
    /// Bytes occupied by records known to be dead; drives the merge trigger.
    pub(crate) reclaim_size: AtomicU64,
    closed: AtomicBool,
}

/// A point-in-time summary of engine state.
#[derive(Debug, Clone)]
pub struct Stat {
    /// Live keys in the directory.
    pub key_count: usize,
    /// Segment files, the active one included.
    pub data_file_count: usize,
    /// Bytes a merge could reclaim.
    pub reclaimable_bytes: u64,
    /// Bytes the database directory occupies on disk.
    pub disk_size: u64,
}

impl Engine {
    /// Opens or creates a database in `options.dir_path`, taking exclusive
    /// ownership of the directory and rebuilding the key directory.
    ///
    /// Recovery order: a finished merge left by a previous run is swapped
    /// in first, then segments are enumerated; merged segments are indexed
    /// from the hint file and the rest are replayed record by record.
    /// Batch records replay only once their closing marker is seen, so a
    /// batch interrupted by a crash leaves no trace.
    pub fn open(options: Options) -> Result<Self> {
        check_options(&options)?;

        let dir_path = options.dir_path.clone();
        let mut is_initial = false;
        if !dir_path.is_dir() {
            is_initial = true;
            fs::create_dir_all(&dir_path)?;
        } else if fs::read_dir(&dir_path)?.next().is_none() {
            is_initial = true;
        }
        log::info!("Opening database {}", dir_path.display());

        // One process per directory, enforced for the life of the engine.
        let lock_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir_path.join(FILE_LOCK_NAME))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(Error::DatabaseIsUsing);
        }

        let merge_swapped = load_merge_files(&dir_path)?;

        let startup_io_type =
            if options.mmap_at_startup { IoType::MemoryMap } else { IoType::StandardFile };
        let mut data_files = load_data_files(&dir_path, startup_io_type)?;
        let file_ids: Vec<u32> = data_files.iter().map(|f| f.file_id()).collect();
        let active_file = match data_files.pop() {
            Some(file) => file,
            None => DataFile::new(&dir_path, INITIAL_FILE_ID, IoType::StandardFile)?,
        };
        let older_files: HashMap<u32, DataFile> =
            data_files.into_iter().map(|f| (f.file_id(), f)).collect();

        let mut engine = Self {
            index: new_indexer(options.index_type, &dir_path)?,
            options: Arc::new(options),
            active_file: Arc::new(RwLock::new(active_file)),
            older_files: Arc::new(RwLock::new(older_files)),
            batch_commit_lock: Mutex::new(()),
            seq_no: AtomicU64::new(0),
            merging_lock: Mutex::new(()),
            seq_file_exists: false,
            is_initial,
            lock_file,
            bytes_write: AtomicUsize::new(0),
            reclaim_size: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };

        match engine.options.index_type {
            // The persisted directory survives restarts on its own, except
            // that a just-swapped merge has renumbered every merged record:
            // patch those keys from the fresh hint file, then replay the
            // non-merged tail so writes made after the merge win again. On
            // any other open the hint file is stale relative to the
            // persisted directory and must not be applied.
            IndexType::BPlusTree => {
                let mut max_seq_no = NON_TXN_SEQ_NO;
                if merge_swapped {
                    engine.load_index_from_hint_file()?;
                    max_seq_no = engine.load_index_from_data_files(&file_ids)?;
                }
                if let Some(seq_no) = engine.load_seq_no()? {
                    engine.seq_no.store(seq_no.max(max_seq_no), Ordering::SeqCst);
                    engine.seq_file_exists = true;
                } else {
                    engine.seq_no.store(max_seq_no, Ordering::SeqCst);
                }
            }
            _ => {
                engine.load_index_from_hint_file()?;
                let max_seq_no = engine.load_index_from_data_files(&file_ids)?;
                engine.seq_no.store(max_seq_no, Ordering::SeqCst);
            }
        }

        // The startup maps are read-only; swap back to writable handles.
        if engine.options.mmap_at_startup {
            engine.reset_io_type()?;
        }

        // The file's size on disk is the one authoritative write offset.
        {
            let mut active = engine.active_file.write();
            let size = active.file_size()?;
            active.set_write_off(size);
        }

        log::info!("Indexed {} live keys in {}", engine.index.len(), dir_path.display());
        Ok(engine)
    }

    /// Stores a key-value pair, replacing any previous value for the key.
    pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let record = LogRecord {
            key: key_with_seq_no(&key, NON_TXN_SEQ_NO),
            value: value.to_vec(),
            record_type: LogRecordType::Normal,
        };

        // Holding the append lock across the index update keeps directory
        // visibility in log order for racing writers to the same key.
        let mut active = self.active_file.write();
        let pos = self.append_to(&mut active, &record)?;
        if let Some(old_pos) = self.index.put(key.to_vec(), pos) {
            self.reclaim_size.fetch_add(old_pos.size as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Fetches the value stored for a key.
    pub fn get(&self, key: Bytes) -> Result<Bytes> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let pos = self.index.get(&key).ok_or(Error::KeyNotFound)?;
        self.get_value_by_position(&pos)
    }

    /// Removes a key. Removing an absent key is a successful no-op and
    /// writes nothing.
    pub fn delete(&self, key: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.index.get(&key).is_none() {
            return Ok(());
        }
        let record = LogRecord {
            key: key_with_seq_no(&key, NON_TXN_SEQ_NO),
            value: Vec::new(),
            record_type: LogRecordType::Deleted,
        };

        let mut active = self.active_file.write();
        let pos = self.append_to(&mut active, &record)?;
        // The tombstone itself is dead weight from the moment it lands.
        self.reclaim_size.fetch_add(pos.size as u64, Ordering::SeqCst);
        if let Some(old_pos) = self.index.delete(&key) {
            self.reclaim_size.fetch_add(old_pos.size as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    /// All live keys, in ascending byte order.
    pub fn list_keys(&self) -> Result<Vec<Bytes>> {
        let mut iter = self.index.iterator(false);
        let mut keys = Vec::with_capacity(self.index.len());
        while iter.valid() {
            keys.push(Bytes::copy_from_slice(iter.key()));
            iter.next();
        }
        Ok(keys)
    }

    /// Calls `f` for every key-value pair in ascending key order, stopping
    /// early when `f` returns false.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Bytes, Bytes) -> bool,
    {
        let mut iter = self.index.iterator(false);
        while iter.valid() {
            let key = Bytes::copy_from_slice(iter.key());
            let value = self.get_value_by_position(&iter.value())?;
            if !f(key, value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Forces the active segment to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.active_file.read().sync()
    }

    /// Current engine statistics.
    pub fn stat(&self) -> Result<Stat> {
        let older_files = self.older_files.read();
        Ok(Stat {
            key_count: self.index.len(),
            data_file_count: older_files.len() + 1,
            reclaimable_bytes: self.reclaim_size.load(Ordering::SeqCst),
            disk_size: util::dir_size(&self.options.dir_path)?,
        })
    }

    /// Flushes everything and releases the directory lock. The engine also
    /// closes itself when dropped; closing twice is harmless.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.options.dir_path.is_dir() {
            return Ok(());
        }

        // Persist the sequence number; the disk-resident index mode has no
        // replay to recover it from.
        let mut seq_no_file = DataFile::seq_no_file(&self.options.dir_path)?;
        let record = LogRecord {
            key: SEQ_NO_KEY.as_bytes().to_vec(),
            value: self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
            record_type: LogRecordType::Normal,
        };
        seq_no_file.write(&record.encode())?;
        seq_no_file.sync()?;

        self.index.close()?;
        self.active_file.read().sync()?;
        FileExt::unlock(&self.lock_file)?;
        Ok(())
    }

    /// Reads the record a directory entry points at, resolving the segment
    /// through the active file or the older-file map.
    pub(crate) fn get_value_by_position(&self, pos: &LogRecordPos) -> Result<Bytes> {
        let active = self.active_file.read();
        let record = if active.file_id() == pos.file_id {
            active.read_log_record(pos.offset)?.0
        } else {
            let older_files = self.older_files.read();
            let data_file = older_files.get(&pos.file_id).ok_or(Error::DataFileNotFound)?;
            data_file.read_log_record(pos.offset)?.0
        };
        if record.record_type == LogRecordType::Deleted {
            return Err(Error::KeyNotFound);
        }
        Ok(record.value.into())
    }

    /// Appends a record through the engine's own write lock.
    pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<LogRecordPos> {
        let mut active = self.active_file.write();
        self.append_to(&mut active, record)
    }

    /// Appends a record to the active segment, rotating first if the write
    /// would push it past the size limit. Returns where the record landed.
    pub(crate) fn append_to(
        &self,
        active: &mut DataFile,
        record: &LogRecord,
    ) -> Result<LogRecordPos> {
        let encoded = record.encode();
        let record_len = encoded.len() as u64;

        if active.write_off() + record_len > self.options.data_file_size {
            // Seal the full segment and open its successor.
            active.sync()?;
            let current_id = active.file_id();
            let new_active =
                DataFile::new(&self.options.dir_path, current_id + 1, IoType::StandardFile)?;
            let sealed = std::mem::replace(active, new_active);
            self.older_files.write().insert(current_id, sealed);
        }

        let write_off = active.write_off();
        active.write(&encoded)?;

        let previous = self.bytes_write.fetch_add(encoded.len(), Ordering::SeqCst);
        let need_sync = self.options.sync_writes
            || (self.options.bytes_per_sync > 0
                && previous + encoded.len() >= self.options.bytes_per_sync);
        if need_sync {
            active.sync()?;
            self.bytes_write.store(0, Ordering::SeqCst);
        }

        Ok(LogRecordPos { file_id: active.file_id(), offset: write_off, size: record_len as u32 })
    }

    /// Populates the directory from the hint file, if merge left one. Hint
    /// records carry bare user keys and pre-encoded positions, so this
    /// skips the payload scan entirely for merged segments.
    fn load_index_from_hint_file(&self) -> Result<()> {
        let hint_path = self.options.dir_path.join(HINT_FILE_NAME);
        if !hint_path.is_file() {
            return Ok(());
        }
        let hint_file = DataFile::hint_file(&self.options.dir_path)?;
        let mut offset = 0;
        loop {
            match hint_file.read_log_record(offset) {
                Ok((record, size)) => {
                    self.index.put(record.key, LogRecordPos::decode(&record.value));
                    offset += size;
                }
                Err(Error::ReadDataFileEof) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Replays every non-merged segment in file-id order, rebuilding the
    /// directory and returning the largest transaction sequence number
    /// seen. Batch records are buffered per sequence and applied only when
    /// the closing marker turns up; leftovers are dropped.
    fn load_index_from_data_files(&self, file_ids: &[u32]) -> Result<u64> {
        let mut max_seq_no = NON_TXN_SEQ_NO;
        if file_ids.is_empty() {
            return Ok(max_seq_no);
        }

        // Segments below the non-merged id were indexed from the hint file.
        let mut non_merge_file_id = None;
        if self.options.dir_path.join(MERGE_FINISHED_FILE_NAME).is_file() {
            non_merge_file_id = Some(load_non_merge_file_id(&self.options.dir_path)?);
        }

        let mut txn_records: HashMap<u64, Vec<TransactionRecord>> = HashMap::new();
        let active_file = self.active_file.read();
        let older_files = self.older_files.read();

        for file_id in file_ids {
            if let Some(non_merge_id) = non_merge_file_id {
                if *file_id < non_merge_id {
                    continue;
                }
            }
            let mut offset = 0;
            loop {
                let read = if *file_id == active_file.file_id() {
                    active_file.read_log_record(offset)
                } else {
                    let data_file =
                        older_files.get(file_id).ok_or(Error::DataFileNotFound)?;
                    data_file.read_log_record(offset)
                };
                let (mut record, size) = match read {
                    Ok(read) => read,
                    Err(Error::ReadDataFileEof) => break,
                    Err(err) => return Err(err),
                };

                let pos = LogRecordPos { file_id: *file_id, offset, size: size as u32 };
                let (real_key, seq_no) = parse_key_with_seq_no(&record.key);
                if seq_no == NON_TXN_SEQ_NO {
                    self.update_index_on_replay(real_key, record.record_type, pos);
                } else if record.record_type == LogRecordType::TxnFinished {
                    // The whole batch is on disk; its effects become real.
                    if let Some(records) = txn_records.remove(&seq_no) {
                        for txn_record in records {
                            self.update_index_on_replay(
                                txn_record.record.key,
                                txn_record.record.record_type,
                                txn_record.pos,
                            );
                        }
                    }
                } else {
                    record.key = real_key;
                    txn_records.entry(seq_no).or_default().push(TransactionRecord { record, pos });
                }

                max_seq_no = max_seq_no.max(seq_no);
                offset += size;
            }
        }
        Ok(max_seq_no)
    }

    /// Applies one replayed record to the directory, keeping the reclaim
    /// accountant in step: displaced and tombstoned bytes are dead.
    fn update_index_on_replay(&self, key: Vec<u8>, record_type: LogRecordType, pos: LogRecordPos) {
        match record_type {
            LogRecordType::Normal => {
                if let Some(old_pos) = self.index.put(key, pos) {
                    self.reclaim_size.fetch_add(old_pos.size as u64, Ordering::SeqCst);
                }
            }
            LogRecordType::Deleted => {
                let mut dead = pos.size as u64;
                if let Some(old_pos) = self.index.delete(&key) {
                    dead += old_pos.size as u64;
                }
                self.reclaim_size.fetch_add(dead, Ordering::SeqCst);
            }
            LogRecordType::TxnFinished => unreachable!("markers are consumed by the replay loop"),
        }
    }

    /// Restores the sequence number from its sidecar, deleting the file so
    /// a stale snapshot can never shadow a newer value.
    fn load_seq_no(&self) -> Result<Option<u64>> {
        let path = self.options.dir_path.join(SEQ_NO_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let seq_no_file = DataFile::seq_no_file(&self.options.dir_path)?;
        let (record, _) = seq_no_file.read_log_record(0)?;
        let seq_no = String::from_utf8(record.value)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or(Error::DataDirectoryCorrupted)?;
        fs::remove_file(path)?;
        Ok(Some(seq_no))
    }

    /// Swaps every segment handle from the startup memory maps back to
    /// standard file I/O.
    fn reset_io_type(&self) -> Result<()> {
        let mut active = self.active_file.write();
        active.set_io_type(&self.options.dir_path, IoType::StandardFile)?;
        let mut older_files = self.older_files.write();
        for file in older_files.values_mut() {
            file.set_io_type(&self.options.dir_path, IoType::StandardFile)?;
        }
        Ok(())
    }
}

/// Flush and release on the way out; an explicit close has already made
/// this a no-op.
impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("failed to close database: {err}");
        }
    }
}

fn check_options(options: &Options) -> Result<()> {
    if options.dir_path.as_os_str().is_empty() {
        return Err(Error::DatabaseDirIsEmpty);
    }
    if options.data_file_size == 0 {
        return Err(Error::DataFileSizeInvalid);
    }
    if !(0.0..=1.0).contains(&options.data_file_merge_ratio) {
        return Err(Error::InvalidMergeRatio);
    }
    Ok(())
}

/// Enumerates the directory's segments, sorted ascending by file id so the
/// last is the newest.
fn load_data_files(dir_path: &Path, io_type: IoType) -> Result<Vec<DataFile>> {
    let mut file_ids = Vec::new();
    for entry in fs::read_dir(dir_path)? {
        let file_name = entry?.file_name();
        let Some(file_name) = file_name.to_str() else { continue };
        if let Some(stem) = file_name.strip_suffix(DATA_FILE_SUFFIX) {
            let file_id =
                stem.parse::<u32>().map_err(|_| Error::DataDirectoryCorrupted)?;
            file_ids.push(file_id);
        }
    }
    file_ids.sort_unstable();

    let mut data_files = Vec::with_capacity(file_ids.len());
    for file_id in file_ids {
        data_files.push(DataFile::new(dir_path, file_id, io_type)?);
    }
    Ok(data_files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::data_file::data_file_name;
    use crate::options::IteratorOptions;
    use crate::util::testkv::{test_key, test_value};

    fn test_options(dir: &tempfile::TempDir) -> Options {
        Options { dir_path: dir.path().join("db"), ..Default::default() }
    }

    #[test]
    fn open_creates_the_directory() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let options = test_options(&dir);
        let engine = Engine::open(options.clone())?;
        assert!(options.dir_path.is_dir());
        assert!(engine.is_initial);
        Ok(())
    }

    #[test]
    fn open_rejects_bad_options() {
        let mut options = Options::default();
        options.dir_path = std::path::PathBuf::new();
        assert_eq!(Engine::open(options).err(), Some(Error::DatabaseDirIsEmpty));

        let mut options = Options::default();
        options.data_file_size = 0;
        assert_eq!(Engine::open(options).err(), Some(Error::DataFileSizeInvalid));

        let mut options = Options::default();
        options.data_file_merge_ratio = 1.5;
        assert_eq!(Engine::open(options).err(), Some(Error::InvalidMergeRatio));
    }

    /// The directory lock admits one engine at a time and outlives neither.
    #[test]
    fn directory_lock_is_exclusive() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let options = test_options(&dir);
        let engine = Engine::open(options.clone())?;

        assert_eq!(Engine::open(options.clone()).err(), Some(Error::DatabaseIsUsing));

        engine.close()?;
        drop(engine);
        assert!(Engine::open(options).is_ok());
        Ok(())
    }

    #[test]
    fn put_get_delete_roundtrip() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let engine = Engine::open(test_options(&dir))?;

        engine.put(test_key(1), test_value(24))?;
        assert_eq!(engine.get(test_key(1))?, test_value(24));

        // Overwrites win; empty values are legal.
        engine.put(test_key(1), Bytes::from("two"))?;
        assert_eq!(engine.get(test_key(1))?, Bytes::from("two"));
        engine.put(test_key(2), Bytes::new())?;
        assert_eq!(engine.get(test_key(2))?, Bytes::new());

        engine.delete(test_key(1))?;
        assert_eq!(engine.get(test_key(1)).unwrap_err(), Error::KeyNotFound);
        // Deleting what is absent is quietly fine.
        engine.delete(test_key(99))?;

        assert_eq!(engine.get(test_key(42)).unwrap_err(), Error::KeyNotFound);
        Ok(())
    }

    #[test]
    fn empty_keys_are_rejected() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let engine = Engine::open(test_options(&dir))?;
        assert_eq!(engine.put(Bytes::new(), test_value(8)).unwrap_err(), Error::KeyIsEmpty);
        assert_eq!(engine.get(Bytes::new()).unwrap_err(), Error::KeyIsEmpty);
        assert_eq!(engine.delete(Bytes::new()).unwrap_err(), Error::KeyIsEmpty);
        Ok(())
    }

    #[test]
    fn state_survives_reopen() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let options = test_options(&dir);
        let engine = Engine::open(options.clone())?;

        for i in 0..100 {
            engine.put(test_key(i), test_value(64))?;
        }
        engine.put(test_key(1), Bytes::from("two"))?;
        engine.delete(test_key(2))?;
        engine.put(test_key(2), Bytes::from("back"))?;
        engine.close()?;
        drop(engine);

        let engine = Engine::open(options)?;
        assert_eq!(engine.list_keys()?.len(), 100);
        assert_eq!(engine.get(test_key(1))?, Bytes::from("two"));
        assert_eq!(engine.get(test_key(2))?, Bytes::from("back"));
        for i in 3..100 {
            assert_eq!(engine.get(test_key(i))?, test_value(64));
        }
        Ok(())
    }

    #[test]
    fn active_file_rotates_under_load() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut options = test_options(&dir);
        options.data_file_size = 32 * 1024;
        let engine = Engine::open(options.clone())?;

        // Thousands of overwrites of one key span several segments but
        // leave exactly one live key.
        for _ in 0..2000 {
            engine.put(test_key(1), test_value(128))?;
        }
        assert!(engine.older_files.read().len() >= 2);
        assert_eq!(engine.list_keys()?.len(), 1);
        assert!(engine.reclaim_size.load(Ordering::SeqCst) > 0);

        // Rotation points survive a restart.
        engine.close()?;
        drop(engine);
        let engine = Engine::open(options)?;
        assert_eq!(engine.list_keys()?.len(), 1);
        assert_eq!(engine.get(test_key(1))?, test_value(128));
        Ok(())
    }

    /// Truncating the log at any byte must recover exactly the records
    /// whose bytes made it to disk in full, silently dropping a torn tail.
    #[test]
    fn torn_tail_recovers_a_prefix() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let options = test_options(&dir);
        let data_path = data_file_name(&options.dir_path, 0);

        let engine = Engine::open(options.clone())?;
        let mut ends = Vec::new();
        engine.put(test_key(1), test_value(16))?;
        ends.push(fs::metadata(&data_path)?.len());
        engine.put(test_key(2), test_value(16))?;
        ends.push(fs::metadata(&data_path)?.len());
        engine.delete(test_key(1))?;
        ends.push(fs::metadata(&data_path)?.len());
        engine.put(test_key(3), test_value(16))?;
        ends.push(fs::metadata(&data_path)?.len());
        engine.close()?;
        drop(engine);

        let full_size = ends[3];
        for cut in (0..=full_size).rev() {
            let file = fs::OpenOptions::new().write(true).open(&data_path)?;
            file.set_len(cut)?;
            drop(file);

            let mut expect = Vec::new();
            if cut >= ends[0] && cut < ends[2] {
                expect.push(test_key(1));
            }
            if cut >= ends[1] {
                expect.push(test_key(2));
            }
            if cut >= ends[3] {
                expect.push(test_key(3));
            }

            let engine = Engine::open(options.clone())?;
            assert_eq!(engine.list_keys()?, expect, "truncated at {cut}");
            engine.close()?;
        }
        Ok(())
    }

    #[test]
    fn fold_visits_in_order_and_stops_early() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let engine = Engine::open(test_options(&dir))?;
        for i in 0..10 {
            engine.put(test_key(i), test_value(8))?;
        }

        let mut seen = Vec::new();
        engine.fold(|key, value| {
            assert_eq!(value, test_value(8));
            seen.push(key);
            seen.len() < 4
        })?;
        assert_eq!(seen, (0..4).map(test_key).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn stat_reports_engine_shape() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let engine = Engine::open(test_options(&dir))?;
        for i in 0..50 {
            engine.put(test_key(i), test_value(64))?;
        }
        engine.put(test_key(0), test_value(64))?;
        engine.delete(test_key(1))?;

        let stat = engine.stat()?;
        assert_eq!(stat.key_count, 49);
        assert_eq!(stat.data_file_count, 1);
        assert!(stat.reclaimable_bytes > 0);
        assert!(stat.disk_size > 0);
        Ok(())
    }

    #[test]
    fn sync_flushes_the_active_file() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let engine = Engine::open(test_options(&dir))?;
        engine.put(test_key(1), test_value(8))?;
        engine.sync()
    }

    #[test]
    fn bytes_per_sync_accumulator() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut options = test_options(&dir);
        options.bytes_per_sync = 1024;
        let engine = Engine::open(options)?;
        for i in 0..200 {
            engine.put(test_key(i), test_value(64))?;
        }
        assert_eq!(engine.get(test_key(42))?, test_value(64));
        Ok(())
    }

    #[test]
    fn sync_writes_mode_persists_each_append() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut options = test_options(&dir);
        options.sync_writes = true;
        let engine = Engine::open(options)?;
        engine.put(test_key(1), test_value(8))?;
        assert_eq!(engine.get(test_key(1))?, test_value(8));
        Ok(())
    }

    #[test]
    fn radix_index_mode() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut options = test_options(&dir);
        options.index_type = IndexType::RadixTree;
        let engine = Engine::open(options.clone())?;
        for i in 0..100 {
            engine.put(test_key(i), test_value(16))?;
        }
        engine.delete(test_key(3))?;
        engine.close()?;
        drop(engine);

        let engine = Engine::open(options)?;
        assert_eq!(engine.list_keys()?.len(), 99);
        assert_eq!(engine.get(test_key(7))?, test_value(16));
        Ok(())
    }

    #[test]
    fn bptree_index_mode_skips_replay() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut options = test_options(&dir);
        options.index_type = IndexType::BPlusTree;
        let engine = Engine::open(options.clone())?;
        for i in 0..100 {
            engine.put(test_key(i), test_value(16))?;
        }
        engine.delete(test_key(3))?;
        engine.close()?;
        drop(engine);

        // The directory file carries the index across the restart.
        let engine = Engine::open(options)?;
        assert!(engine.seq_file_exists);
        assert_eq!(engine.list_keys()?.len(), 99);
        assert_eq!(engine.get(test_key(7))?, test_value(16));
        assert_eq!(engine.get(test_key(3)).unwrap_err(), Error::KeyNotFound);
        Ok(())
    }

    #[test]
    fn mmap_at_startup_reads_the_same_data() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut options = test_options(&dir);
        options.data_file_size = 32 * 1024;
        let engine = Engine::open(options.clone())?;
        for i in 0..500 {
            engine.put(test_key(i), test_value(128))?;
        }
        engine.close()?;
        drop(engine);

        options.mmap_at_startup = true;
        let engine = Engine::open(options)?;
        assert_eq!(engine.list_keys()?.len(), 500);
        // Handles were swapped back to writable I/O after recovery.
        engine.put(test_key(500), test_value(128))?;
        assert_eq!(engine.get(test_key(500))?, test_value(128));
        Ok(())
    }

    #[test]
    fn concurrent_writers_and_readers() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mut options = test_options(&dir);
        options.data_file_size = 64 * 1024;
        let engine = std::sync::Arc::new(Engine::open(options.clone())?);

        let mut handles = Vec::new();
        for t in 0..4 {
            let engine = std::sync::Arc::clone(&engine);
            handles.push(std::thread::spawn(move || -> Result<()> {
                for i in (t * 500)..((t + 1) * 500) {
                    engine.put(test_key(i), test_value(64))?;
                    engine.get(test_key(i))?;
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle.join().expect("writer thread panicked")?;
        }

        assert_eq!(engine.list_keys()?.len(), 2000);
        engine.close()?;
        drop(engine);

        let engine = Engine::open(options)?;
        assert_eq!(engine.list_keys()?.len(), 2000);
        Ok(())
    }

    #[test]
    fn iterator_integrates_with_engine_state() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let engine = Engine::open(test_options(&dir))?;
        for i in 0..5 {
            engine.put(test_key(i), test_value(8))?;
        }
        engine.delete(test_key(0))?;

        let mut iter = engine.iter(IteratorOptions::default());
        let mut count = 0;
        while iter.valid() {
            count += 1;
            iter.next();
        }
        assert_eq!(count, 4);
        Ok(())
    }
}
