use crate::batch::{key_with_seq_no, parse_key_with_seq_no, NON_TXN_SEQ_NO};
use crate::data::data_file::{
    data_file_name, DataFile, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use crate::data::log_record::{LogRecord, LogRecordType};
use crate::db::{Engine, FILE_LOCK_NAME};
use crate::error::{Error, Result};
use crate::fio::IoType;
use crate::index::BPTREE_INDEX_FILE_NAME;
use crate::options::IndexType;
use crate::util;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

const MERGE_DIR_SUFFIX: &str = "-merge";
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

impl Engine {
    /// Compacts the database: rewrites only the live records of sealed
    /// segments into a shadow directory next to the database, together
    /// with a hint file mapping each key to its new position, and finally
    /// publishes a marker naming the first segment the merge did not
    /// cover. The shadow directory is swapped in atomically by the next
    /// open; a crash anywhere before the marker lands simply orphans it.
    ///
    /// Writers keep running against the engine throughout: the candidate
    /// segment set is frozen up front, and liveness is judged against the
    /// current directory, so records superseded mid-merge are skipped.
    pub fn merge(&self) -> Result<()> {
        // A database that never saw a write has nothing to compact.
        if self.older_files.read().is_empty() && self.active_file.read().write_off() == 0 {
            return Ok(());
        }

        let Some(_merge_guard) = self.merging_lock.try_lock() else {
            return Err(Error::MergeInProgress);
        };

        let total_size = util::dir_size(&self.options.dir_path)?;
        let reclaimable = self.reclaim_size.load(Ordering::SeqCst);
        if !merge_ratio_reached(reclaimable, total_size, self.options.data_file_merge_ratio) {
            return Err(Error::MergeRatioUnreached);
        }
        // The rewrite needs room for a full copy of the live data.
        let live_size = total_size.saturating_sub(reclaimable);
        if live_size >= util::available_disk_size(&self.options.dir_path)? {
            return Err(Error::NoEnoughSpaceForMerge);
        }

        // Seal the active segment; everything below the fresh one is a
        // candidate, and the fresh id marks where merged data stops.
        let non_merge_file_id;
        let mut merge_file_ids: Vec<u32>;
        {
            let mut active = self.active_file.write();
            active.sync()?;
            let current_id = active.file_id();
            let new_active =
                DataFile::new(&self.options.dir_path, current_id + 1, IoType::StandardFile)?;
            let sealed = std::mem::replace(&mut *active, new_active);
            let mut older_files = self.older_files.write();
            older_files.insert(current_id, sealed);
            non_merge_file_id = current_id + 1;
            merge_file_ids = older_files.keys().copied().collect();
        }
        merge_file_ids.sort_unstable();

        log::info!(
            "Merging {} segments of {} to reclaim {} of {} bytes",
            merge_file_ids.len(),
            self.options.dir_path.display(),
            reclaimable,
            total_size,
        );

        // A leftover shadow directory belongs to an older, failed merge.
        let merge_path = merge_path(&self.options.dir_path);
        if merge_path.is_dir() {
            fs::remove_dir_all(&merge_path)?;
        }
        fs::create_dir_all(&merge_path)?;

        // The shadow engine only ever appends, so it runs unsynced with
        // the plain in-memory index and gets one sync at the end.
        let mut merge_options = (*self.options).clone();
        merge_options.dir_path = merge_path.clone();
        merge_options.sync_writes = false;
        merge_options.mmap_at_startup = false;
        merge_options.index_type = IndexType::BTree;
        let merge_engine = Engine::open(merge_options)?;
        let mut hint_file = DataFile::hint_file(&merge_path)?;

        for file_id in merge_file_ids {
            let data_file = DataFile::new(&self.options.dir_path, file_id, IoType::StandardFile)?;
            let mut offset = 0;
            loop {
                let (record, size) = match data_file.read_log_record(offset) {
                    Ok(read) => read,
                    Err(Error::ReadDataFileEof) => break,
                    Err(err) => return Err(err),
                };
                let (real_key, _) = parse_key_with_seq_no(&record.key);
                // Live iff the directory still points right here.
                if let Some(pos) = self.index.get(&real_key) {
                    if pos.file_id == file_id && pos.offset == offset {
                        let rewritten = LogRecord {
                            // Batch tags are history once the batch holds.
                            key: key_with_seq_no(&real_key, NON_TXN_SEQ_NO),
                            value: record.value,
                            record_type: LogRecordType::Normal,
                        };
                        let new_pos = merge_engine.append_log_record(&rewritten)?;
                        hint_file.write_hint_record(real_key, &new_pos)?;
                    }
                }
                offset += size;
            }
        }

        hint_file.sync()?;
        merge_engine.sync()?;

        // The marker is the commit point of the whole merge.
        let mut merge_fin_file = DataFile::merge_finished_file(&merge_path)?;
        let merge_fin_record = LogRecord {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: non_merge_file_id.to_string().into_bytes(),
            record_type: LogRecordType::Normal,
        };
        merge_fin_file.write(&merge_fin_record.encode())?;
        merge_fin_file.sync()?;
        merge_engine.close()?;

        log::info!("Merged {} into {}", self.options.dir_path.display(), merge_path.display());
        Ok(())
    }
}

/// Whether the dead-byte ratio justifies a merge.
fn merge_ratio_reached(reclaimable: u64, total_size: u64, min_ratio: f32) -> bool {
    total_size > 0 && (reclaimable as f32) / (total_size as f32) >= min_ratio
}

/// The shadow directory a merge of `dir_path` writes into: a sibling named
/// after the database with a `-merge` suffix.
pub(crate) fn merge_path(dir_path: &Path) -> PathBuf {
    let parent = dir_path.parent().unwrap_or_else(|| Path::new("."));
    let base = dir_path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    parent.join(format!("{base}{MERGE_DIR_SUFFIX}"))
}

/// Reads which file id a finished merge stopped short of.
pub(crate) fn load_non_merge_file_id(dir_path: &Path) -> Result<u32> {
    let merge_fin_file = DataFile::merge_finished_file(dir_path)?;
    let (record, _) = merge_fin_file.read_log_record(0)?;
    String::from_utf8(record.value)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or(Error::DataDirectoryCorrupted)
}

/// Completes a merge left by a previous run, called before segments are
/// opened: with a finished marker present, the superseded segments are
/// deleted and every merged file moves into the database directory; an
/// unfinished shadow directory is discarded wholesale. Either way the
/// shadow directory is gone afterwards. Returns whether a finished merge
/// was swapped in, since a swap renumbers every merged record and the
/// disk-resident index must be patched in response.
pub(crate) fn load_merge_files(dir_path: &Path) -> Result<bool> {
    let merge_path = merge_path(dir_path);
    if !merge_path.is_dir() {
        return Ok(false);
    }

    let mut merge_finished = false;
    let mut merge_file_names = Vec::new();
    for entry in fs::read_dir(&merge_path)? {
        let file_name = entry?.file_name();
        let Some(name) = file_name.to_str() else { continue };
        if name == MERGE_FINISHED_FILE_NAME {
            merge_finished = true;
        }
        // The shadow engine's own bookkeeping files stay behind.
        if name == SEQ_NO_FILE_NAME || name == FILE_LOCK_NAME || name == BPTREE_INDEX_FILE_NAME {
            continue;
        }
        merge_file_names.push(name.to_string());
    }

    if !merge_finished {
        fs::remove_dir_all(&merge_path)?;
        return Ok(false);
    }

    let non_merge_file_id = load_non_merge_file_id(&merge_path)?;
    for file_id in 0..non_merge_file_id {
        let path = data_file_name(dir_path, file_id);
        if path.is_file() {
            fs::remove_file(path)?;
        }
    }
    for name in merge_file_names {
        fs::rename(merge_path.join(&name), dir_path.join(&name))?;
    }
    fs::remove_dir_all(&merge_path)?;
    Ok(true)
}
