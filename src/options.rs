use std::path::PathBuf;

/// Engine configuration. `dir_path` is the only required field; the
/// remaining knobs default to values suitable for a medium-sized store.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding every database file. One directory is one database.
    pub dir_path: PathBuf,
    /// Rotation threshold in bytes: a write that would push the active file
    /// past this size rotates to a fresh segment first.
    pub data_file_size: u64,
    /// Fsync the active file after every append.
    pub sync_writes: bool,
    /// Fsync once the accumulated unsynced bytes reach this count. Zero
    /// disables the accumulator.
    pub bytes_per_sync: usize,
    /// Which key directory implementation backs the engine.
    pub index_type: IndexType,
    /// Memory-map segment files for the read-heavy recovery scan at open,
    /// then fall back to buffered I/O.
    pub mmap_at_startup: bool,
    /// Minimum dead-bytes-to-directory-size ratio before a merge is allowed
    /// to run.
    pub data_file_merge_ratio: f32,
}

/// The key directory flavor. All three satisfy the same index contract;
/// the engine picks one at open and never switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// In-memory ordered map.
    BTree,
    /// In-memory radix tree.
    RadixTree,
    /// Disk-resident B+-tree; keys survive restarts without a replay scan.
    BPlusTree,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("caskdb-data"),
            data_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: false,
            data_file_merge_ratio: 0.5,
        }
    }
}

/// Options for [`crate::Engine::iter`].
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys beginning with this prefix. Empty matches everything.
    pub prefix: Vec<u8>,
    /// Traverse in descending key order.
    pub reverse: bool,
}

/// Options for [`crate::Engine::new_write_batch`].
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Maximum number of operations a single batch may hold at commit time.
    pub max_batch_num: usize,
    /// Fsync the active file once the batch is fully appended.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self { max_batch_num: 10_000, sync_writes: true }
    }
}
