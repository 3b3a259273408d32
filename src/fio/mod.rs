mod file_io;
mod mmap;

pub(crate) use file_io::FileIo;
pub(crate) use mmap::MmapIo;

use crate::error::Result;

use std::path::Path;

/// How a data file performs its raw I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IoType {
    /// Append-only writes plus positional reads on a regular file handle.
    StandardFile,
    /// Read-only memory map, used to warm recovery scans at open.
    MemoryMap,
}

/// Capability set every data file backend provides. Writes always append;
/// reads are positional. Files close when the handle drops.
pub(crate) trait IoManager: Send + Sync {
    /// Reads into `buf` starting at `offset`, returning the bytes read.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;
    /// Appends `buf`, returning the bytes written.
    fn write(&self, buf: &[u8]) -> Result<usize>;
    /// Flushes buffered data to stable storage.
    fn sync(&self) -> Result<()>;
    /// Current file length in bytes.
    fn size(&self) -> Result<u64>;
}

/// Opens the backend of the requested flavor for `path`.
pub(crate) fn new_io_manager(path: &Path, io_type: IoType) -> Result<Box<dyn IoManager>> {
    match io_type {
        IoType::StandardFile => Ok(Box::new(FileIo::new(path)?)),
        IoType::MemoryMap => Ok(Box::new(MmapIo::new(path)?)),
    }
}
