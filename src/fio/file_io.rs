use super::IoManager;
use crate::error::Result;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Standard file I/O: the file is opened in append mode, so every write
/// lands at the physical end of the file regardless of reader activity,
/// and reads go through positional `read_at` without moving any cursor.
pub(crate) struct FileIo {
    fd: File,
}

impl FileIo {
    pub(crate) fn new(path: &Path) -> Result<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self { fd })
    }
}

impl IoManager for FileIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        Ok(self.fd.read_at(buf, offset)?)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut fd = &self.fd;
        fd.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        Ok(self.fd.sync_all()?)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.fd.metadata()?.len())
    }
}
