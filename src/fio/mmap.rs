use super::IoManager;
use crate::error::{Error, Result};

use memmap2::Mmap;
use std::fs::OpenOptions;
use std::path::Path;

/// Read-only memory-mapped file access. Recovery scans at open touch every
/// live record once, and going through the page cache directly avoids a
/// copy per read. Writing through this backend is a programming error.
pub(crate) struct MmapIo {
    /// `None` when the file is empty: the OS rejects a zero-length mapping,
    /// and an empty segment reads as immediate EOF anyway.
    map: Option<Mmap>,
}

impl MmapIo {
    pub(crate) fn new(path: &Path) -> Result<Self> {
        let fd = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let map = match fd.metadata()?.len() {
            0 => None,
            _ => Some(unsafe { Mmap::map(&fd)? }),
        };
        Ok(Self { map })
    }
}

impl IoManager for MmapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let Some(map) = &self.map else {
            return Err(Error::ReadDataFileEof);
        };
        let offset = offset as usize;
        if offset >= map.len() {
            return Err(Error::ReadDataFileEof);
        }
        let n = buf.len().min(map.len() - offset);
        buf[..n].copy_from_slice(&map[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        unimplemented!("memory-mapped data files are read-only")
    }

    fn sync(&self) -> Result<()> {
        unimplemented!("memory-mapped data files are read-only")
    }

    fn size(&self) -> Result<u64> {
        Ok(self.map.as_ref().map_or(0, |m| m.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fio::FileIo;

    #[test]
    fn read_matches_file_io() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let path = dir.path().join("a.data");

        let file_io = FileIo::new(&path)?;
        file_io.write(b"key-a")?;
        file_io.write(b"key-b")?;

        let mmap_io = MmapIo::new(&path)?;
        assert_eq!(mmap_io.size()?, 10);
        let mut buf = [0u8; 5];
        mmap_io.read(&mut buf, 5)?;
        assert_eq!(&buf, b"key-b");
        Ok(())
    }

    #[test]
    fn empty_file_reads_as_eof() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let mmap_io = MmapIo::new(&dir.path().join("a.data"))?;
        assert_eq!(mmap_io.size()?, 0);
        let mut buf = [0u8; 1];
        assert_eq!(mmap_io.read(&mut buf, 0), Err(Error::ReadDataFileEof));
        Ok(())
    }

    #[test]
    fn read_past_end_is_eof() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("caskdb")?;
        let path = dir.path().join("a.data");
        FileIo::new(&path)?.write(b"key-a")?;

        let mmap_io = MmapIo::new(&path)?;
        let mut buf = [0u8; 1];
        assert_eq!(mmap_io.read(&mut buf, 5), Err(Error::ReadDataFileEof));
        Ok(())
    }
}
