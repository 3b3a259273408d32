use crate::error::Result;

use std::fs;
use std::path::Path;

/// Total bytes occupied by the files in a directory, recursing into
/// subdirectories. Used by [`crate::Engine::stat`] and the merge preflight.
pub(crate) fn dir_size(path: &Path) -> Result<u64> {
    let mut size = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            size += dir_size(&entry.path())?;
        } else {
            size += metadata.len();
        }
    }
    Ok(size)
}

/// Free bytes on the filesystem hosting `path`.
pub(crate) fn available_disk_size(path: &Path) -> Result<u64> {
    Ok(fs4::available_space(path)?)
}
