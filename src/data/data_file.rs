use super::log_record::{
    decode_log_record_header, max_log_record_header_size, LogRecord, LogRecordPos, LogRecordType,
    CRC_SIZE,
};
use crate::error::{Error, Result};
use crate::fio::{new_io_manager, IoManager, IoType};

use std::path::{Path, PathBuf};

pub(crate) const DATA_FILE_SUFFIX: &str = ".data";
pub(crate) const HINT_FILE_NAME: &str = "hint-index";
pub(crate) const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub(crate) const SEQ_NO_FILE_NAME: &str = "seq.no";

/// One append-only segment of the log, addressed by a monotonically
/// increasing file id. The same record container backs the hint,
/// merge-finished, and seq-no sidecar files, which simply reuse id 0.
pub(crate) struct DataFile {
    file_id: u32,
    /// Next append position. Mirrors the physical file length; appends go
    /// through an append-mode handle, so the two cannot drift.
    write_off: u64,
    io: Box<dyn IoManager>,
}

/// Builds the segment path for a file id: `NNNNNNNNN.data`, zero-padded so
/// lexical and numeric order agree.
pub(crate) fn data_file_name(dir_path: &Path, file_id: u32) -> PathBuf {
    dir_path.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
}

impl DataFile {
    /// Opens (or creates) the segment with the given id in `dir_path`.
    pub(crate) fn new(dir_path: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        let io = new_io_manager(&data_file_name(dir_path, file_id), io_type)?;
        Ok(Self { file_id, write_off: 0, io })
    }

    /// Opens the hint file, written by merge and scanned at startup.
    pub(crate) fn hint_file(dir_path: &Path) -> Result<Self> {
        let io = new_io_manager(&dir_path.join(HINT_FILE_NAME), IoType::StandardFile)?;
        Ok(Self { file_id: 0, write_off: 0, io })
    }

    /// Opens the marker file recording the lowest non-merged file id.
    pub(crate) fn merge_finished_file(dir_path: &Path) -> Result<Self> {
        let io = new_io_manager(&dir_path.join(MERGE_FINISHED_FILE_NAME), IoType::StandardFile)?;
        Ok(Self { file_id: 0, write_off: 0, io })
    }

    /// Opens the sidecar holding the last committed sequence number.
    pub(crate) fn seq_no_file(dir_path: &Path) -> Result<Self> {
        let io = new_io_manager(&dir_path.join(SEQ_NO_FILE_NAME), IoType::StandardFile)?;
        Ok(Self { file_id: 0, write_off: 0, io })
    }

    pub(crate) fn file_id(&self) -> u32 {
        self.file_id
    }

    pub(crate) fn write_off(&self) -> u64 {
        self.write_off
    }

    pub(crate) fn set_write_off(&mut self, offset: u64) {
        self.write_off = offset;
    }

    pub(crate) fn file_size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Appends raw encoded bytes and advances the write offset.
    pub(crate) fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.io.write(buf)?;
        self.write_off += n as u64;
        Ok(n)
    }

    /// Appends a hint record: the bare user key mapped to an encoded
    /// position in the merged segments.
    pub(crate) fn write_hint_record(&mut self, key: Vec<u8>, pos: &LogRecordPos) -> Result<()> {
        let record =
            LogRecord { key, value: pos.encode(), record_type: LogRecordType::Normal };
        self.write(&record.encode())?;
        Ok(())
    }

    pub(crate) fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Reopens the underlying handle with a different I/O flavor; used to
    /// drop the startup memory maps once recovery is done.
    pub(crate) fn set_io_type(&mut self, dir_path: &Path, io_type: IoType) -> Result<()> {
        self.io = new_io_manager(&data_file_name(dir_path, self.file_id), io_type)?;
        Ok(())
    }

    /// Reads the record starting at `offset`, returning it together with
    /// its full encoded size so scans can advance.
    ///
    /// The header read is clamped to the bytes remaining in the file, so a
    /// record torn by a crash decodes as end-of-file rather than garbage:
    /// [`Error::ReadDataFileEof`] terminates the caller's scan. A record
    /// whose checksum does not match fails with [`Error::InvalidRecordCrc`].
    pub(crate) fn read_log_record(&self, offset: u64) -> Result<(LogRecord, u64)> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Err(Error::ReadDataFileEof);
        }

        let header_len = (max_log_record_header_size() as u64).min(file_size - offset) as usize;
        let mut header_buf = vec![0u8; header_len];
        self.io.read(&mut header_buf, offset)?;
        let Some((header, header_size)) = decode_log_record_header(&header_buf) else {
            return Err(Error::ReadDataFileEof);
        };
        if header.crc == 0 && header.key_size == 0 && header.value_size == 0 {
            return Err(Error::ReadDataFileEof);
        }

        // A payload extending past the end of the file is a torn tail.
        let record_size = (header_size + header.key_size + header.value_size) as u64;
        if offset + record_size > file_size {
            return Err(Error::ReadDataFileEof);
        }

        let mut kv_buf = vec![0u8; header.key_size + header.value_size];
        if !kv_buf.is_empty() {
            self.io.read(&mut kv_buf, offset + header_size as u64)?;
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header_buf[CRC_SIZE..header_size]);
        hasher.update(&kv_buf);
        if hasher.finalize() != header.crc {
            return Err(Error::InvalidRecordCrc);
        }

        let value = kv_buf.split_off(header.key_size);
        let record = LogRecord {
            key: kv_buf,
            value,
            record_type: LogRecordType::from_u8(header.record_type),
        };
        Ok((record, record_size))
    }
}
