use thiserror::Error;

/// A caskdb error. All fallible engine operations return these.
///
/// The enum is `PartialEq` so that recovery code can match on the EOF
/// sentinel while replaying segment files; I/O errors are therefore carried
/// as their display string rather than the source `std::io::Error`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("key is empty")]
    KeyIsEmpty,
    #[error("key not found in database")]
    KeyNotFound,
    #[error("failed to update index")]
    IndexUpdateFailed,
    #[error("data file not found in database")]
    DataFileNotFound,
    #[error("invalid crc value, log record may be corrupted")]
    InvalidRecordCrc,
    #[error("data directory may be corrupted")]
    DataDirectoryCorrupted,
    #[error("database directory path is empty")]
    DatabaseDirIsEmpty,
    #[error("data file size must be greater than zero")]
    DataFileSizeInvalid,
    #[error("data file merge ratio must be between 0 and 1")]
    InvalidMergeRatio,
    #[error("the database directory is in use by another process")]
    DatabaseIsUsing,
    #[error("merge is already in progress, try again later")]
    MergeInProgress,
    #[error("merge ratio unreached, not enough dead bytes to reclaim")]
    MergeRatioUnreached,
    #[error("not enough free disk space for merge")]
    NoEnoughSpaceForMerge,
    #[error("batch exceeds the maximum operation count")]
    ExceedMaxBatchNum,
    #[error("write batch unavailable: sequence number file missing")]
    UnableToUseWriteBatch,
    /// Logical end of a segment file, hit while scanning records in
    /// sequence. Never surfaced to callers; replay loops terminate on it.
    #[error("reached end of data file")]
    ReadDataFileEof,
    #[error("io failure: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<jammdb::Error> for Error {
    fn from(err: jammdb::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// A caskdb result returning the crate-wide [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
