//! Error types for the engine core.

use crate::types::PartitionId;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine core.
#[derive(Error, Debug)]
pub enum Error {
    /// State store errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Column family schema errors.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Command distribution errors.
    #[error("distribution error: {0}")]
    Distribution(#[from] DistributionError),

    /// Backup artifact errors.
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same record without side effects may succeed.
    ///
    /// Only recoverable storage conditions qualify; everything else must
    /// surface to the partition supervisor.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Storage(StorageError::Recoverable(_)))
    }
}

/// State store related errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The embedded engine signalled a transient condition. The current
    /// transaction has been rolled back and the record may be retried.
    #[error("recoverable storage condition: {0}")]
    Recoverable(String),

    /// Unrecoverable engine failure. The partition must stop processing
    /// rather than risk divergent state.
    #[error("fatal storage failure: {0}")]
    Fatal(String),

    /// Stored bytes failed to decode. Treated as fatal.
    #[error("corrupted stored data: {0}")]
    Corruption(String),
}

impl StorageError {
    /// Classify an embedded-engine error into recoverable or fatal.
    pub fn from_engine(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;
        match err.kind() {
            ErrorKind::Busy
            | ErrorKind::TimedOut
            | ErrorKind::TryAgain
            | ErrorKind::Aborted
            | ErrorKind::MergeInProgress => Self::Recoverable(err.to_string()),
            ErrorKind::Corruption => Self::Corruption(err.to_string()),
            _ => Self::Fatal(err.to_string()),
        }
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        Self::from_engine(err)
    }
}

/// Column family registration errors.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Two families were registered with the same byte prefix.
    #[error("column family prefix {prefix:#04x} already used by '{existing}'")]
    PrefixCollision { prefix: u8, existing: String },

    /// Two families were registered with the same name.
    #[error("column family '{name}' already registered")]
    NameCollision { name: String },
}

/// Command distribution errors.
#[derive(Error, Debug)]
pub enum DistributionError {
    /// The target partition is not registered with the transport.
    #[error("unknown target partition {0}")]
    UnknownPartition(PartitionId),

    /// The target partition is registered but currently unreachable.
    /// Delivery is retried by the redistribution loop.
    #[error("partition {0} unreachable")]
    Unreachable(PartitionId),

    /// The transport has shut down.
    #[error("transport closed")]
    TransportClosed,
}

/// Backup manifest errors.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Filesystem failure while writing or reading a backup.
    #[error("backup io: {0}")]
    Io(#[from] std::io::Error),

    /// The manifest does not start with the expected magic bytes.
    #[error("bad manifest magic")]
    BadMagic,

    /// The manifest was written by an unknown format version.
    #[error("unsupported manifest version {0}")]
    UnsupportedVersion(u32),

    /// The manifest body does not match its recorded checksum.
    #[error("manifest checksum mismatch (expected {expected:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// The manifest file is shorter than its header claims.
    #[error("manifest truncated")]
    Truncated,

    /// The compressed manifest body failed to decompress.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// The manifest body failed to decode.
    #[error("manifest decode failed: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let err = Error::Storage(StorageError::Recoverable("busy".into()));
        assert!(err.is_recoverable());

        let err = Error::Storage(StorageError::Fatal("io".into()));
        assert!(!err.is_recoverable());

        let err = Error::Config("bad".into());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_schema_error_display() {
        let err = SchemaError::PrefixCollision {
            prefix: 0x03,
            existing: "user-tasks".into(),
        };
        assert!(err.to_string().contains("0x03"));
        assert!(err.to_string().contains("user-tasks"));
    }
}
