//! Storage error types.

use std::io;
use std::path::PathBuf;

use bale_common::error::BaleError;
use bale_common::types::InstanceId;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by storage sources.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum StorageError {
    /// Standard I/O error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// No bytes stored for the instance.
    #[error("instance {instance} not found")]
    NotFound { instance: InstanceId },

    /// Stored checksum does not match the bytes.
    #[error("checksum mismatch in {path}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        path: PathBuf,
        stored: u32,
        computed: u32,
    },

    /// Save range outside the supplied bytes.
    #[error("range {offset}+{length} outside {available} bytes")]
    InvalidRange {
        offset: usize,
        length: usize,
        available: usize,
    },

    /// A stored file is too short to hold its footer.
    #[error("file {path} truncated: {len} bytes")]
    Truncated { path: PathBuf, len: u64 },
}

impl StorageError {
    /// Creates a NotFound error.
    pub fn not_found(instance: InstanceId) -> Self {
        Self::NotFound { instance }
    }

    /// Creates an InvalidRange error.
    pub fn invalid_range(offset: usize, length: usize, available: usize) -> Self {
        Self::InvalidRange {
            offset,
            length,
            available,
        }
    }

    /// Returns true if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
            || matches!(self, Self::Io { source } if source.kind() == io::ErrorKind::NotFound)
    }

    /// Returns true if the stored bytes failed validation.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. } | Self::Truncated { .. })
    }
}

impl From<StorageError> for BaleError {
    fn from(err: StorageError) -> Self {
        if err.is_corruption() {
            BaleError::corrupt_data(err.to_string())
        } else {
            BaleError::storage(err.to_string())
        }
    }
}
