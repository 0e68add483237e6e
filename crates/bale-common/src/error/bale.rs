//! Bale error types.
//!
//! Any format or consistency violation is reported immediately through one
//! of these variants. The byte buffers are closed, length-delimited
//! structures: an inconsistency means corruption and is never patched over.

use std::fmt;
use thiserror::Error;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Invalid argument provided.
    IllegalArgument = 0x0001,
    /// Operation attempted in the wrong lifecycle state.
    IllegalState = 0x0002,
    /// Operation or encoding not supported.
    Unsupported = 0x0003,
    /// Invalid configuration.
    InvalidConfig = 0x0004,

    // Format errors (0x0100 - 0x01FF)
    /// Byte buffer failed validation.
    CorruptData = 0x0100,

    // I/O errors (0x0200 - 0x02FF)
    /// General I/O error.
    Io = 0x0200,
    /// Storage source failure.
    Storage = 0x0201,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Format",
            0x02 => "I/O",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Bale.
///
/// # Example
///
/// ```rust
/// use bale_common::error::{BaleError, BaleResult};
///
/// fn check_magic(found: u8) -> BaleResult<()> {
///     if found != 0xB5 {
///         return Err(BaleError::corrupt_data(format!("bad magic {found:#04x}")));
///     }
///     Ok(())
/// }
///
/// assert!(check_magic(0).unwrap_err().is_corruption());
/// ```
#[derive(Debug, Error)]
pub enum BaleError {
    // ==========================================================================
    // Format Errors
    // ==========================================================================
    /// Bad magic, truncated or zero length, malformed trailer, or an
    /// unresolved reference marker.
    #[error("corrupt data: {reason}")]
    CorruptData {
        /// Description of the corruption.
        reason: String,
    },

    // ==========================================================================
    // Usage Errors
    // ==========================================================================
    /// Operation not valid in the current lifecycle state.
    #[error("illegal state: {reason}")]
    IllegalState {
        /// Description of the violated state.
        reason: String,
    },

    /// Argument out of range or of the wrong type.
    #[error("illegal argument: {reason}")]
    IllegalArgument {
        /// Description of the bad argument.
        reason: String,
    },

    /// Requested encoding or operation is not supported.
    #[error("unsupported: {reason}")]
    Unsupported {
        /// Description of the unsupported request.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the bad setting.
        reason: String,
    },

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A storage source failed to load or save.
    #[error("storage error: {reason}")]
    Storage {
        /// Description reported by the source.
        reason: String,
    },
}

impl BaleError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::CorruptData { .. } => ErrorCode::CorruptData,
            Self::IllegalState { .. } => ErrorCode::IllegalState,
            Self::IllegalArgument { .. } => ErrorCode::IllegalArgument,
            Self::Unsupported { .. } => ErrorCode::Unsupported,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::Io { .. } => ErrorCode::Io,
            Self::Storage { .. } => ErrorCode::Storage,
        }
    }

    /// Returns true if this error means the bytes themselves are bad.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptData { .. })
    }

    /// Creates a corrupt data error.
    #[must_use]
    pub fn corrupt_data(reason: impl Into<String>) -> Self {
        Self::CorruptData {
            reason: reason.into(),
        }
    }

    /// Creates an illegal state error.
    #[must_use]
    pub fn illegal_state(reason: impl Into<String>) -> Self {
        Self::IllegalState {
            reason: reason.into(),
        }
    }

    /// Creates an illegal argument error.
    #[must_use]
    pub fn illegal_argument(reason: impl Into<String>) -> Self {
        Self::IllegalArgument {
            reason: reason.into(),
        }
    }

    /// Creates an unsupported error.
    #[must_use]
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }
}
