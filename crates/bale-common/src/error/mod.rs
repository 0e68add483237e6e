//! Error handling for Bale.
//!
//! This module provides the error taxonomy and result alias used across
//! all Bale components.

mod bale;

pub use bale::{BaleError, ErrorCode};

/// Result type alias for Bale operations.
pub type BaleResult<T> = std::result::Result<T, BaleError>;
