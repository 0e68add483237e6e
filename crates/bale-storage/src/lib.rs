//! # bale-storage
//!
//! Storage sources for Bale envelopes.
//!
//! A [`StorageSource`] stores one byte blob (an envelope) per instance id.
//! The controller loads and saves whole envelopes through it and never
//! looks inside the source's own layout.
//!
//! - [`MemorySource`]: a map in memory that records every save call
//! - [`FileSource`]: one checksummed file per instance in a directory
//!
//! ## Example
//!
//! ```rust
//! use bale_common::types::InstanceId;
//! use bale_storage::{MemorySource, StorageSource};
//!
//! let source = MemorySource::new();
//! source.save(b"envelope", 0, 8, InstanceId::new(1)).unwrap();
//! assert_eq!(source.load(InstanceId::new(1)).unwrap().as_ref(), b"envelope");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod file;
mod memory;
mod source;

pub use error::{StorageError, StorageResult};
pub use file::{FileSource, FILE_EXTENSION};
pub use memory::{MemorySource, SaveCall};
pub use source::{save_range, StorageSource};
