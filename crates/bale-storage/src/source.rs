//! The storage source contract.

use std::fmt;

use bytes::Bytes;

use bale_common::types::InstanceId;

use crate::error::{StorageError, StorageResult};

/// Pluggable byte-blob storage keyed by instance id.
///
/// A source holds one envelope per instance. Bytes returned by
/// [`load`](Self::load) stay valid until the next save to the same
/// instance; [`Bytes`] clones are cheap and never observe a later save.
///
/// Sources that cannot list their instances report
/// `has_enumerable_ids() == false`; callers then discover the default
/// instance by probing its envelope header with
/// [`load_header`](Self::load_header).
pub trait StorageSource: Send + Sync + fmt::Debug {
    /// Loads every byte stored for `instance`.
    fn load(&self, instance: InstanceId) -> StorageResult<Bytes>;

    /// Loads at most `max_bytes` from the start of the default instance.
    fn load_header(&self, max_bytes: usize) -> StorageResult<Bytes>;

    /// Replaces the bytes stored for `instance` with
    /// `bytes[offset..offset + length]`.
    fn save(
        &self,
        bytes: &[u8],
        offset: usize,
        length: usize,
        instance: InstanceId,
    ) -> StorageResult<()>;

    /// Lists the instances holding bytes.
    fn valid_ids(&self) -> StorageResult<Vec<InstanceId>>;

    /// True if [`valid_ids`](Self::valid_ids) lists every instance.
    fn has_enumerable_ids(&self) -> bool;
}

/// Resolves the `offset..offset + length` range of a save call.
pub fn save_range(bytes: &[u8], offset: usize, length: usize) -> StorageResult<&[u8]> {
    offset
        .checked_add(length)
        .and_then(|end| bytes.get(offset..end))
        .ok_or_else(|| StorageError::invalid_range(offset, length, bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_range() {
        let bytes = [1, 2, 3, 4, 5];
        assert_eq!(save_range(&bytes, 1, 3).unwrap(), &[2, 3, 4]);
        assert_eq!(save_range(&bytes, 5, 0).unwrap(), &[] as &[u8]);
        assert!(save_range(&bytes, 3, 3).is_err());
        assert!(save_range(&bytes, usize::MAX, 2).is_err());
    }
}
