//! In-memory storage source.
//!
//! Useful for tests: every save call is recorded so callers can assert on
//! exactly what was written and how many times.

use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use bale_common::types::InstanceId;

use crate::error::{StorageError, StorageResult};
use crate::source::{save_range, StorageSource};

/// One recorded save call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveCall {
    /// Target instance.
    pub instance: InstanceId,
    /// Bytes written.
    pub bytes: Bytes,
}

/// Storage source backed by a map in memory.
#[derive(Debug)]
pub struct MemorySource {
    blobs: Mutex<BTreeMap<InstanceId, Bytes>>,
    saves: Mutex<Vec<SaveCall>>,
    enumerable: bool,
    default_instance: InstanceId,
}

impl MemorySource {
    /// Creates an empty source with enumerable ids.
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(BTreeMap::new()),
            saves: Mutex::new(Vec::new()),
            enumerable: true,
            default_instance: InstanceId::NONE,
        }
    }

    /// Creates an empty source that hides its ids; callers discover
    /// `default_instance` through [`StorageSource::load_header`].
    pub fn non_enumerable(default_instance: InstanceId) -> Self {
        Self {
            enumerable: false,
            default_instance,
            ..Self::new()
        }
    }

    /// Stores bytes directly, without recording a save call.
    pub fn insert(&self, instance: InstanceId, bytes: impl Into<Bytes>) {
        self.blobs.lock().insert(instance, bytes.into());
    }

    /// Returns the bytes currently stored for an instance.
    pub fn get(&self, instance: InstanceId) -> Option<Bytes> {
        self.blobs.lock().get(&instance).cloned()
    }

    /// Returns every save call so far, oldest first.
    pub fn saves(&self) -> Vec<SaveCall> {
        self.saves.lock().clone()
    }

    /// Returns the number of save calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.lock().len()
    }

    /// Forgets recorded save calls.
    pub fn clear_saves(&self) {
        self.saves.lock().clear();
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageSource for MemorySource {
    fn load(&self, instance: InstanceId) -> StorageResult<Bytes> {
        self.get(instance)
            .ok_or_else(|| StorageError::not_found(instance))
    }

    fn load_header(&self, max_bytes: usize) -> StorageResult<Bytes> {
        let bytes = self.load(self.default_instance)?;
        Ok(bytes.slice(..max_bytes.min(bytes.len())))
    }

    fn save(
        &self,
        bytes: &[u8],
        offset: usize,
        length: usize,
        instance: InstanceId,
    ) -> StorageResult<()> {
        let blob = Bytes::copy_from_slice(save_range(bytes, offset, length)?);
        debug!(%instance, bytes = blob.len(), "memory source save");
        self.blobs.lock().insert(instance, blob.clone());
        self.saves.lock().push(SaveCall {
            instance,
            bytes: blob,
        });
        Ok(())
    }

    fn valid_ids(&self) -> StorageResult<Vec<InstanceId>> {
        if !self.enumerable {
            return Ok(Vec::new());
        }
        Ok(self.blobs.lock().keys().copied().collect())
    }

    fn has_enumerable_ids(&self) -> bool {
        self.enumerable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let source = MemorySource::new();
        source.save(&[9, 1, 2, 3, 9], 1, 3, InstanceId::new(4)).unwrap();

        assert_eq!(source.load(InstanceId::new(4)).unwrap().as_ref(), &[1, 2, 3]);
        assert_eq!(source.valid_ids().unwrap(), vec![InstanceId::new(4)]);
        assert_eq!(source.save_count(), 1);
        assert_eq!(source.saves()[0].instance, InstanceId::new(4));
    }

    #[test]
    fn test_missing_instance() {
        let source = MemorySource::new();
        assert!(source.load(InstanceId::new(1)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_loaded_bytes_are_stable() {
        let source = MemorySource::new();
        source.insert(InstanceId::new(0), vec![1, 2]);
        let before = source.load(InstanceId::new(0)).unwrap();
        source.save(&[3, 4], 0, 2, InstanceId::new(0)).unwrap();
        assert_eq!(before.as_ref(), &[1, 2]);
    }

    #[test]
    fn test_non_enumerable_probe() {
        let source = MemorySource::non_enumerable(InstanceId::new(7));
        source.insert(InstanceId::new(7), vec![1, 2, 3, 4, 5]);
        assert!(!source.has_enumerable_ids());
        assert!(source.valid_ids().unwrap().is_empty());
        assert_eq!(source.load_header(3).unwrap().as_ref(), &[1, 2, 3]);
        assert_eq!(source.load_header(64).unwrap().len(), 5);
        assert_eq!(source.save_count(), 0);
    }
}
