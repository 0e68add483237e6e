//! Cascade merge of overlay records.
//!
//! An overlay of the same type as a root either replaces it outright
//! (complete overlay) or sets only some of its fields (incomplete overlay,
//! flagged [`RecordFlags::INCOMPLETE`]). Field encoding differs per type, so
//! incomplete overlays are resolved by a [`TypeMergeHandler`] looked up by
//! type tag in a [`MergeRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bale_common::error::{BaleError, BaleResult};

use crate::store::{RecordId, RecordStore};
use crate::types::{RecordFlags, RecordType};

/// Per-type merge of an incomplete overlay onto a root.
pub trait TypeMergeHandler: Send + Sync {
    /// Produces the merged record, or `None` to leave `root` as the result.
    fn merge(
        &self,
        store: &mut RecordStore,
        root: RecordId,
        overlay: RecordId,
    ) -> BaleResult<Option<RecordId>>;
}

/// Merges literal integer arrays: overlay elements replace root elements by
/// index; a longer overlay extends the result.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralArrayMerge;

impl TypeMergeHandler for LiteralArrayMerge {
    fn merge(
        &self,
        store: &mut RecordStore,
        root: RecordId,
        overlay: RecordId,
    ) -> BaleResult<Option<RecordId>> {
        let mut values = store.read_array(root, 0)?;
        let patch = store.read_array(overlay, 0)?;
        for (i, value) in patch.into_iter().enumerate() {
            match values.get_mut(i) {
                Some(slot) => *slot = value,
                None => values.push(value),
            }
        }
        store.create_literal_array(&values).map(Some)
    }
}

/// Merges fixed-layout records byte by byte: every non-zero overlay payload
/// byte replaces the root byte at the same offset.
///
/// Suited to types whose unset fields are encoded as zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonZeroBytesMerge;

impl TypeMergeHandler for NonZeroBytesMerge {
    fn merge(
        &self,
        store: &mut RecordStore,
        root: RecordId,
        overlay: RecordId,
    ) -> BaleResult<Option<RecordId>> {
        let patch = store.view(overlay)?.payload().to_vec();
        let root_len = store.view(root)?.payload().len();
        if patch.len() != root_len {
            return Err(BaleError::illegal_argument(format!(
                "overlay payload of {} bytes does not match root payload of {root_len}",
                patch.len()
            )));
        }
        let merged = store.clone_with_aliased_subs(root)?;
        store.set_flags_raw(merged, RecordFlags::IMMUTABLE, false)?;
        let mut payload = store.view(merged)?.payload().to_vec();
        for (byte, over) in payload.iter_mut().zip(patch) {
            if over != 0 {
                *byte = over;
            }
        }
        store.view_mut(merged)?.write_bytes(0, &payload)?;
        Ok(Some(merged))
    }
}

/// Registry of merge handlers keyed by record type.
#[derive(Clone, Default)]
pub struct MergeRegistry {
    handlers: HashMap<RecordType, Arc<dyn TypeMergeHandler>>,
}

impl MergeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in literal array handler.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(RecordType::LITERAL_ARRAY, Arc::new(LiteralArrayMerge));
        registry
    }

    /// Registers (or replaces) the handler for a type.
    pub fn register(&mut self, record_type: RecordType, handler: Arc<dyn TypeMergeHandler>) {
        self.handlers.insert(record_type, handler);
    }

    /// Returns the handler for a type.
    pub fn get(&self, record_type: RecordType) -> Option<Arc<dyn TypeMergeHandler>> {
        self.handlers.get(&record_type).cloned()
    }

    /// Returns true if a handler is registered for the type.
    pub fn contains(&self, record_type: RecordType) -> bool {
        self.handlers.contains_key(&record_type)
    }
}

impl fmt::Debug for MergeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("MergeRegistry").field("types", &types).finish()
    }
}

impl RecordStore {
    /// Applies `overlay` on top of `root`.
    ///
    /// - no overlay: `root` itself
    /// - different types: IllegalArgument
    /// - complete overlay: a byte-equal copy of the overlay tree
    /// - incomplete overlay: the registered handler's result, or `root` when
    ///   no handler is registered or the handler declines
    pub fn cascade(
        &mut self,
        root: RecordId,
        overlay: Option<RecordId>,
        registry: &MergeRegistry,
    ) -> BaleResult<RecordId> {
        let Some(overlay) = overlay else {
            return Ok(root);
        };

        let root_type = self.header(root)?.record_type;
        let overlay_header = self.header(overlay)?;
        if root_type != overlay_header.record_type {
            return Err(BaleError::illegal_argument(format!(
                "cannot merge a {:?} overlay onto a {root_type:?}",
                overlay_header.record_type
            )));
        }

        if !overlay_header.flags.contains(RecordFlags::INCOMPLETE) {
            return self.clone_with_copied_subs(overlay);
        }

        match registry.get(root_type) {
            Some(handler) => Ok(handler.merge(self, root, overlay)?.unwrap_or(root)),
            None => Ok(root),
        }
    }
}
