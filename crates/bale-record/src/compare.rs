//! Structural equality of record trees.
//!
//! Both comparisons walk the two trees in lockstep and pair records up as
//! they go. A pair seen before is not compared again, which makes cycles
//! terminate; a record paired with two different partners means the shapes
//! of the two graphs differ.

use std::collections::HashMap;

use bale_common::error::BaleResult;

use crate::store::{RecordId, RecordStore};
use crate::types::RecordFlags;
use crate::view::BinaryRecord;

type RecordEq = fn(&BinaryRecord<'_>, &BinaryRecord<'_>) -> bool;

fn raw_eq(a: &BinaryRecord<'_>, b: &BinaryRecord<'_>) -> bool {
    a.record_type() == b.record_type() && a.len() == b.len() && a.bytes()[4..] == b.bytes()[4..]
}

fn content_eq(a: &BinaryRecord<'_>, b: &BinaryRecord<'_>) -> bool {
    a.record_type() == b.record_type()
        && a.flags().difference(RecordFlags::TRAILERS) == b.flags().difference(RecordFlags::TRAILERS)
        && a.payload() == b.payload()
}

impl RecordStore {
    /// Compares type, length and every byte after the header, including
    /// trailers, across both sub-trees.
    pub fn equals(&self, a: RecordId, other: &RecordStore, b: RecordId) -> BaleResult<bool> {
        self.compare_trees(a, other, b, raw_eq)
    }

    /// Compares type, non-trailer flags and payload across both sub-trees.
    ///
    /// A serialized record and an unserialized copy of the same value are
    /// equal under this comparison.
    pub fn equals_content(&self, a: RecordId, other: &RecordStore, b: RecordId) -> BaleResult<bool> {
        self.compare_trees(a, other, b, content_eq)
    }

    fn compare_trees(
        &self,
        a: RecordId,
        other: &RecordStore,
        b: RecordId,
        record_eq: RecordEq,
    ) -> BaleResult<bool> {
        let mut forward: HashMap<RecordId, RecordId> = HashMap::new();
        let mut backward: HashMap<RecordId, RecordId> = HashMap::new();
        let mut pending = vec![(a, b)];

        while let Some((x, y)) = pending.pop() {
            match (forward.get(&x), backward.get(&y)) {
                (Some(seen), _) if *seen == y => continue,
                (None, None) => {}
                _ => return Ok(false),
            }
            forward.insert(x, y);
            backward.insert(y, x);

            let left = self.view(x)?;
            let right = other.view(y)?;
            if !record_eq(&left, &right) || left.subs().len() != right.subs().len() {
                return Ok(false);
            }
            pending.extend(
                left.subs()
                    .iter()
                    .zip(right.subs())
                    .map(|(l, r)| (l.id, r.id)),
            );
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordType;

    fn tag(value: u8) -> RecordType {
        RecordType::new(value).unwrap()
    }

    fn tree(store: &mut RecordStore, leaf_value: u32) -> RecordId {
        let root = store.create(tag(1), 2).unwrap();
        let leaf = store.create(tag(2), 1).unwrap();
        store.view_mut(leaf).unwrap().write_uint(0, 1, leaf_value).unwrap();
        store.add_sub(root, leaf).unwrap();
        root
    }

    #[test]
    fn test_equal_trees_across_stores() {
        let mut left = RecordStore::new();
        let mut right = RecordStore::new();
        let a = tree(&mut left, 7);
        let b = tree(&mut right, 7);
        assert!(left.equals(a, &right, b).unwrap());
        assert!(left.equals_content(a, &right, b).unwrap());

        let c = tree(&mut right, 8);
        assert!(!left.equals(a, &right, c).unwrap());
        assert!(!left.equals_content(a, &right, c).unwrap());
    }

    #[test]
    fn test_serialized_copy_is_content_equal() {
        let mut store = RecordStore::new();
        let root = tree(&mut store, 3);
        let bytes = store.serialize(root).unwrap();
        let copy = store.deserialize(&bytes).unwrap();

        assert!(!store.equals(root, &store, copy).unwrap());
        assert!(store.equals_content(root, &store, copy).unwrap());
    }

    #[test]
    fn test_version_trailer_ignored_by_content() {
        let mut store = RecordStore::new();
        let a = store.create(tag(4), 2).unwrap();
        let b = store.create(tag(4), 2).unwrap();
        store.set_versioning(b, true).unwrap();
        assert!(!store.equals(a, &store, b).unwrap());
        assert!(store.equals_content(a, &store, b).unwrap());
    }

    #[test]
    fn test_cycles_terminate() {
        let mut store = RecordStore::new();
        let a = store.create(tag(1), 0).unwrap();
        let a_child = store.create(tag(2), 0).unwrap();
        store.add_sub(a, a_child).unwrap();
        store.add_alias(a_child, a).unwrap();

        let b = store.create(tag(1), 0).unwrap();
        let b_child = store.create(tag(2), 0).unwrap();
        store.add_sub(b, b_child).unwrap();
        store.add_alias(b_child, b).unwrap();

        assert!(store.equals(a, &store, b).unwrap());
    }

    #[test]
    fn test_sharing_shape_matters() {
        let mut store = RecordStore::new();
        let shared = store.create(tag(3), 0).unwrap();
        let a = store.create(tag(1), 0).unwrap();
        store.add_sub(a, shared).unwrap();
        store.add_alias(a, shared).unwrap();

        let b = store.create(tag(1), 0).unwrap();
        let b1 = store.create(tag(3), 0).unwrap();
        let b2 = store.create(tag(3), 0).unwrap();
        store.add_sub(b, b1).unwrap();
        store.add_sub(b, b2).unwrap();

        assert!(!store.equals_content(a, &store, b).unwrap());
    }
}
