//! Cycle-safe serialization of record trees.
//!
//! A tree is flattened depth-first. Each record is emitted once; a record
//! reached again (a shared sub-tree or a cycle) is emitted as a 5-byte
//! reference marker `[0xFF][index:4]` naming the emission index of its
//! first occurrence. A record owning sub-records carries a serialization
//! trailer `[magic][count:2]` so the reader knows how many entries follow
//! as its children.
//!
//! Deserialization materializes every record as a view over one arena slot
//! holding the input; nothing is copied per record.

use std::collections::HashMap;

use bytes::BufMut;
use tracing::trace;

use bale_common::constants::{
    REFERENCE_MARKER_SIZE, SERIAL_MAGIC, SERIAL_TRAILER_SIZE, TAG_REFERENCE,
};
use bale_common::error::{BaleError, BaleResult};

use crate::arena::{BufferHandle, BufferId};
use crate::header::RecordHeader;
use crate::store::{checked_length, RecordId, RecordStore, SubLink};
use crate::types::RecordFlags;

/// One entry of a flattened record tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatEntry {
    /// First occurrence of a record.
    Record(RecordId),
    /// Repeat of the record emitted at this index.
    Reference(u32),
}

struct Frame {
    parent: RecordId,
    remaining: u16,
}

impl RecordStore {
    /// Flattens the tree under `root` in depth-first pre-order.
    pub fn flatten(&self, root: RecordId) -> BaleResult<Vec<FlatEntry>> {
        let mut visited: HashMap<RecordId, u32> = HashMap::new();
        let mut entries = Vec::new();
        let mut stack = vec![root];

        while let Some(id) = stack.pop() {
            if let Some(index) = visited.get(&id) {
                entries.push(FlatEntry::Reference(*index));
                continue;
            }
            let index = u32::try_from(visited.len())
                .map_err(|_| BaleError::illegal_state("record tree too large to flatten"))?;
            visited.insert(id, index);
            entries.push(FlatEntry::Record(id));
            stack.extend(self.subs(id)?.iter().rev().map(|link| link.id));
        }

        Ok(entries)
    }

    fn entry_len(&self, entry: FlatEntry) -> BaleResult<usize> {
        match entry {
            FlatEntry::Reference(_) => Ok(REFERENCE_MARKER_SIZE),
            FlatEntry::Record(id) => {
                let header = self.header(id)?;
                let extra = if self.needs_serial_trailer(id, header)? {
                    SERIAL_TRAILER_SIZE
                } else {
                    0
                };
                Ok(header.total_len() + extra)
            }
        }
    }

    fn needs_serial_trailer(&self, id: RecordId, header: RecordHeader) -> BaleResult<bool> {
        Ok(!header.flags.contains(RecordFlags::SERIALIZED) && !self.subs(id)?.is_empty())
    }

    /// Returns the number of bytes [`Self::serialize`] would produce.
    pub fn serialized_len(&self, root: RecordId) -> BaleResult<usize> {
        self.flatten(root)?
            .into_iter()
            .map(|entry| self.entry_len(entry))
            .sum()
    }

    /// Serializes the tree under `root` into a fresh buffer.
    pub fn serialize(&self, root: RecordId) -> BaleResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.serialized_len(root)?);
        self.serialize_into(root, &mut out)?;
        Ok(out)
    }

    /// Serializes the tree under `root` into `buf`, returning the number of
    /// bytes written.
    ///
    /// A record that already carries a serialization trailer is copied as
    /// is with its sub-record count refreshed, so re-serializing a parsed
    /// tree is byte-identical.
    pub fn serialize_into(&self, root: RecordId, buf: &mut impl BufMut) -> BaleResult<usize> {
        let mut written = 0;
        for entry in self.flatten(root)? {
            match entry {
                FlatEntry::Reference(index) => {
                    buf.put_u8(TAG_REFERENCE);
                    buf.put_u32(index);
                    written += REFERENCE_MARKER_SIZE;
                }
                FlatEntry::Record(id) => {
                    written += self.write_record(id, buf)?;
                }
            }
        }
        Ok(written)
    }

    fn write_record(&self, id: RecordId, buf: &mut impl BufMut) -> BaleResult<usize> {
        let header = self.header(id)?;
        let bytes = self.bytes(id)?;
        let count = u16::try_from(self.subs(id)?.len())
            .map_err(|_| BaleError::illegal_state(format!("record {id} has too many subs")))?;

        if header.flags.contains(RecordFlags::SERIALIZED) {
            let body = bytes.len() - SERIAL_TRAILER_SIZE;
            buf.put_slice(&bytes[..body]);
            buf.put_u8(SERIAL_MAGIC);
            buf.put_u16(count);
            return Ok(bytes.len());
        }

        if count == 0 {
            buf.put_slice(bytes);
            return Ok(bytes.len());
        }

        let total = bytes.len() + SERIAL_TRAILER_SIZE;
        let mut trailed = header;
        trailed.flags |= RecordFlags::SERIALIZED;
        trailed.length = checked_length(total)?;
        trailed.serialize(buf);
        buf.put_slice(&bytes[RecordHeader::SIZE..]);
        buf.put_u8(SERIAL_MAGIC);
        buf.put_u16(count);
        Ok(total)
    }

    /// Parses a serialized tree from a copy of `bytes`, returning its root.
    pub fn deserialize(&mut self, bytes: &[u8]) -> BaleResult<RecordId> {
        self.parse(bytes.to_vec())
    }

    /// Parses a serialized tree, taking ownership of the input buffer.
    ///
    /// Every record of the tree becomes a view into the buffer. On error
    /// nothing is added to the store.
    pub fn parse(&mut self, bytes: Vec<u8>) -> BaleResult<RecordId> {
        let mark = self.nodes.len();
        let buffer = self.arena.insert(bytes);
        match self.parse_tree(buffer) {
            Ok(root) => {
                trace!(root = %root, records = self.nodes.len() - mark, "parsed record tree");
                Ok(root)
            }
            Err(err) => {
                self.nodes.truncate(mark);
                self.arena.remove(buffer);
                Err(err)
            }
        }
    }

    fn parse_tree(&mut self, buffer: BufferId) -> BaleResult<RecordId> {
        let len = self.arena.bytes(buffer)?.len();
        let mut table: Vec<RecordId> = Vec::new();
        let mut stack: Vec<Frame> = Vec::new();
        let mut root = None;
        let mut cursor = 0usize;

        loop {
            let (link, children) = self.parse_entry(buffer, &mut cursor, len, &table)?;
            if !link.aliased {
                table.push(link.id);
            }

            match stack.last_mut() {
                Some(frame) => {
                    frame.remaining -= 1;
                    let parent = frame.parent;
                    self.node_mut(parent)?.subs.push(link);
                }
                None => root = Some(link.id),
            }

            if children > 0 {
                stack.push(Frame {
                    parent: link.id,
                    remaining: children,
                });
            }
            while stack.last().is_some_and(|frame| frame.remaining == 0) {
                stack.pop();
            }
            if stack.is_empty() {
                break;
            }
        }

        if cursor != len {
            return Err(BaleError::corrupt_data(format!(
                "{} trailing bytes after record tree",
                len - cursor
            )));
        }
        root.ok_or_else(|| BaleError::corrupt_data("empty record tree"))
    }

    /// Parses one entry at `cursor`, returning the link to attach and the
    /// number of child entries that follow it.
    fn parse_entry(
        &mut self,
        buffer: BufferId,
        cursor: &mut usize,
        len: usize,
        table: &[RecordId],
    ) -> BaleResult<(SubLink, u16)> {
        let at = *cursor;
        let bytes = self.arena.bytes(buffer)?;
        let rest = &bytes[at..];
        if rest.is_empty() {
            return Err(BaleError::corrupt_data(format!(
                "record tree truncated at byte {at}"
            )));
        }

        if rest[0] == TAG_REFERENCE {
            if rest.len() < REFERENCE_MARKER_SIZE {
                return Err(BaleError::corrupt_data(format!(
                    "reference marker truncated at byte {at}"
                )));
            }
            let index = u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]);
            let target = table.get(index as usize).copied().ok_or_else(|| {
                BaleError::corrupt_data(format!(
                    "reference to record {index} before it was materialized"
                ))
            })?;
            *cursor += REFERENCE_MARKER_SIZE;
            return Ok((SubLink::aliased(target), 0));
        }

        let header = RecordHeader::from_bytes(rest)?;
        header.validate(len - at)?;
        let flags = header.flags;
        let end = at + header.total_len();

        let children = if flags.contains(RecordFlags::SERIALIZED) {
            let magic = bytes[end - SERIAL_TRAILER_SIZE];
            if magic != SERIAL_MAGIC {
                return Err(BaleError::corrupt_data(format!(
                    "bad serialization magic {magic:#04x} at byte {}",
                    end - SERIAL_TRAILER_SIZE
                )));
            }
            u16::from_be_bytes([bytes[end - 2], bytes[end - 1]])
        } else if flags.contains(RecordFlags::HAS_SUBS) {
            return Err(BaleError::corrupt_data(format!(
                "record at byte {at} has sub-records but no serialization trailer"
            )));
        } else {
            0
        };

        let id = self.alloc_node(BufferHandle::new(buffer, at))?;
        *cursor = end;
        Ok((SubLink::owned(id), children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordType;

    fn tag(value: u8) -> RecordType {
        RecordType::new(value).unwrap()
    }

    #[test]
    fn test_leaf_serializes_verbatim() {
        let mut store = RecordStore::new();
        let id = store.create(tag(5), 2).unwrap();
        store.view_mut(id).unwrap().write_uint(0, 2, 0x0102).unwrap();
        assert_eq!(store.serialize(id).unwrap(), vec![5, 0, 0, 6, 1, 2]);
    }

    #[test]
    fn test_parent_gets_trailer() {
        let mut store = RecordStore::new();
        let root = store.create(tag(5), 0).unwrap();
        let child = store.create(tag(6), 0).unwrap();
        store.add_sub(root, child).unwrap();

        let bytes = store.serialize(root).unwrap();
        assert_eq!(
            bytes,
            vec![5, 0x90, 0, 7, SERIAL_MAGIC, 0, 1, 6, 0, 0, 4]
        );
        assert_eq!(store.serialized_len(root).unwrap(), bytes.len());
    }

    #[test]
    fn test_flatten_shared_and_cycle() {
        let mut store = RecordStore::new();
        let root = store.create(tag(1), 0).unwrap();
        let a = store.create(tag(2), 0).unwrap();
        let shared = store.create(tag(3), 0).unwrap();
        store.add_sub(root, a).unwrap();
        store.add_sub(root, shared).unwrap();
        store.add_alias(a, shared).unwrap();
        store.add_alias(shared, root).unwrap();

        let entries = store.flatten(root).unwrap();
        assert_eq!(
            entries,
            vec![
                FlatEntry::Record(root),
                FlatEntry::Record(a),
                FlatEntry::Record(shared),
                FlatEntry::Reference(0),
                FlatEntry::Reference(2),
            ]
        );
    }

    #[test]
    fn test_roundtrip_preserves_sharing() {
        let mut store = RecordStore::new();
        let root = store.create(tag(1), 1).unwrap();
        let left = store.create(tag(2), 0).unwrap();
        let right = store.create(tag(2), 0).unwrap();
        let shared = store.create(tag(3), 4).unwrap();
        store.add_sub(root, left).unwrap();
        store.add_sub(root, right).unwrap();
        store.add_sub(left, shared).unwrap();
        store.add_alias(right, shared).unwrap();

        let bytes = store.serialize(root).unwrap();
        let copy = store.deserialize(&bytes).unwrap();

        let copy_left = store.subs(copy).unwrap()[0].id;
        let copy_right = store.subs(copy).unwrap()[1].id;
        let from_left = store.subs(copy_left).unwrap()[0];
        let from_right = store.subs(copy_right).unwrap()[0];
        assert_eq!(from_left.id, from_right.id);
        assert!(!from_left.aliased);
        assert!(from_right.aliased);
    }

    #[test]
    fn test_parsed_records_share_one_buffer() {
        let mut store = RecordStore::new();
        let root = store.create(tag(1), 0).unwrap();
        let child = store.create(tag(2), 0).unwrap();
        store.add_sub(root, child).unwrap();
        let bytes = store.serialize(root).unwrap();

        let copy = store.deserialize(&bytes).unwrap();
        let copy_child = store.subs(copy).unwrap()[0].id;
        let a = store.handle(copy).unwrap();
        let b = store.handle(copy_child).unwrap();
        assert_eq!(a.buffer, b.buffer);
        assert_eq!(b.offset, 7);
        assert!(store.is_shared_view(copy).unwrap());
    }

    #[test]
    fn test_reserialize_is_identical() {
        let mut store = RecordStore::new();
        let root = store.create(tag(1), 3).unwrap();
        let values = store.create_literal_array(&[4, 5]).unwrap();
        store.add_sub(root, values).unwrap();
        store.add_alias(values, root).unwrap();

        let first = store.serialize(root).unwrap();
        let copy = store.deserialize(&first).unwrap();
        let second = store.serialize(copy).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_forward_reference_is_corrupt() {
        let mut store = RecordStore::new();
        let bytes = [5, 0x90, 0, 7, SERIAL_MAGIC, 0, 1, 0xFF, 0, 0, 0, 1];
        assert!(store.deserialize(&bytes).unwrap_err().is_corruption());
        assert!(store.is_empty());
        assert!(store.arena().is_empty());
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let mut store = RecordStore::new();
        let bytes = [5, 0x90, 0, 7, 0x00, 0, 1, 6, 0, 0, 4];
        assert!(store.deserialize(&bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn test_subs_without_trailer_is_corrupt() {
        let mut store = RecordStore::new();
        let bytes = [5, 0x10, 0, 4];
        assert!(store.deserialize(&bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn test_truncation_and_trailing_bytes() {
        let mut store = RecordStore::new();
        assert!(store.deserialize(&[]).unwrap_err().is_corruption());
        assert!(store.deserialize(&[5, 0, 0, 8, 1]).unwrap_err().is_corruption());
        assert!(store
            .deserialize(&[5, 0x90, 0, 7, SERIAL_MAGIC, 0, 2, 6, 0, 0, 4])
            .unwrap_err()
            .is_corruption());
        assert!(store.deserialize(&[5, 0, 0, 4, 9]).unwrap_err().is_corruption());
    }
}
