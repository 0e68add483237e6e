//! Record store: the arena-backed home of binary records.
//!
//! A [`RecordStore`] owns a [`BufferArena`] and a table of record nodes.
//! Each node is a `(buffer, offset)` handle plus its sub-record links; the
//! type, flags, and length live in-band in the buffer. Records created here
//! own their buffer outright, while records produced by deserialization are
//! views sharing the buffer that holds the parsed input.

use std::fmt;

use bale_common::constants::{
    INTRA_REFERENCE_TRAILER_SIZE, MAX_RECORD_LENGTH, VERSION_TRAILER_SIZE,
};
use bale_common::error::{BaleError, BaleResult};
use tracing::trace;

use crate::arena::{BackingIdentity, BufferArena, BufferHandle};
use crate::array;
use crate::header::RecordHeader;
use crate::types::{RecordFlags, RecordType};
use crate::view::{BinaryRecord, BinaryRecordMut};

/// Identifier of a record within one [`RecordStore`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RecordId(u32);

impl RecordId {
    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A link from a record to one of its sub-records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubLink {
    /// Target record.
    pub id: RecordId,
    /// True if the target is shared with other parents (or is an ancestor)
    /// rather than owned by this link.
    pub aliased: bool,
}

impl SubLink {
    /// An owning link.
    #[inline]
    #[must_use]
    pub const fn owned(id: RecordId) -> Self {
        Self { id, aliased: false }
    }

    /// An aliasing link.
    #[inline]
    #[must_use]
    pub const fn aliased(id: RecordId) -> Self {
        Self { id, aliased: true }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordNode {
    pub(crate) at: BufferHandle,
    pub(crate) subs: Vec<SubLink>,
}

/// Arena-backed collection of binary records.
#[derive(Debug, Default)]
pub struct RecordStore {
    pub(crate) arena: BufferArena,
    pub(crate) nodes: Vec<RecordNode>,
}

impl RecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records ever created in this store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the backing arena.
    #[must_use]
    pub fn arena(&self) -> &BufferArena {
        &self.arena
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Creates a record of `record_type` with a zeroed payload of
    /// `payload_len` bytes.
    pub fn create(&mut self, record_type: RecordType, payload_len: usize) -> BaleResult<RecordId> {
        let total = RecordHeader::SIZE + payload_len;
        let length = checked_length(total)?;
        let mut bytes = vec![0u8; total];
        bytes[..RecordHeader::SIZE].copy_from_slice(
            &RecordHeader::new(record_type, RecordFlags::empty(), length).to_bytes(),
        );
        self.adopt(bytes)
    }

    /// Creates a record whose payload is a copy of `payload`.
    pub fn create_with_payload(
        &mut self,
        record_type: RecordType,
        payload: &[u8],
    ) -> BaleResult<RecordId> {
        let id = self.create(record_type, payload.len())?;
        let at = self.handle(id)?;
        self.arena
            .region_mut(at, RecordHeader::SIZE + payload.len())?[RecordHeader::SIZE..]
            .copy_from_slice(payload);
        Ok(id)
    }

    /// Creates a literal integer array record using the narrowest element
    /// width that holds every value.
    pub fn create_literal_array(&mut self, values: &[i32]) -> BaleResult<RecordId> {
        let width = array::min_width(values);
        let mut payload = vec![0u8; array::encoded_len(values.len(), width)];
        array::write(&mut payload, 0, values, width)?;
        let id = self.create_with_payload(RecordType::LITERAL_ARRAY, &payload)?;
        self.set_flags_raw(id, RecordFlags::VARIABLE_SIZE, true)?;
        Ok(id)
    }

    /// Places already-encoded record bytes in a private buffer.
    pub(crate) fn adopt(&mut self, bytes: Vec<u8>) -> BaleResult<RecordId> {
        let buffer = self.arena.insert(bytes);
        self.alloc_node(BufferHandle::new(buffer, 0))
    }

    pub(crate) fn alloc_node(&mut self, at: BufferHandle) -> BaleResult<RecordId> {
        let id = u32::try_from(self.nodes.len())
            .map(RecordId)
            .map_err(|_| BaleError::illegal_state("record store is full"))?;
        self.arena.retain(at.buffer)?;
        self.nodes.push(RecordNode {
            at,
            subs: Vec::new(),
        });
        Ok(id)
    }

    // =========================================================================
    // Access
    // =========================================================================

    pub(crate) fn node(&self, id: RecordId) -> BaleResult<&RecordNode> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| BaleError::illegal_argument(format!("unknown record {id}")))
    }

    pub(crate) fn node_mut(&mut self, id: RecordId) -> BaleResult<&mut RecordNode> {
        self.nodes
            .get_mut(id.index())
            .ok_or_else(|| BaleError::illegal_argument(format!("unknown record {id}")))
    }

    /// Returns the position of a record.
    pub fn handle(&self, id: RecordId) -> BaleResult<BufferHandle> {
        Ok(self.node(id)?.at)
    }

    /// Returns the identity of the allocation a record lives in.
    pub fn backing(&self, id: RecordId) -> BaleResult<BackingIdentity> {
        self.arena.identity(self.handle(id)?.buffer)
    }

    /// Returns true if the record shares its buffer with other records.
    pub fn is_shared_view(&self, id: RecordId) -> BaleResult<bool> {
        Ok(self.arena.occupants(self.handle(id)?.buffer)? > 1)
    }

    /// Decodes the header of a record.
    pub fn header(&self, id: RecordId) -> BaleResult<RecordHeader> {
        let at = self.handle(id)?;
        RecordHeader::from_bytes(self.arena.region(at, RecordHeader::SIZE)?)
    }

    /// Returns every byte of a record, header and trailers included.
    pub fn bytes(&self, id: RecordId) -> BaleResult<&[u8]> {
        let header = self.header(id)?;
        self.arena.region(self.handle(id)?, header.total_len())
    }

    pub(crate) fn bytes_mut(&mut self, id: RecordId) -> BaleResult<&mut [u8]> {
        let header = self.header(id)?;
        let at = self.handle(id)?;
        self.arena.region_mut(at, header.total_len())
    }

    /// Returns the sub-record links of a record.
    pub fn subs(&self, id: RecordId) -> BaleResult<&[SubLink]> {
        Ok(&self.node(id)?.subs)
    }

    /// Returns a read view of a record.
    pub fn view(&self, id: RecordId) -> BaleResult<BinaryRecord<'_>> {
        let header = self.header(id)?;
        let node = self.node(id)?;
        let bytes = self.arena.region(node.at, header.total_len())?;
        Ok(BinaryRecord::new(id, header, bytes, &node.subs))
    }

    /// Returns a write view of a record.
    pub fn view_mut(&mut self, id: RecordId) -> BaleResult<BinaryRecordMut<'_>> {
        self.node(id)?;
        Ok(BinaryRecordMut::new(self, id))
    }

    // =========================================================================
    // Mutation plumbing
    // =========================================================================

    /// Fails if the record rejects mutation.
    pub(crate) fn check_mutable(&self, id: RecordId) -> BaleResult<RecordHeader> {
        let header = self.header(id)?;
        if header.flags.contains(RecordFlags::IMMUTABLE) {
            return Err(BaleError::illegal_state(format!("record {id} is immutable")));
        }
        Ok(header)
    }

    /// Runs `f` over the payload of a mutable record, then counts the write.
    pub(crate) fn with_payload_mut<R>(
        &mut self,
        id: RecordId,
        f: impl FnOnce(&mut [u8]) -> BaleResult<R>,
    ) -> BaleResult<R> {
        let header = self.check_mutable(id)?;
        let range = header.payload_range();
        let result = f(&mut self.bytes_mut(id)?[range])?;
        self.bump_version(id)?;
        Ok(result)
    }

    /// Increments the version counter if versioning is enabled.
    pub(crate) fn bump_version(&mut self, id: RecordId) -> BaleResult<()> {
        let header = self.header(id)?;
        if !header.flags.contains(RecordFlags::VERSIONING) {
            return Ok(());
        }
        let at = header.payload_range().end;
        let bytes = self.bytes_mut(id)?;
        let current = u16::from_be_bytes([bytes[at], bytes[at + 1]]);
        bytes[at..at + VERSION_TRAILER_SIZE].copy_from_slice(&current.wrapping_add(1).to_be_bytes());
        Ok(())
    }

    pub(crate) fn set_flags_raw(
        &mut self,
        id: RecordId,
        flags: RecordFlags,
        on: bool,
    ) -> BaleResult<()> {
        let mut header = self.header(id)?;
        header.flags.set(flags, on);
        self.bytes_mut(id)?[1] = header.flags.bits();
        Ok(())
    }

    fn set_length(&mut self, id: RecordId, length: u16) -> BaleResult<()> {
        let at = self.handle(id)?;
        self.arena.region_mut(at, RecordHeader::SIZE)?[2..4].copy_from_slice(&length.to_be_bytes());
        Ok(())
    }

    /// Replaces `remove` bytes at record-relative offset `at` with `insert`
    /// zero bytes and rewrites the length field.
    ///
    /// A record that is the sole occupant of its buffer grows in place; a
    /// record sharing its buffer is first copied into a private one, leaving
    /// its former array-mates untouched.
    pub(crate) fn resize(
        &mut self,
        id: RecordId,
        at: usize,
        remove: usize,
        insert: usize,
    ) -> BaleResult<()> {
        let header = self.header(id)?;
        let old_len = header.total_len();
        if at < RecordHeader::SIZE || at + remove > old_len {
            return Err(BaleError::illegal_argument(format!(
                "resize {at}+{remove} outside record {id} of {old_len} bytes"
            )));
        }
        let new_len = checked_length(old_len - remove + insert)?;
        let handle = self.handle(id)?;

        let private = self.arena.occupants(handle.buffer)? == 1
            && handle.offset == 0
            && self.arena.bytes(handle.buffer)?.len() == old_len;

        if private {
            self.arena.splice(handle.buffer, at, remove, insert)?;
        } else {
            let mut bytes = self.bytes(id)?.to_vec();
            bytes.splice(at..at + remove, std::iter::repeat(0u8).take(insert));
            let buffer = self.arena.insert(bytes);
            self.arena.retain(buffer)?;
            self.arena.release(handle.buffer)?;
            self.node_mut(id)?.at = BufferHandle::new(buffer, 0);
            trace!(record = %id, from = %handle.buffer, to = %buffer, "relocated record into private buffer");
        }

        self.set_length(id, new_len)
    }

    // =========================================================================
    // Sub-records
    // =========================================================================

    fn push_sub(&mut self, parent: RecordId, link: SubLink) -> BaleResult<usize> {
        self.check_mutable(parent)?;
        self.node(link.id)?;
        let subs = &self.node(parent)?.subs;
        if subs.len() >= u16::MAX as usize {
            return Err(BaleError::illegal_argument(format!(
                "record {parent} already has {} sub-records",
                subs.len()
            )));
        }
        let node = self.node_mut(parent)?;
        node.subs.push(link);
        let index = node.subs.len() - 1;
        self.set_flags_raw(parent, RecordFlags::HAS_SUBS, true)?;
        self.bump_version(parent)?;
        Ok(index)
    }

    /// Appends an owned sub-record; returns its index.
    pub fn add_sub(&mut self, parent: RecordId, child: RecordId) -> BaleResult<usize> {
        self.push_sub(parent, SubLink::owned(child))
    }

    /// Appends an aliased sub-record (shared sub-tree or cycle); returns its
    /// index.
    pub fn add_alias(&mut self, parent: RecordId, child: RecordId) -> BaleResult<usize> {
        self.push_sub(parent, SubLink::aliased(child))
    }

    /// Replaces the target of the sub-record link at `index`.
    pub fn replace_sub(&mut self, parent: RecordId, index: usize, child: RecordId) -> BaleResult<SubLink> {
        self.check_mutable(parent)?;
        self.node(child)?;
        let node = self.node_mut(parent)?;
        let slot = node.subs.get_mut(index).ok_or_else(|| {
            BaleError::illegal_argument(format!("record {parent} has no sub-record {index}"))
        })?;
        let previous = *slot;
        *slot = SubLink::owned(child);
        self.bump_version(parent)?;
        Ok(previous)
    }

    /// Removes the sub-record link at `index`.
    pub fn remove_sub(&mut self, parent: RecordId, index: usize) -> BaleResult<SubLink> {
        self.check_mutable(parent)?;
        let node = self.node_mut(parent)?;
        if index >= node.subs.len() {
            return Err(BaleError::illegal_argument(format!(
                "record {parent} has no sub-record {index}"
            )));
        }
        let link = node.subs.remove(index);
        let now_empty = node.subs.is_empty();
        if now_empty {
            self.set_flags_raw(parent, RecordFlags::HAS_SUBS, false)?;
        }
        self.bump_version(parent)?;
        Ok(link)
    }

    // =========================================================================
    // Flags and trailers
    // =========================================================================

    /// Marks a record immutable. Immutability cannot be lifted.
    pub fn set_immutable(&mut self, id: RecordId) -> BaleResult<()> {
        self.set_flags_raw(id, RecordFlags::IMMUTABLE, true)
    }

    /// Marks a record as an incomplete overlay (or a complete one).
    pub fn set_incomplete(&mut self, id: RecordId, incomplete: bool) -> BaleResult<()> {
        self.check_mutable(id)?;
        self.set_flags_raw(id, RecordFlags::INCOMPLETE, incomplete)
    }

    /// Pins or unpins a record.
    pub fn set_pinned(&mut self, id: RecordId, pinned: bool) -> BaleResult<()> {
        self.check_mutable(id)?;
        self.set_flags_raw(id, RecordFlags::PINNED, pinned)
    }

    /// Enables or disables the 16-bit version counter trailer.
    ///
    /// Enabling adds two bytes (counter starts at zero); disabling removes
    /// them.
    pub fn set_versioning(&mut self, id: RecordId, enabled: bool) -> BaleResult<()> {
        let header = self.check_mutable(id)?;
        if header.flags.contains(RecordFlags::VERSIONING) == enabled {
            return Ok(());
        }
        let at = header.payload_range().end;
        if enabled {
            self.resize(id, at, 0, VERSION_TRAILER_SIZE)?;
        } else {
            self.resize(id, at, VERSION_TRAILER_SIZE, 0)?;
        }
        self.set_flags_raw(id, RecordFlags::VERSIONING, enabled)
    }

    /// Returns the version counter, if versioning is enabled.
    pub fn version(&self, id: RecordId) -> BaleResult<Option<u16>> {
        self.view(id).map(|record| record.version())
    }

    /// Sets or clears the 1-byte intra-reference id trailer.
    pub fn set_intra_reference(&mut self, id: RecordId, value: Option<u8>) -> BaleResult<()> {
        let header = self.check_mutable(id)?;
        let at = header.payload_range().end + header.flags.intra_reference_offset();
        let present = header.flags.contains(RecordFlags::INTRA_REFERENCE);
        match (present, value) {
            (false, Some(_)) => {
                self.resize(id, at, 0, INTRA_REFERENCE_TRAILER_SIZE)?;
                self.set_flags_raw(id, RecordFlags::INTRA_REFERENCE, true)?;
            }
            (true, None) => {
                self.resize(id, at, INTRA_REFERENCE_TRAILER_SIZE, 0)?;
                self.set_flags_raw(id, RecordFlags::INTRA_REFERENCE, false)?;
            }
            _ => {}
        }
        if let Some(value) = value {
            self.bytes_mut(id)?[at] = value;
        }
        self.bump_version(id)
    }

    /// Returns the intra-reference id, if present.
    pub fn intra_reference(&self, id: RecordId) -> BaleResult<Option<u8>> {
        self.view(id).map(|record| record.intra_reference())
    }

    // =========================================================================
    // Dynamic arrays
    // =========================================================================

    /// Rewrites the dynamic array region at payload offset `offset`,
    /// growing or shrinking the record to fit, and marks the record
    /// variable-size.
    pub fn write_array(&mut self, id: RecordId, offset: usize, values: &[i32]) -> BaleResult<()> {
        let header = self.check_mutable(id)?;
        let payload = header.payload_range();
        let old_len = {
            let bytes = self.bytes(id)?;
            array::region_len(&bytes[payload.clone()], offset)?
        };
        let width = array::min_width(values);
        let new_len = array::encoded_len(values.len(), width);
        let region_at = payload.start + offset;
        if new_len != old_len {
            self.resize(id, region_at, old_len, new_len)?;
        }
        {
            let bytes = self.bytes_mut(id)?;
            array::write(&mut bytes[region_at..region_at + new_len], 0, values, width)?;
        }
        self.set_flags_raw(id, RecordFlags::VARIABLE_SIZE, true)?;
        self.bump_version(id)
    }

    /// Reads the dynamic array region at payload offset `offset`.
    pub fn read_array(&self, id: RecordId, offset: usize) -> BaleResult<Vec<i32>> {
        self.view(id)?.read_array(offset)
    }
}

/// Converts a total byte count into a plain-record length field.
pub(crate) fn checked_length(total: usize) -> BaleResult<u16> {
    if total > MAX_RECORD_LENGTH {
        return Err(BaleError::illegal_argument(format!(
            "record of {total} bytes exceeds the {MAX_RECORD_LENGTH}-byte limit"
        )));
    }
    Ok(total as u16)
}
