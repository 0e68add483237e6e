//! Typed views over a record's bytes.
//!
//! Field offsets are relative to the first payload byte and are checked
//! against the payload, so a field can never reach into the header or the
//! trailers.

use std::ops::Range;

use bale_common::constants::{SERIAL_MAGIC, SERIAL_TRAILER_SIZE};
use bale_common::error::{BaleError, BaleResult};

use crate::array;
use crate::field;
use crate::header::RecordHeader;
use crate::store::{RecordId, RecordStore, SubLink};
use crate::types::{RecordFlags, RecordType};

/// Decoded serialization trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SerialTrailer {
    pub(crate) magic: u8,
    pub(crate) count: u16,
}

impl SerialTrailer {
    pub(crate) fn is_valid(&self) -> bool {
        self.magic == SERIAL_MAGIC
    }
}

/// Read-only view of one record.
#[derive(Debug, Clone, Copy)]
pub struct BinaryRecord<'a> {
    id: RecordId,
    header: RecordHeader,
    bytes: &'a [u8],
    subs: &'a [SubLink],
}

impl<'a> BinaryRecord<'a> {
    pub(crate) fn new(
        id: RecordId,
        header: RecordHeader,
        bytes: &'a [u8],
        subs: &'a [SubLink],
    ) -> Self {
        Self {
            id,
            header,
            bytes,
            subs,
        }
    }

    /// Returns the record id.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Returns the decoded header.
    pub fn header(&self) -> RecordHeader {
        self.header
    }

    /// Returns the type tag.
    pub fn record_type(&self) -> RecordType {
        self.header.record_type
    }

    /// Returns the flags.
    pub fn flags(&self) -> RecordFlags {
        self.header.flags
    }

    /// Returns the total length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false: every record has at least a header.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns every byte of the record.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Returns the payload bytes.
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[self.header.payload_range()]
    }

    /// Returns the sub-record links.
    pub fn subs(&self) -> &'a [SubLink] {
        self.subs
    }

    /// Returns the sub-record at `index`.
    pub fn sub(&self, index: usize) -> BaleResult<RecordId> {
        self.subs.get(index).map(|link| link.id).ok_or_else(|| {
            BaleError::illegal_argument(format!("record {} has no sub-record {index}", self.id))
        })
    }

    /// Reads an unsigned field.
    pub fn read_uint(&self, offset: usize, width: usize) -> BaleResult<u32> {
        field::read_uint(self.payload(), offset, width)
    }

    /// Reads a sign-magnitude field.
    pub fn read_int(&self, offset: usize, width: usize) -> BaleResult<i32> {
        field::read_int(self.payload(), offset, width)
    }

    /// Reads a 2-bit lane.
    pub fn read_bits2(&self, offset: usize, index: usize) -> BaleResult<u8> {
        field::read_bits2(self.payload(), offset, index)
    }

    /// Reads a 4-bit lane.
    pub fn read_nibble(&self, offset: usize, index: usize) -> BaleResult<u8> {
        field::read_nibble(self.payload(), offset, index)
    }

    /// Reads raw payload bytes.
    pub fn read_bytes(&self, offset: usize, len: usize) -> BaleResult<&'a [u8]> {
        field::read_bytes(self.payload(), offset, len)
    }

    /// Reads a dynamic array region.
    pub fn read_array(&self, offset: usize) -> BaleResult<Vec<i32>> {
        array::read(self.payload(), offset)
    }

    /// Reads one element of a dynamic array region.
    pub fn array_get(&self, offset: usize, index: usize) -> BaleResult<i32> {
        array::get(self.payload(), offset, index)
    }

    fn trailer_range(&self) -> Range<usize> {
        self.header.payload_range().end..self.bytes.len()
    }

    /// Returns the version counter, if versioning is enabled.
    pub fn version(&self) -> Option<u16> {
        if !self.header.flags.contains(RecordFlags::VERSIONING) {
            return None;
        }
        let at = self.trailer_range().start;
        Some(u16::from_be_bytes([self.bytes[at], self.bytes[at + 1]]))
    }

    /// Returns the intra-reference id, if present.
    pub fn intra_reference(&self) -> Option<u8> {
        if !self.header.flags.contains(RecordFlags::INTRA_REFERENCE) {
            return None;
        }
        let at = self.trailer_range().start + self.header.flags.intra_reference_offset();
        Some(self.bytes[at])
    }

    pub(crate) fn serial_trailer(&self) -> Option<SerialTrailer> {
        if !self.header.flags.contains(RecordFlags::SERIALIZED) {
            return None;
        }
        let at = self.bytes.len() - SERIAL_TRAILER_SIZE;
        Some(SerialTrailer {
            magic: self.bytes[at],
            count: u16::from_be_bytes([self.bytes[at + 1], self.bytes[at + 2]]),
        })
    }

    /// Bytes from the header through the end of the payload.
    pub(crate) fn content_bytes(&self) -> &'a [u8] {
        &self.bytes[..self.header.payload_range().end]
    }
}

/// Write view of one record.
///
/// Every write is rejected on an immutable record and counted by the
/// version trailer when versioning is enabled.
#[derive(Debug)]
pub struct BinaryRecordMut<'a> {
    store: &'a mut RecordStore,
    id: RecordId,
}

impl<'a> BinaryRecordMut<'a> {
    pub(crate) fn new(store: &'a mut RecordStore, id: RecordId) -> Self {
        Self { store, id }
    }

    /// Returns the record id.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Returns a read view of the same record.
    pub fn as_view(&self) -> BaleResult<BinaryRecord<'_>> {
        self.store.view(self.id)
    }

    /// Writes an unsigned field.
    pub fn write_uint(&mut self, offset: usize, width: usize, value: u32) -> BaleResult<&mut Self> {
        self.store
            .with_payload_mut(self.id, |payload| field::write_uint(payload, offset, width, value))?;
        Ok(self)
    }

    /// Writes a sign-magnitude field.
    pub fn write_int(&mut self, offset: usize, width: usize, value: i32) -> BaleResult<&mut Self> {
        self.store
            .with_payload_mut(self.id, |payload| field::write_int(payload, offset, width, value))?;
        Ok(self)
    }

    /// Writes a 2-bit lane.
    pub fn write_bits2(&mut self, offset: usize, index: usize, value: u8) -> BaleResult<&mut Self> {
        self.store.with_payload_mut(self.id, |payload| {
            field::write_bits2(payload, offset, index, value)
        })?;
        Ok(self)
    }

    /// Writes a 4-bit lane.
    pub fn write_nibble(&mut self, offset: usize, index: usize, value: u8) -> BaleResult<&mut Self> {
        self.store.with_payload_mut(self.id, |payload| {
            field::write_nibble(payload, offset, index, value)
        })?;
        Ok(self)
    }

    /// Writes raw payload bytes.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> BaleResult<&mut Self> {
        self.store
            .with_payload_mut(self.id, |payload| field::write_bytes(payload, offset, bytes))?;
        Ok(self)
    }

    /// Rewrites a dynamic array region, resizing the record.
    pub fn write_array(&mut self, offset: usize, values: &[i32]) -> BaleResult<&mut Self> {
        self.store.write_array(self.id, offset, values)?;
        Ok(self)
    }
}
