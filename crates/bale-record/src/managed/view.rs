//! Views over managed record bytes and growth planning.
//!
//! A managed record is `[static header][dynamic header][data][slack]`.
//! Growth never moves bytes before the growth point: data grows into the
//! slack first, and only when the slack is short does the backing storage
//! need a physical splice. A [`GrowthPlan`] describes that splice so the
//! owner of the bytes (a private `Vec` or a shared arena slot) can perform
//! it, then [`GrowthPlan::finish`] rewrites the length fields.

use std::ops::Range;

use bale_common::constants::{LENGTH_EXTENDED, MAX_RECORD_LENGTH};
use bale_common::error::{BaleError, BaleResult};
use bale_common::types::{
    ClassId, ControlGroupId, GroupId, InstanceId, InterfaceId, ReferenceId,
};

use crate::field;
use crate::managed::header::{offsets, ManagedHeader};
use crate::types::RecordFlags;

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn write_u16(bytes: &mut [u8], at: usize, value: u16) {
    bytes[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

/// Read view over the bytes of one managed record.
#[derive(Debug, Clone, Copy)]
pub struct ManagedView<'a> {
    bytes: &'a [u8],
    header: ManagedHeader,
}

impl<'a> ManagedView<'a> {
    /// Validates the header and wraps the record's bytes.
    ///
    /// `bytes` may extend past the record; the view covers exactly the
    /// record's total length.
    pub fn new(bytes: &'a [u8]) -> BaleResult<Self> {
        let header = ManagedHeader::from_bytes(bytes)?;
        let total = header.total_length as usize;
        let bytes = bytes.get(..total).ok_or_else(|| {
            BaleError::corrupt_data(format!(
                "managed record of {total} bytes truncated to {}",
                bytes.len()
            ))
        })?;
        Ok(Self { bytes, header })
    }

    /// Returns the decoded header.
    pub fn header(&self) -> &ManagedHeader {
        &self.header
    }

    /// Returns every byte of the record.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Returns the dynamic header region.
    pub fn dynamic(&self) -> &'a [u8] {
        &self.bytes[self.header.static_length as usize..self.header.data_start()]
    }

    /// Returns the data region.
    pub fn data(&self) -> &'a [u8] {
        &self.bytes[self.header.data_start()..self.header.data_end()]
    }

    /// Returns the slack region.
    pub fn slack(&self) -> &'a [u8] {
        &self.bytes[self.header.data_end()..]
    }

    /// Reads an unsigned data field.
    pub fn read_uint(&self, offset: usize, width: usize) -> BaleResult<u32> {
        field::read_uint(self.data(), offset, width)
    }

    /// Reads a sign-magnitude data field.
    pub fn read_int(&self, offset: usize, width: usize) -> BaleResult<i32> {
        field::read_int(self.data(), offset, width)
    }

    /// Reads raw data bytes.
    pub fn read_bytes(&self, offset: usize, len: usize) -> BaleResult<&'a [u8]> {
        field::read_bytes(self.data(), offset, len)
    }
}

/// Write view over the bytes of one managed record.
#[derive(Debug)]
pub struct ManagedViewMut<'a> {
    bytes: &'a mut [u8],
    header: ManagedHeader,
}

impl<'a> ManagedViewMut<'a> {
    /// Validates the header and wraps the record's bytes.
    pub fn new(bytes: &'a mut [u8]) -> BaleResult<Self> {
        let header = ManagedView::new(bytes)?.header;
        let total = header.total_length as usize;
        Ok(Self {
            bytes: &mut bytes[..total],
            header,
        })
    }

    /// Returns the decoded header.
    pub fn header(&self) -> &ManagedHeader {
        &self.header
    }

    /// Returns a read view.
    pub fn as_view(&self) -> ManagedView<'_> {
        ManagedView {
            bytes: &*self.bytes,
            header: self.header,
        }
    }

    /// Returns the data region for writing.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let range = self.header.data_start()..self.header.data_end();
        &mut self.bytes[range]
    }

    /// Returns the dynamic header region for writing.
    pub fn dynamic_mut(&mut self) -> &mut [u8] {
        let range = self.header.static_length as usize..self.header.data_start();
        &mut self.bytes[range]
    }

    /// Writes an unsigned data field.
    pub fn write_uint(&mut self, offset: usize, width: usize, value: u32) -> BaleResult<()> {
        field::write_uint(self.data_mut(), offset, width, value)
    }

    /// Writes a sign-magnitude data field.
    pub fn write_int(&mut self, offset: usize, width: usize, value: i32) -> BaleResult<()> {
        field::write_int(self.data_mut(), offset, width, value)
    }

    /// Writes raw data bytes.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> BaleResult<()> {
        field::write_bytes(self.data_mut(), offset, bytes)
    }

    /// Sets the interface id.
    pub fn set_interface_id(&mut self, id: InterfaceId) {
        write_u16(self.bytes, offsets::INTERFACE, id.as_u16());
        self.header.interface_id = id;
    }

    /// Sets the class id.
    pub fn set_class_id(&mut self, id: ClassId) {
        write_u16(self.bytes, offsets::CLASS, id.as_u16());
        self.header.class_id = id;
    }

    /// Sets the storage group id.
    pub fn set_group_id(&mut self, id: GroupId) {
        write_u16(self.bytes, offsets::GROUP, id.as_u16());
        self.header.group_id = id;
    }

    /// Sets the instance id.
    pub fn set_instance_id(&mut self, id: InstanceId) {
        write_u16(self.bytes, offsets::INSTANCE, id.as_u16());
        self.header.instance_id = id;
    }

    /// Sets the reference id.
    pub fn set_reference_id(&mut self, id: ReferenceId) {
        write_u16(self.bytes, offsets::REFERENCE, id.as_u16());
        self.header.reference_id = id;
    }

    /// Sets the control group id.
    pub fn set_control_group_id(&mut self, id: ControlGroupId) {
        write_u16(self.bytes, offsets::CONTROL_GROUP, id.as_u16());
        self.header.control_group_id = id;
    }

    /// Zeroes every identity field.
    pub fn clear_identity(&mut self) {
        self.set_interface_id(InterfaceId::NONE);
        self.set_class_id(ClassId::NONE);
        self.set_group_id(GroupId::NONE);
        self.set_instance_id(InstanceId::NONE);
        self.set_reference_id(ReferenceId::NONE);
        self.set_control_group_id(ControlGroupId::NONE);
    }

    /// Sets or clears base flags allowed on managed records.
    pub fn set_flag(&mut self, flag: RecordFlags, on: bool) -> BaleResult<()> {
        if flag.intersects(RecordFlags::TRAILERS | RecordFlags::HAS_SUBS) {
            return Err(BaleError::illegal_argument(format!(
                "flag {flag:?} is not valid on a managed record"
            )));
        }
        self.header.flags.set(flag, on);
        self.bytes[1] = self.header.flags.bits();
        Ok(())
    }
}

/// A planned resize of a managed record.
///
/// The owner of the bytes replaces `remove` bytes at `insert_at` with
/// `insert` zero bytes (nothing to do when both are zero), then calls
/// [`GrowthPlan::finish`] on the resized record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrowthPlan {
    /// Record-relative offset of the splice.
    pub insert_at: usize,
    /// Bytes removed at the splice point.
    pub remove: usize,
    /// Zero bytes inserted at the splice point.
    pub insert: usize,
    /// Data length after the change.
    pub data_length: u32,
    /// Slack length after the change.
    pub buffer_length: u32,
    /// Record-relative range zeroed after the splice.
    pub zero: Range<usize>,
}

impl GrowthPlan {
    /// True if the change fits in the existing bytes.
    pub fn is_in_place(&self) -> bool {
        self.insert == 0 && self.remove == 0
    }

    /// Signed change in total length.
    pub fn delta(&self) -> isize {
        self.insert as isize - self.remove as isize
    }

    fn with_totals(header: &ManagedHeader, data_length: u64, buffer_length: u64) -> BaleResult<(u32, u32)> {
        let total = u64::from(header.static_length)
            + u64::from(header.dynamic_length)
            + data_length
            + buffer_length;
        if total > u64::from(u32::MAX) {
            return Err(BaleError::illegal_argument(format!(
                "managed record would grow to {total} bytes"
            )));
        }
        Ok((data_length as u32, buffer_length as u32))
    }

    /// Grows the data region by `n` bytes, taking slack first.
    ///
    /// When the slack is short, the shortfall plus `reserve` fresh slack
    /// bytes are inserted at the end of the record.
    pub fn expand_data(header: &ManagedHeader, n: usize, reserve: usize) -> BaleResult<Self> {
        let data_end = header.data_end();
        let slack = header.buffer_length as usize;
        let (insert, buffer_length) = if slack >= n {
            (0, slack - n)
        } else {
            (n - slack + reserve, reserve)
        };
        let (data_length, buffer_length) = Self::with_totals(
            header,
            header.data_length as u64 + n as u64,
            buffer_length as u64,
        )?;
        Ok(Self {
            insert_at: header.total_length as usize,
            remove: 0,
            insert,
            data_length,
            buffer_length,
            zero: data_end..data_end + n,
        })
    }

    /// Adds `n` bytes of slack at the end of the record.
    pub fn expand_buffer(header: &ManagedHeader, n: usize) -> BaleResult<Self> {
        let (data_length, buffer_length) = Self::with_totals(
            header,
            u64::from(header.data_length),
            header.buffer_length as u64 + n as u64,
        )?;
        let end = header.total_length as usize;
        Ok(Self {
            insert_at: end,
            remove: 0,
            insert: n,
            data_length,
            buffer_length,
            zero: end..end + n,
        })
    }

    /// Removes all slack.
    pub fn trim(header: &ManagedHeader) -> Self {
        let data_end = header.data_end();
        Self {
            insert_at: data_end,
            remove: header.buffer_length as usize,
            insert: 0,
            data_length: header.data_length,
            buffer_length: 0,
            zero: data_end..data_end,
        }
    }

    /// Replaces data and slack with `n` zeroed data bytes.
    pub fn reset_data(header: &ManagedHeader, n: usize) -> BaleResult<Self> {
        let start = header.data_start();
        let (data_length, buffer_length) = Self::with_totals(header, n as u64, 0)?;
        Ok(Self {
            insert_at: start,
            remove: header.data_length as usize + header.buffer_length as usize,
            insert: n,
            data_length,
            buffer_length,
            zero: start..start + n,
        })
    }

    /// Rewrites the length fields of the resized record and zeroes the
    /// newly claimed bytes.
    pub fn finish(&self, bytes: &mut [u8]) -> BaleResult<()> {
        let static_length = read_u16(bytes, offsets::STATIC_LENGTH) as usize;
        let dynamic_length = read_u16(bytes, offsets::DYNAMIC_LENGTH) as usize;
        let total = static_length + dynamic_length + self.data_length as usize + self.buffer_length as usize;
        if bytes.len() < total {
            return Err(BaleError::illegal_state(format!(
                "resized record has {} bytes, plan needs {total}",
                bytes.len()
            )));
        }
        write_u32(bytes, offsets::DATA_LENGTH, self.data_length);
        write_u32(bytes, offsets::BUFFER_LENGTH, self.buffer_length);
        write_u32(bytes, offsets::TOTAL_LENGTH, total as u32);
        let base = if total <= MAX_RECORD_LENGTH {
            total as u16
        } else {
            LENGTH_EXTENDED
        };
        write_u16(bytes, 2, base);
        bytes[self.zero.clone()].fill(0);
        Ok(())
    }

    /// Applies the plan to a privately owned buffer.
    pub fn apply(&self, bytes: &mut Vec<u8>) -> BaleResult<()> {
        if !self.is_in_place() {
            let end = self.insert_at + self.remove;
            if end > bytes.len() {
                return Err(BaleError::illegal_state(format!(
                    "growth splice {}..{end} outside {}-byte record",
                    self.insert_at,
                    bytes.len()
                )));
            }
            bytes.splice(self.insert_at..end, std::iter::repeat(0u8).take(self.insert));
        }
        self.finish(bytes)
    }
}
