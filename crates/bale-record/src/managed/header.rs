//! Managed record header.

use bytes::{Buf, BufMut};

use bale_common::constants::{LENGTH_EXTENDED, MANAGED_MAGIC, MANAGED_STATIC_HEADER_SIZE, MAX_RECORD_LENGTH};
use bale_common::error::{BaleError, BaleResult};
use bale_common::types::{
    ClassId, ControlGroupId, GroupId, InstanceId, InterfaceId, ReferenceId, StorageSlot,
};

use crate::header::RecordHeader;
use crate::types::{RecordFlags, RecordType};

/// Byte offsets of the static header fields, relative to the record start.
pub mod offsets {
    /// Interface id (u16).
    pub const INTERFACE: usize = 4;
    /// Class id (u16).
    pub const CLASS: usize = 6;
    /// Storage group id (u16).
    pub const GROUP: usize = 8;
    /// Instance id (u16).
    pub const INSTANCE: usize = 10;
    /// Reference id (u16).
    pub const REFERENCE: usize = 12;
    /// Control group id (u16).
    pub const CONTROL_GROUP: usize = 14;
    /// Dynamic header length (u16).
    pub const DYNAMIC_LENGTH: usize = 16;
    /// Static header length (u16).
    pub const STATIC_LENGTH: usize = 18;
    /// Data region length (u32).
    pub const DATA_LENGTH: usize = 20;
    /// Slack region length (u32).
    pub const BUFFER_LENGTH: usize = 24;
    /// Total record length (u32).
    pub const TOTAL_LENGTH: usize = 28;
    /// Magic word (u32).
    pub const MAGIC: usize = 32;
}

/// Decoded static header of a managed record (36 bytes, base header
/// included).
///
/// Layout:
/// - base header: 4 bytes
/// - interface, class, group, instance, reference, control group: 2 bytes each
/// - dynamic header length, static header length: 2 bytes each
/// - data length, buffer (slack) length, total length: 4 bytes each
/// - magic: 4 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedHeader {
    /// Type tag.
    pub record_type: RecordType,
    /// Base record flags.
    pub flags: RecordFlags,
    /// Interface id handed to factories.
    pub interface_id: InterfaceId,
    /// Class id.
    pub class_id: ClassId,
    /// Storage group.
    pub group_id: GroupId,
    /// Instance within the group.
    pub instance_id: InstanceId,
    /// Reference id within the owning controller.
    pub reference_id: ReferenceId,
    /// Control group id.
    pub control_group_id: ControlGroupId,
    /// Dynamic header length in bytes.
    pub dynamic_length: u16,
    /// Static header length in bytes.
    pub static_length: u16,
    /// Data region length in bytes.
    pub data_length: u32,
    /// Slack region length in bytes.
    pub buffer_length: u32,
    /// Total record length in bytes.
    pub total_length: u32,
}

impl ManagedHeader {
    /// Size of the static header in bytes.
    pub const SIZE: usize = MANAGED_STATIC_HEADER_SIZE;

    /// Creates a header for an empty record of `record_type`.
    pub fn new(record_type: RecordType) -> Self {
        Self {
            record_type,
            flags: RecordFlags::empty(),
            interface_id: InterfaceId::NONE,
            class_id: ClassId::NONE,
            group_id: GroupId::NONE,
            instance_id: InstanceId::NONE,
            reference_id: ReferenceId::NONE,
            control_group_id: ControlGroupId::NONE,
            dynamic_length: 0,
            static_length: Self::SIZE as u16,
            data_length: 0,
            buffer_length: 0,
            total_length: Self::SIZE as u32,
        }
    }

    /// Returns the storage slot named by the header.
    pub fn storage(&self) -> StorageSlot {
        StorageSlot::new(self.group_id, self.instance_id)
    }

    /// Offset of the first data byte.
    pub fn data_start(&self) -> usize {
        self.static_length as usize + self.dynamic_length as usize
    }

    /// Offset one past the last data byte.
    pub fn data_end(&self) -> usize {
        self.data_start() + self.data_length as usize
    }

    /// Sum of the region lengths; equals `total_length` in a valid header.
    pub fn computed_total(&self) -> u64 {
        u64::from(self.static_length)
            + u64::from(self.dynamic_length)
            + u64::from(self.data_length)
            + u64::from(self.buffer_length)
    }

    /// Value for the 2-byte base length field.
    pub fn base_length(&self) -> u16 {
        if self.total_length as usize <= MAX_RECORD_LENGTH {
            self.total_length as u16
        } else {
            LENGTH_EXTENDED
        }
    }

    /// Serializes the header.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        RecordHeader::new(self.record_type, self.flags, self.base_length()).serialize(buf);
        buf.put_u16(self.interface_id.as_u16());
        buf.put_u16(self.class_id.as_u16());
        buf.put_u16(self.group_id.as_u16());
        buf.put_u16(self.instance_id.as_u16());
        buf.put_u16(self.reference_id.as_u16());
        buf.put_u16(self.control_group_id.as_u16());
        buf.put_u16(self.dynamic_length);
        buf.put_u16(self.static_length);
        buf.put_u32(self.data_length);
        buf.put_u32(self.buffer_length);
        buf.put_u32(self.total_length);
        buf.put_u32(MANAGED_MAGIC);
    }

    /// Serializes the header to a byte array.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut cursor = &mut buf[..];
        self.serialize(&mut cursor);
        buf
    }

    /// Deserializes and validates a header.
    pub fn deserialize(buf: &mut impl Buf) -> BaleResult<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(BaleError::corrupt_data(format!(
                "not enough bytes for managed header: {} < {}",
                buf.remaining(),
                Self::SIZE
            )));
        }

        let base = RecordHeader::deserialize(buf)?;
        let header = Self {
            record_type: base.record_type,
            flags: base.flags,
            interface_id: InterfaceId::new(buf.get_u16()),
            class_id: ClassId::new(buf.get_u16()),
            group_id: GroupId::new(buf.get_u16()),
            instance_id: InstanceId::new(buf.get_u16()),
            reference_id: ReferenceId::new(buf.get_u16()),
            control_group_id: ControlGroupId::new(buf.get_u16()),
            dynamic_length: buf.get_u16(),
            static_length: buf.get_u16(),
            data_length: buf.get_u32(),
            buffer_length: buf.get_u32(),
            total_length: buf.get_u32(),
        };

        let magic = buf.get_u32();
        if magic != MANAGED_MAGIC {
            return Err(BaleError::corrupt_data(format!(
                "bad managed record magic {magic:#010x}"
            )));
        }
        if base.length != header.base_length() {
            return Err(BaleError::corrupt_data(format!(
                "base length {} disagrees with total length {}",
                base.length, header.total_length
            )));
        }
        header.validate()?;
        Ok(header)
    }

    /// Deserializes a header from the start of a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> BaleResult<Self> {
        Self::deserialize(&mut &bytes[..])
    }

    /// Checks region lengths against each other.
    pub fn validate(&self) -> BaleResult<()> {
        if (self.static_length as usize) < Self::SIZE {
            return Err(BaleError::corrupt_data(format!(
                "static header length {} below {}",
                self.static_length,
                Self::SIZE
            )));
        }
        if self.computed_total() != u64::from(self.total_length) {
            return Err(BaleError::corrupt_data(format!(
                "total length {} does not match regions {}",
                self.total_length,
                self.computed_total()
            )));
        }
        if self.flags.intersects(RecordFlags::TRAILERS | RecordFlags::HAS_SUBS) {
            return Err(BaleError::corrupt_data(format!(
                "managed record carries trailer flags {:?}",
                self.flags
            )));
        }
        Ok(())
    }

    /// Reads the total length of the managed record at the start of `bytes`
    /// without validating the rest of the header.
    pub fn peek_total(bytes: &[u8]) -> BaleResult<usize> {
        let field = bytes
            .get(offsets::TOTAL_LENGTH..offsets::TOTAL_LENGTH + 4)
            .ok_or_else(|| BaleError::corrupt_data("managed record truncated before total length"))?;
        let total = u32::from_be_bytes([field[0], field[1], field[2], field[3]]) as usize;
        if total < Self::SIZE {
            return Err(BaleError::corrupt_data(format!(
                "managed record total length {total} below header size"
            )));
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ManagedHeader {
        let mut header = ManagedHeader::new(RecordType::new(20).unwrap());
        header.class_id = ClassId::new(3);
        header.group_id = GroupId::new(1);
        header.instance_id = InstanceId::new(2);
        header.reference_id = ReferenceId::new(9);
        header.dynamic_length = 4;
        header.data_length = 10;
        header.buffer_length = 6;
        header.total_length = 36 + 4 + 10 + 6;
        header
    }

    #[test]
    fn test_header_size() {
        assert_eq!(ManagedHeader::SIZE, 36);
        assert_eq!(offsets::MAGIC + 4, ManagedHeader::SIZE);
    }

    #[test]
    fn test_roundtrip() {
        let header = sample();
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..4], &[20, 0, 0, 56]);
        assert_eq!(&bytes[offsets::MAGIC..], &MANAGED_MAGIC.to_be_bytes());
        assert_eq!(ManagedHeader::from_bytes(&bytes).unwrap(), header);
        assert_eq!(ManagedHeader::peek_total(&bytes).unwrap(), 56);
        assert_eq!(header.data_start(), 40);
        assert_eq!(header.data_end(), 50);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[offsets::MAGIC] ^= 0xFF;
        assert!(ManagedHeader::from_bytes(&bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn test_inconsistent_lengths() {
        let mut header = sample();
        header.buffer_length = 7;
        assert!(ManagedHeader::from_bytes(&header.to_bytes())
            .unwrap_err()
            .is_corruption());
    }

    #[test]
    fn test_extended_length() {
        let mut header = sample();
        header.data_length = 70_000;
        header.total_length = 36 + 4 + 70_000 + 6;
        let bytes = header.to_bytes();
        assert_eq!(&bytes[2..4], &[0xFF, 0xFF]);
        assert_eq!(ManagedHeader::from_bytes(&bytes).unwrap(), header);
    }
}
