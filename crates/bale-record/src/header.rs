//! Base record header.
//!
//! Every record starts with the same 4-byte header.

use bytes::{Buf, BufMut};

use bale_common::constants::{LENGTH_EXTENDED, RECORD_HEADER_SIZE, TAG_REFERENCE};
use bale_common::error::{BaleError, BaleResult};

use crate::types::{RecordFlags, RecordType};

/// Base record header (4 bytes).
///
/// Layout:
/// - record_type: 1 byte
/// - flags: 1 byte
/// - length: 2 bytes (big-endian, total bytes including trailers)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Type tag.
    pub record_type: RecordType,
    /// Record flags.
    pub flags: RecordFlags,
    /// Total record length in bytes, header and trailers included.
    pub length: u16,
}

impl RecordHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = RECORD_HEADER_SIZE;

    /// Creates a new record header.
    pub fn new(record_type: RecordType, flags: RecordFlags, length: u16) -> Self {
        Self {
            record_type,
            flags,
            length,
        }
    }

    /// Serializes the header to bytes.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.record_type.as_u8());
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.length);
    }

    /// Serializes the header to a byte array.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut cursor = &mut buf[..];
        self.serialize(&mut cursor);
        buf
    }

    /// Deserializes a header from bytes.
    pub fn deserialize(buf: &mut impl Buf) -> BaleResult<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(BaleError::corrupt_data(format!(
                "not enough bytes for record header: {} < {}",
                buf.remaining(),
                Self::SIZE
            )));
        }

        let tag = buf.get_u8();
        let record_type = RecordType::from_u8(tag).ok_or_else(|| {
            BaleError::corrupt_data(format!("type tag {TAG_REFERENCE:#04x} is not a record"))
        })?;
        let flags = RecordFlags::from_bits_retain(buf.get_u8());
        let length = buf.get_u16();

        Ok(Self {
            record_type,
            flags,
            length,
        })
    }

    /// Deserializes a header from a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> BaleResult<Self> {
        Self::deserialize(&mut &bytes[..])
    }

    /// Returns the number of trailer bytes.
    #[inline]
    pub fn trailer_len(&self) -> usize {
        self.flags.trailer_len()
    }

    /// Returns the total length in bytes.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.length as usize
    }

    /// Returns the payload range relative to the record start.
    pub fn payload_range(&self) -> std::ops::Range<usize> {
        Self::SIZE..self.total_len() - self.trailer_len()
    }

    /// Checks that the declared length is consistent and fits in `available`
    /// bytes.
    pub fn validate(&self, available: usize) -> BaleResult<()> {
        if self.length == LENGTH_EXTENDED {
            return Err(BaleError::corrupt_data(
                "extended length sentinel in a plain record",
            ));
        }

        let minimum = Self::SIZE + self.trailer_len();
        if self.total_len() < minimum {
            return Err(BaleError::corrupt_data(format!(
                "record length {} below minimum {}",
                self.length, minimum
            )));
        }

        if self.total_len() > available {
            return Err(BaleError::corrupt_data(format!(
                "record length {} exceeds {} available bytes",
                self.length, available
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        assert_eq!(RecordHeader::SIZE, 4);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = RecordHeader::new(
            RecordType::new(5).unwrap(),
            RecordFlags::HAS_SUBS | RecordFlags::SERIALIZED,
            23,
        );

        let bytes = header.to_bytes();
        assert_eq!(bytes, [5, 0x90, 0, 23]);
        assert_eq!(RecordHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_truncated_header() {
        let err = RecordHeader::from_bytes(&[5, 0]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_marker_tag_is_not_a_header() {
        let err = RecordHeader::from_bytes(&[0xFF, 0, 0, 5]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_validate() {
        let header = RecordHeader::new(RecordType::new(1).unwrap(), RecordFlags::VERSIONING, 6);
        assert!(header.validate(6).is_ok());
        assert!(header.validate(5).is_err());

        let short = RecordHeader::new(RecordType::new(1).unwrap(), RecordFlags::SERIALIZED, 6);
        assert!(short.validate(100).unwrap_err().is_corruption());

        let extended = RecordHeader::new(RecordType::new(1).unwrap(), RecordFlags::empty(), 0xFFFF);
        assert!(extended.validate(usize::MAX).is_err());
    }

    #[test]
    fn test_payload_range() {
        let header = RecordHeader::new(RecordType::new(1).unwrap(), RecordFlags::VERSIONING, 20);
        assert_eq!(header.payload_range(), 4..18);
    }
}
