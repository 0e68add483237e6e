//! Envelope encoding.
//!
//! An envelope is the unit exchanged with a storage source:
//!
//! ```text
//! +--------+-------------+-----------+-------+----------+-----------+---------+-----+---------+
//! | Base 4 | Count 3     | Root ref 2| Group | Instance | Total 4   | Rec 0   | ... | Rec N-1 |
//! +--------+-------------+-----------+-------+----------+-----------+---------+-----+---------+
//! ```
//!
//! The base header carries the envelope tag and the total size (or the
//! extended-length sentinel). Records follow back to back, each a complete
//! managed record.

use std::ops::Range;

use bytes::{Buf, BufMut};

use bale_common::constants::{
    ENVELOPE_HEADER_SIZE, LENGTH_EXTENDED, MAX_ENVELOPE_RECORDS, MAX_RECORD_LENGTH,
};
use bale_common::error::{BaleError, BaleResult};
use bale_common::types::{GroupId, InstanceId, ReferenceId, StorageSlot};
use bale_record::{ManagedHeader, ManagedView, RecordFlags, RecordHeader, RecordType};

/// Decoded envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Number of managed records that follow.
    pub record_count: u32,
    /// Reference id of the controller root stored here, or zero.
    pub root_reference: ReferenceId,
    /// Storage slot the envelope belongs to.
    pub slot: StorageSlot,
    /// Total envelope size, header included.
    pub total_size: u32,
}

impl EnvelopeHeader {
    /// Size of the envelope header in bytes.
    pub const SIZE: usize = ENVELOPE_HEADER_SIZE;

    /// Header of an envelope holding no records.
    pub fn empty(slot: StorageSlot) -> Self {
        Self {
            record_count: 0,
            root_reference: ReferenceId::NONE,
            slot,
            total_size: Self::SIZE as u32,
        }
    }

    /// Serializes the header.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        let base = if self.total_size as usize <= MAX_RECORD_LENGTH {
            self.total_size as u16
        } else {
            LENGTH_EXTENDED
        };
        RecordHeader::new(RecordType::ENVELOPE, RecordFlags::empty(), base).serialize(buf);
        let count = self.record_count.to_be_bytes();
        buf.put_slice(&count[1..]);
        buf.put_u16(self.root_reference.as_u16());
        buf.put_u16(self.slot.group.as_u16());
        buf.put_u16(self.slot.instance.as_u16());
        buf.put_u32(self.total_size);
    }

    /// Deserializes a header, checking the tag and the base length.
    pub fn deserialize(buf: &mut impl Buf) -> BaleResult<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(BaleError::corrupt_data(format!(
                "envelope header truncated: {} < {}",
                buf.remaining(),
                Self::SIZE
            )));
        }

        let base = RecordHeader::deserialize(buf)?;
        if base.record_type != RecordType::ENVELOPE {
            return Err(BaleError::corrupt_data(format!(
                "expected envelope, found {:?}",
                base.record_type
            )));
        }
        let record_count =
            u32::from_be_bytes([0, buf.get_u8(), buf.get_u8(), buf.get_u8()]);
        let root_reference = ReferenceId::new(buf.get_u16());
        let group = GroupId::new(buf.get_u16());
        let instance = InstanceId::new(buf.get_u16());
        let total_size = buf.get_u32();

        let header = Self {
            record_count,
            root_reference,
            slot: StorageSlot::new(group, instance),
            total_size,
        };
        let expected = if total_size as usize <= MAX_RECORD_LENGTH {
            total_size as u16
        } else {
            LENGTH_EXTENDED
        };
        if base.length != expected {
            return Err(BaleError::corrupt_data(format!(
                "envelope base length {} does not match total size {total_size}",
                base.length
            )));
        }
        if (total_size as usize) < Self::SIZE {
            return Err(BaleError::corrupt_data(format!(
                "envelope total size {total_size} below header size"
            )));
        }
        Ok(header)
    }

    /// Deserializes a header from the start of a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> BaleResult<Self> {
        Self::deserialize(&mut &bytes[..])
    }
}

/// A decoded envelope: its header and the byte range of every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope header.
    pub header: EnvelopeHeader,
    /// Range of each managed record within the envelope bytes, in order.
    pub records: Vec<Range<usize>>,
}

impl Envelope {
    /// Splits envelope bytes into managed records.
    ///
    /// Every record must validate and the records must fill the envelope
    /// exactly.
    pub fn decode(bytes: &[u8]) -> BaleResult<Self> {
        let header = EnvelopeHeader::from_bytes(bytes)?;
        let total = header.total_size as usize;
        if total != bytes.len() {
            return Err(BaleError::corrupt_data(format!(
                "envelope declares {total} bytes, source returned {}",
                bytes.len()
            )));
        }

        let fits = total.saturating_sub(EnvelopeHeader::SIZE) / ManagedHeader::SIZE;
        let mut records = Vec::with_capacity((header.record_count as usize).min(fits));
        let mut cursor = EnvelopeHeader::SIZE;
        for index in 0..header.record_count {
            let rest = &bytes[cursor..];
            if rest.is_empty() {
                return Err(BaleError::corrupt_data(format!(
                    "envelope ends before record {index} of {}",
                    header.record_count
                )));
            }
            let len = ManagedHeader::peek_total(rest)?;
            if len > rest.len() {
                return Err(BaleError::corrupt_data(format!(
                    "record {index} of {len} bytes overruns envelope by {}",
                    len - rest.len()
                )));
            }
            ManagedView::new(&rest[..len])?;
            records.push(cursor..cursor + len);
            cursor += len;
        }

        if cursor != total {
            return Err(BaleError::corrupt_data(format!(
                "{} bytes after the last of {} records",
                total - cursor,
                header.record_count
            )));
        }
        Ok(Self { header, records })
    }
}

/// Builds an envelope from complete managed record bytes.
pub fn encode<'a>(
    slot: StorageSlot,
    root_reference: ReferenceId,
    records: impl IntoIterator<Item = &'a [u8]> + Clone,
) -> BaleResult<Vec<u8>> {
    let mut count = 0usize;
    let mut total = EnvelopeHeader::SIZE;
    for record in records.clone() {
        count += 1;
        total += record.len();
    }
    if count > MAX_ENVELOPE_RECORDS {
        return Err(BaleError::illegal_argument(format!(
            "{count} records exceed the envelope limit of {MAX_ENVELOPE_RECORDS}"
        )));
    }
    let total_size = u32::try_from(total).map_err(|_| {
        BaleError::illegal_argument(format!("envelope of {total} bytes too large"))
    })?;

    let header = EnvelopeHeader {
        record_count: count as u32,
        root_reference,
        slot,
        total_size,
    };
    let mut bytes = Vec::with_capacity(total);
    header.serialize(&mut bytes);
    for record in records {
        bytes.extend_from_slice(record);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_record::ManagedRecord;

    fn slot() -> StorageSlot {
        StorageSlot::new(GroupId::new(1), InstanceId::new(2))
    }

    fn record(reference: u16, data: &[u8]) -> ManagedRecord {
        ManagedRecord::builder(RecordType::new(10).unwrap())
            .storage(GroupId::new(1), InstanceId::new(2))
            .reference(ReferenceId::new(reference))
            .data(data.to_vec())
            .build()
            .unwrap()
    }

    #[test]
    fn test_header_layout() {
        let header = EnvelopeHeader {
            record_count: 0x010203,
            root_reference: ReferenceId::new(7),
            slot: slot(),
            total_size: 100,
        };
        let mut bytes = Vec::new();
        header.serialize(&mut bytes);
        assert_eq!(bytes.len(), EnvelopeHeader::SIZE);
        assert_eq!(bytes[0], RecordType::ENVELOPE.as_u8());
        assert_eq!(&bytes[2..4], &[0, 100]);
        assert_eq!(&bytes[4..7], &[1, 2, 3]);
        assert_eq!(&bytes[7..9], &[0, 7]);
        assert_eq!(EnvelopeHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_encode_decode() {
        let a = record(1, &[1, 2, 3]);
        let b = record(2, &[4; 10]);
        let bytes = encode(slot(), ReferenceId::new(1), [a.bytes(), b.bytes()]).unwrap();

        let envelope = Envelope::decode(&bytes).unwrap();
        assert_eq!(envelope.header.record_count, 2);
        assert_eq!(envelope.header.slot, slot());
        assert_eq!(envelope.header.root_reference, ReferenceId::new(1));
        assert_eq!(&bytes[envelope.records[0].clone()], a.bytes());
        assert_eq!(&bytes[envelope.records[1].clone()], b.bytes());
    }

    #[test]
    fn test_oversized_record_count_is_corrupt() {
        let header = EnvelopeHeader {
            record_count: 0xFF_FFFF,
            root_reference: ReferenceId::NONE,
            slot: slot(),
            total_size: EnvelopeHeader::SIZE as u32,
        };
        let mut bytes = Vec::new();
        header.serialize(&mut bytes);
        assert_eq!(EnvelopeHeader::from_bytes(&bytes).unwrap().record_count, 0xFF_FFFF);

        let err = Envelope::decode(&bytes).unwrap_err();
        assert!(err.is_corruption(), "{err}");
    }

    #[test]
    fn test_empty_envelope() {
        let bytes = encode(slot(), ReferenceId::NONE, std::iter::empty::<&[u8]>()).unwrap();
        assert_eq!(bytes.len(), EnvelopeHeader::SIZE);
        let envelope = Envelope::decode(&bytes).unwrap();
        assert!(envelope.records.is_empty());
        assert_eq!(envelope.header, EnvelopeHeader::empty(slot()));
    }

    #[test]
    fn test_count_mismatch_is_corrupt() {
        let a = record(1, &[1]);
        let mut bytes = encode(slot(), ReferenceId::NONE, [a.bytes()]).unwrap();
        bytes[6] = 2;
        assert!(Envelope::decode(&bytes).unwrap_err().is_corruption());

        bytes[6] = 0;
        assert!(Envelope::decode(&bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn test_bad_record_magic_is_corrupt() {
        let a = record(1, &[1]);
        let mut bytes = encode(slot(), ReferenceId::NONE, [a.bytes()]).unwrap();
        let magic = EnvelopeHeader::SIZE + bale_record::managed::offsets::MAGIC;
        bytes[magic] ^= 0xFF;
        assert!(Envelope::decode(&bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn test_wrong_tag_and_truncation() {
        let a = record(1, &[1]);
        let bytes = encode(slot(), ReferenceId::NONE, [a.bytes()]).unwrap();

        let mut wrong = bytes.clone();
        wrong[0] = 3;
        assert!(Envelope::decode(&wrong).unwrap_err().is_corruption());

        assert!(Envelope::decode(&bytes[..bytes.len() - 1]).unwrap_err().is_corruption());
        assert!(Envelope::decode(&bytes[..10]).unwrap_err().is_corruption());
    }
}
