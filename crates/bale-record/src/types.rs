//! Record type tags and flags.

use std::fmt;

use bale_common::constants::{
    INTRA_REFERENCE_TRAILER_SIZE, MAX_USER_TYPE_TAG, SERIAL_TRAILER_SIZE,
    TAG_ENVELOPE, TAG_LITERAL_ARRAY, TAG_REFERENCE, VERSION_TRAILER_SIZE,
};
use bale_common::error::{BaleError, BaleResult};

/// One-byte record type tag.
///
/// Tags `0..=254` are record types; `255` is the back-reference marker and
/// never names a record. Tags above [`MAX_USER_TYPE_TAG`] are reserved for
/// the format itself.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RecordType(u8);

impl RecordType {
    /// Literal integer array, the target of indirect fields.
    pub const LITERAL_ARRAY: Self = Self(TAG_LITERAL_ARRAY);

    /// Envelope wrapping a group of managed records.
    pub const ENVELOPE: Self = Self(TAG_ENVELOPE);

    /// Creates a record type, rejecting the reference marker tag.
    pub fn new(tag: u8) -> BaleResult<Self> {
        Self::from_u8(tag).ok_or_else(|| {
            BaleError::illegal_argument(format!("type tag {tag:#04x} is reserved"))
        })
    }

    /// Creates a record type from a raw tag, or `None` for the marker tag.
    #[inline]
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        if tag == TAG_REFERENCE {
            None
        } else {
            Some(Self(tag))
        }
    }

    /// Returns the raw tag.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns true for tags reserved by the format.
    #[inline]
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 > MAX_USER_TYPE_TAG
    }
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::LITERAL_ARRAY => write!(f, "RecordType(LITERAL_ARRAY)"),
            Self::ENVELOPE => write!(f, "RecordType(ENVELOPE)"),
            Self(tag) => write!(f, "RecordType({tag})"),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags::bitflags! {
    /// Flags stored in the second header byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u8 {
        /// Overlay that sets only some fields; see cascade merge.
        const INCOMPLETE = 0b0000_0001;
        /// Payload contains dynamic array regions.
        const VARIABLE_SIZE = 0b0000_0010;
        /// A 16-bit version counter trailer is present.
        const VERSIONING = 0b0000_0100;
        /// Kept resident when a controller clears memory.
        const PINNED = 0b0000_1000;
        /// The record owns or aliases sub-records.
        const HAS_SUBS = 0b0001_0000;
        /// A 1-byte intra-reference id trailer is present.
        const INTRA_REFERENCE = 0b0010_0000;
        /// Every mutating call is rejected.
        const IMMUTABLE = 0b0100_0000;
        /// A serialization trailer (magic + sub count) is present.
        const SERIALIZED = 0b1000_0000;
    }
}

impl RecordFlags {
    /// Flags that add bytes to the trailer.
    pub const TRAILERS: Self = Self::VERSIONING
        .union(Self::INTRA_REFERENCE)
        .union(Self::SERIALIZED);

    /// Number of trailer bytes these flags imply.
    #[must_use]
    pub const fn trailer_len(self) -> usize {
        let mut len = 0;
        if self.contains(Self::VERSIONING) {
            len += VERSION_TRAILER_SIZE;
        }
        if self.contains(Self::INTRA_REFERENCE) {
            len += INTRA_REFERENCE_TRAILER_SIZE;
        }
        if self.contains(Self::SERIALIZED) {
            len += SERIAL_TRAILER_SIZE;
        }
        len
    }

    /// Offset of the intra-reference byte relative to the payload end.
    #[must_use]
    pub(crate) const fn intra_reference_offset(self) -> usize {
        if self.contains(Self::VERSIONING) {
            VERSION_TRAILER_SIZE
        } else {
            0
        }
    }
}
