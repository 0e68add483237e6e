//! Wire-format constants for Bale.
//!
//! Every multi-byte quantity on the wire is big-endian. The sizes below are
//! part of the on-disk format and must never change between versions.

// =============================================================================
// Base Record Header
// =============================================================================

/// Size of the base record header: `[type:1][flags:1][length:2]`.
pub const RECORD_HEADER_SIZE: usize = 4;

/// Largest length a plain record may declare in its 2-byte length field.
pub const MAX_RECORD_LENGTH: usize = 0xFFFE;

/// Length-field sentinel meaning "the authoritative length lives elsewhere".
///
/// Managed records and envelopes carry a 4-byte total length and store this
/// sentinel when the total does not fit in 16 bits.
pub const LENGTH_EXTENDED: u16 = 0xFFFF;

// =============================================================================
// Reserved Type Tags
// =============================================================================

/// Highest type tag an application record may use.
pub const MAX_USER_TYPE_TAG: u8 = 0xF0;

/// Tag of a literal integer array record (target of indirect fields).
pub const TAG_LITERAL_ARRAY: u8 = 0xFC;

/// Tag of the envelope record exchanged with storage sources.
pub const TAG_ENVELOPE: u8 = 0xFE;

/// Tag of the 5-byte back-reference marker emitted during flattening.
///
/// Never a valid record type: type tags span `0..=254`.
pub const TAG_REFERENCE: u8 = 0xFF;

// =============================================================================
// Trailers
// =============================================================================

/// Size of the version counter trailer.
pub const VERSION_TRAILER_SIZE: usize = 2;

/// Size of the intra-reference id trailer.
pub const INTRA_REFERENCE_TRAILER_SIZE: usize = 1;

/// Size of the serialization trailer: `[magic:1][sub_count:2]`.
pub const SERIAL_TRAILER_SIZE: usize = 3;

/// Magic byte opening a serialization trailer.
pub const SERIAL_MAGIC: u8 = 0xB5;

/// Size of a back-reference marker: `[TAG_REFERENCE][index:4]`.
pub const REFERENCE_MARKER_SIZE: usize = 5;

/// Size of a dynamic array region prefix: `[count:2][width:1]`.
pub const ARRAY_PREFIX_SIZE: usize = 3;

/// High bit of an indirect field; set means "sub-record index follows".
pub const INDIRECT_POINTER_BIT: u16 = 0x8000;

// =============================================================================
// Managed Records
// =============================================================================

/// Size of the managed static header, including the base header.
///
/// Layout after the base header: interface (2), class (2), group (2),
/// instance (2), reference (2), control group (2), dynamic header length (2),
/// static header length (2), data length (4), buffer length (4),
/// total length (4), magic (4).
pub const MANAGED_STATIC_HEADER_SIZE: usize = 36;

/// Magic word closing every managed static header ("BALE").
pub const MANAGED_MAGIC: u32 = 0x4241_4C45;

// =============================================================================
// Envelopes
// =============================================================================

/// Size of the envelope header.
///
/// `[base header:4][record_count:3][root_reference:2][group:2][instance:2][total_size:4]`
pub const ENVELOPE_HEADER_SIZE: usize = 17;

/// Largest record count representable in the 3-byte count field.
pub const MAX_ENVELOPE_RECORDS: usize = 0x00FF_FFFF;

// =============================================================================
// Controller Defaults
// =============================================================================

/// Default number of registry slots added when the registry is full.
pub const DEFAULT_REGISTRY_INCREMENT: usize = 16;

/// Default number of bytes read when probing an envelope header.
pub const DEFAULT_HEADER_PROBE: usize = 64;
