//! Fixed-width field codecs.
//!
//! Fields are addressed by caller-supplied byte offsets into a slice and are
//! big-endian. Signed fields use sign-magnitude: the high bit of the field
//! holds the sign and the remaining bits the magnitude, so a 1-byte field
//! spans `-127..=127`.
//!
//! Packed flag accessors split a byte into four 2-bit lanes or two 4-bit
//! lanes; lane 0 is the most significant.

use std::ops::Range;

use bale_common::error::{BaleError, BaleResult};

/// Smallest supported field width in bytes.
pub const MIN_FIELD_WIDTH: usize = 1;

/// Largest supported field width in bytes.
pub const MAX_FIELD_WIDTH: usize = 4;

/// Rejects widths outside `1..=4`.
#[inline]
pub fn check_width(width: usize) -> BaleResult<()> {
    if (MIN_FIELD_WIDTH..=MAX_FIELD_WIDTH).contains(&width) {
        Ok(())
    } else {
        Err(BaleError::unsupported(format!("field width {width}")))
    }
}

fn field_range(len: usize, offset: usize, width: usize) -> BaleResult<Range<usize>> {
    let end = offset
        .checked_add(width)
        .filter(|end| *end <= len)
        .ok_or_else(|| {
            BaleError::illegal_argument(format!(
                "field at {offset} of width {width} outside {len}-byte region"
            ))
        })?;
    Ok(offset..end)
}

/// Largest unsigned value a field of `width` bytes holds.
#[inline]
#[must_use]
pub const fn max_unsigned(width: usize) -> u32 {
    if width >= 4 {
        u32::MAX
    } else {
        (1u32 << (width * 8)) - 1
    }
}

/// Largest magnitude a signed field of `width` bytes holds.
#[inline]
#[must_use]
pub const fn max_magnitude(width: usize) -> u32 {
    (1u32 << (width * 8 - 1)) - 1
}

/// Reads an unsigned big-endian field.
pub fn read_uint(buf: &[u8], offset: usize, width: usize) -> BaleResult<u32> {
    check_width(width)?;
    let range = field_range(buf.len(), offset, width)?;
    Ok(buf[range]
        .iter()
        .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte)))
}

/// Writes an unsigned big-endian field.
pub fn write_uint(buf: &mut [u8], offset: usize, width: usize, value: u32) -> BaleResult<()> {
    check_width(width)?;
    if value > max_unsigned(width) {
        return Err(BaleError::illegal_argument(format!(
            "value {value} does not fit in {width} bytes"
        )));
    }
    let range = field_range(buf.len(), offset, width)?;
    let bytes = value.to_be_bytes();
    buf[range].copy_from_slice(&bytes[4 - width..]);
    Ok(())
}

/// Reads a sign-magnitude field.
pub fn read_int(buf: &[u8], offset: usize, width: usize) -> BaleResult<i32> {
    let raw = read_uint(buf, offset, width)?;
    let sign_bit = 1u32 << (width * 8 - 1);
    let magnitude = (raw & !sign_bit) as i32;
    Ok(if raw & sign_bit != 0 { -magnitude } else { magnitude })
}

/// Writes a sign-magnitude field.
pub fn write_int(buf: &mut [u8], offset: usize, width: usize, value: i32) -> BaleResult<()> {
    check_width(width)?;
    let magnitude = value.unsigned_abs();
    if magnitude > max_magnitude(width) {
        return Err(BaleError::illegal_argument(format!(
            "value {value} does not fit in a {width}-byte signed field"
        )));
    }
    let sign = if value < 0 { 1u32 << (width * 8 - 1) } else { 0 };
    write_uint(buf, offset, width, sign | magnitude)
}

/// Returns the smallest width in bytes that holds `value` as sign-magnitude.
#[must_use]
pub fn int_width(value: i32) -> usize {
    let magnitude = value.unsigned_abs();
    (MIN_FIELD_WIDTH..=MAX_FIELD_WIDTH)
        .find(|width| magnitude <= max_magnitude(*width))
        .unwrap_or(MAX_FIELD_WIDTH)
}

fn lane(buf_len: usize, offset: usize, index: usize, lanes: usize) -> BaleResult<(usize, u32)> {
    if index >= lanes {
        return Err(BaleError::illegal_argument(format!(
            "lane {index} out of range 0..{lanes}"
        )));
    }
    field_range(buf_len, offset, 1)?;
    let bits = 8 / lanes;
    Ok((offset, (8 - bits * (index + 1)) as u32))
}

/// Reads a 2-bit lane (`index` in `0..4`).
pub fn read_bits2(buf: &[u8], offset: usize, index: usize) -> BaleResult<u8> {
    let (at, shift) = lane(buf.len(), offset, index, 4)?;
    Ok((buf[at] >> shift) & 0b11)
}

/// Writes a 2-bit lane (`index` in `0..4`, `value` in `0..4`).
pub fn write_bits2(buf: &mut [u8], offset: usize, index: usize, value: u8) -> BaleResult<()> {
    if value > 0b11 {
        return Err(BaleError::illegal_argument(format!(
            "value {value} does not fit in 2 bits"
        )));
    }
    let (at, shift) = lane(buf.len(), offset, index, 4)?;
    buf[at] = (buf[at] & !(0b11 << shift)) | (value << shift);
    Ok(())
}

/// Reads a 4-bit lane (`index` in `0..2`).
pub fn read_nibble(buf: &[u8], offset: usize, index: usize) -> BaleResult<u8> {
    let (at, shift) = lane(buf.len(), offset, index, 2)?;
    Ok((buf[at] >> shift) & 0x0F)
}

/// Writes a 4-bit lane (`index` in `0..2`, `value` in `0..16`).
pub fn write_nibble(buf: &mut [u8], offset: usize, index: usize, value: u8) -> BaleResult<()> {
    if value > 0x0F {
        return Err(BaleError::illegal_argument(format!(
            "value {value} does not fit in 4 bits"
        )));
    }
    let (at, shift) = lane(buf.len(), offset, index, 2)?;
    buf[at] = (buf[at] & !(0x0F << shift)) | (value << shift);
    Ok(())
}

/// Reads `len` raw bytes.
pub fn read_bytes(buf: &[u8], offset: usize, len: usize) -> BaleResult<&[u8]> {
    let range = field_range(buf.len(), offset, len)?;
    Ok(&buf[range])
}

/// Writes raw bytes.
pub fn write_bytes(buf: &mut [u8], offset: usize, bytes: &[u8]) -> BaleResult<()> {
    let range = field_range(buf.len(), offset, bytes.len())?;
    buf[range].copy_from_slice(bytes);
    Ok(())
}
