//! Dynamic array regions.
//!
//! A dynamic array region is `[count:2][width:1][count × width bytes]`.
//! Elements are sign-magnitude integers of the declared width. A zeroed
//! region (`count = 0`, `width = 0`) is a valid empty array, so freshly
//! created payloads read as empty arrays.

use bale_common::constants::ARRAY_PREFIX_SIZE;
use bale_common::error::{BaleError, BaleResult};

use crate::field;

/// Decoded prefix of a dynamic array region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayPrefix {
    /// Number of elements.
    pub count: u16,
    /// Width of each element in bytes.
    pub width: u8,
}

impl ArrayPrefix {
    /// Total bytes of the region this prefix describes.
    #[inline]
    #[must_use]
    pub fn region_len(&self) -> usize {
        ARRAY_PREFIX_SIZE + self.count as usize * self.width as usize
    }
}

/// Reads the region prefix at `offset`.
pub fn read_prefix(buf: &[u8], offset: usize) -> BaleResult<ArrayPrefix> {
    let count = field::read_uint(buf, offset, 2)? as u16;
    let width = field::read_uint(buf, offset + 2, 1)? as u8;
    if count > 0 {
        field::check_width(width as usize)?;
    }
    Ok(ArrayPrefix { count, width })
}

/// Returns the number of bytes the region at `offset` occupies.
pub fn region_len(buf: &[u8], offset: usize) -> BaleResult<usize> {
    let prefix = read_prefix(buf, offset)?;
    let len = prefix.region_len();
    if offset + len > buf.len() {
        return Err(BaleError::corrupt_data(format!(
            "array region of {len} bytes at {offset} overruns {}-byte payload",
            buf.len()
        )));
    }
    Ok(len)
}

/// Reads every element of the region at `offset`.
pub fn read(buf: &[u8], offset: usize) -> BaleResult<Vec<i32>> {
    let prefix = read_prefix(buf, offset)?;
    region_len(buf, offset)?;
    let width = prefix.width as usize;
    let start = offset + ARRAY_PREFIX_SIZE;
    (0..prefix.count as usize)
        .map(|i| field::read_int(buf, start + i * width, width))
        .collect()
}

/// Reads element `index` of the region at `offset`.
pub fn get(buf: &[u8], offset: usize, index: usize) -> BaleResult<i32> {
    let prefix = read_prefix(buf, offset)?;
    if index >= prefix.count as usize {
        return Err(BaleError::illegal_argument(format!(
            "array index {index} out of range 0..{}",
            prefix.count
        )));
    }
    let width = prefix.width as usize;
    field::read_int(buf, offset + ARRAY_PREFIX_SIZE + index * width, width)
}

/// Smallest element width that holds every value.
#[must_use]
pub fn min_width(values: &[i32]) -> usize {
    values
        .iter()
        .map(|v| field::int_width(*v))
        .max()
        .unwrap_or(field::MIN_FIELD_WIDTH)
}

/// Bytes needed to encode `count` elements of `width` bytes.
#[inline]
#[must_use]
pub fn encoded_len(count: usize, width: usize) -> usize {
    ARRAY_PREFIX_SIZE + count * width
}

/// Writes a region at `offset`; the slice must have room for
/// `encoded_len(values.len(), width)` bytes.
pub fn write(buf: &mut [u8], offset: usize, values: &[i32], width: usize) -> BaleResult<()> {
    field::check_width(width)?;
    let count = u16::try_from(values.len()).map_err(|_| {
        BaleError::illegal_argument(format!("array of {} elements too long", values.len()))
    })?;
    field::write_uint(buf, offset, 2, u32::from(count))?;
    field::write_uint(buf, offset + 2, 1, width as u32)?;
    let start = offset + ARRAY_PREFIX_SIZE;
    for (i, value) in values.iter().enumerate() {
        field::write_int(buf, start + i * width, width, *value)?;
    }
    Ok(())
}
