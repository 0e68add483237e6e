//! Indirect small-value-or-pointer fields.
//!
//! A 2-byte field holds a literal when its high bit is clear. With the high
//! bit set, the low 15 bits index the record's sub-record list at a literal
//! integer array. One field width serves both the single-value and the
//! multi-value case.

use bale_common::constants::INDIRECT_POINTER_BIT;
use bale_common::error::{BaleError, BaleResult};

use crate::store::{RecordId, RecordStore};
use crate::types::RecordType;

const INDIRECT_WIDTH: usize = 2;

/// Decoded indirect field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectValue {
    /// Inline value in `0..=0x7FFF`.
    Literal(u16),
    /// Literal array sub-record.
    Array(RecordId),
}

fn pointer_index(raw: u16) -> Option<usize> {
    if raw & INDIRECT_POINTER_BIT != 0 {
        Some((raw & !INDIRECT_POINTER_BIT) as usize)
    } else {
        None
    }
}

impl RecordStore {
    /// Decodes the indirect field at payload offset `offset`.
    ///
    /// A pointer past the sub-record list is corrupt; a pointer at anything
    /// but a literal array is rejected.
    pub fn indirect(&self, id: RecordId, offset: usize) -> BaleResult<IndirectValue> {
        let record = self.view(id)?;
        let raw = record.read_uint(offset, INDIRECT_WIDTH)? as u16;
        let Some(index) = pointer_index(raw) else {
            return Ok(IndirectValue::Literal(raw));
        };
        let target = record.subs().get(index).map(|link| link.id).ok_or_else(|| {
            BaleError::corrupt_data(format!(
                "indirect field at {offset} of record {id} points at missing sub-record {index}"
            ))
        })?;
        let target_type = self.header(target)?.record_type;
        if target_type != RecordType::LITERAL_ARRAY {
            return Err(BaleError::illegal_argument(format!(
                "indirect field at {offset} of record {id} points at a {target_type:?}"
            )));
        }
        Ok(IndirectValue::Array(target))
    }

    /// Reads every value the indirect field at `offset` stands for.
    pub fn indirect_values(&self, id: RecordId, offset: usize) -> BaleResult<Vec<i32>> {
        match self.indirect(id, offset)? {
            IndirectValue::Literal(value) => Ok(vec![i32::from(value)]),
            IndirectValue::Array(target) => self.read_array(target, 0),
        }
    }

    /// Stores `values` in the indirect field at `offset`.
    ///
    /// A single value in `0..=0x7FFF` is stored inline. Anything else goes
    /// into a literal array sub-record; if the field already points at one,
    /// that link is replaced rather than a new one appended.
    pub fn set_indirect(&mut self, id: RecordId, offset: usize, values: &[i32]) -> BaleResult<()> {
        if let [value] = values {
            if let Ok(literal) = u16::try_from(*value) {
                if literal & INDIRECT_POINTER_BIT == 0 {
                    self.view_mut(id)?
                        .write_uint(offset, INDIRECT_WIDTH, u32::from(literal))?;
                    return Ok(());
                }
            }
        }

        self.check_mutable(id)?;
        let existing = match self.indirect(id, offset) {
            Ok(IndirectValue::Array(_)) => {
                let raw = self.view(id)?.read_uint(offset, INDIRECT_WIDTH)? as u16;
                pointer_index(raw)
            }
            Ok(IndirectValue::Literal(_)) => None,
            Err(err) if err.is_corruption() => None,
            Err(err) => return Err(err),
        };

        let array = self.create_literal_array(values)?;
        let index = match existing {
            Some(index) => {
                self.replace_sub(id, index, array)?;
                index
            }
            None => self.add_sub(id, array)?,
        };
        let index = u16::try_from(index)
            .ok()
            .filter(|index| index & INDIRECT_POINTER_BIT == 0)
            .ok_or_else(|| {
                BaleError::illegal_argument(format!(
                    "sub-record index {index} cannot be addressed by an indirect field"
                ))
            })?;
        self.view_mut(id)?.write_uint(
            offset,
            INDIRECT_WIDTH,
            u32::from(INDIRECT_POINTER_BIT | index),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(store: &mut RecordStore) -> RecordId {
        store.create(RecordType::new(12).unwrap(), 4).unwrap()
    }

    #[test]
    fn test_literal_inline() {
        let mut store = RecordStore::new();
        let id = record(&mut store);
        store.set_indirect(id, 0, &[42]).unwrap();
        assert_eq!(store.indirect(id, 0).unwrap(), IndirectValue::Literal(42));
        assert_eq!(store.indirect_values(id, 0).unwrap(), vec![42]);
        assert!(store.subs(id).unwrap().is_empty());
    }

    #[test]
    fn test_multiple_values_use_sub_record() {
        let mut store = RecordStore::new();
        let id = record(&mut store);
        store.set_indirect(id, 2, &[1, 2, 3]).unwrap();
        assert!(matches!(store.indirect(id, 2).unwrap(), IndirectValue::Array(_)));
        assert_eq!(store.view(id).unwrap().read_uint(2, 2).unwrap(), 0x8000);
        assert_eq!(store.indirect_values(id, 2).unwrap(), vec![1, 2, 3]);

        store.set_indirect(id, 2, &[-7, 9]).unwrap();
        assert_eq!(store.subs(id).unwrap().len(), 1);
        assert_eq!(store.indirect_values(id, 2).unwrap(), vec![-7, 9]);
    }

    #[test]
    fn test_negative_single_value_uses_array() {
        let mut store = RecordStore::new();
        let id = record(&mut store);
        store.set_indirect(id, 0, &[-1]).unwrap();
        assert_eq!(store.indirect_values(id, 0).unwrap(), vec![-1]);
    }

    #[test]
    fn test_dangling_pointer_is_corrupt() {
        let mut store = RecordStore::new();
        let id = record(&mut store);
        store.view_mut(id).unwrap().write_uint(0, 2, 0x8003).unwrap();
        assert!(store.indirect(id, 0).unwrap_err().is_corruption());
    }

    #[test]
    fn test_pointer_at_wrong_type() {
        let mut store = RecordStore::new();
        let id = record(&mut store);
        let other = store.create(RecordType::new(3).unwrap(), 0).unwrap();
        store.add_sub(id, other).unwrap();
        store.view_mut(id).unwrap().write_uint(0, 2, 0x8000).unwrap();
        assert!(matches!(
            store.indirect(id, 0).unwrap_err(),
            BaleError::IllegalArgument { .. }
        ));
    }
}
