//! Arena of growable byte buffers.
//!
//! Records never hold raw pointers into their backing bytes. They hold a
//! [`BufferHandle`]: the id of an arena slot plus an offset into it. When a
//! slot is reallocated its generation changes, and whoever owns handles into
//! it patches their offsets; the handle itself stays a plain index.
//!
//! Each slot counts its occupants (records living in it). A slot whose last
//! occupant leaves is freed and its id recycled under a new generation.

use std::fmt;

use bale_common::error::{BaleError, BaleResult};

/// Identifier of an arena slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BufferId(u32);

impl BufferId {
    /// Returns the raw slot index.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferId({})", self.0)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a record: arena slot plus byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    /// Slot holding the bytes.
    pub buffer: BufferId,
    /// Offset of the first record byte within the slot.
    pub offset: usize,
}

impl BufferHandle {
    /// Creates a handle.
    #[inline]
    #[must_use]
    pub const fn new(buffer: BufferId, offset: usize) -> Self {
        Self { buffer, offset }
    }
}

/// Identity of a physical allocation: a slot and the generation of its
/// current bytes.
///
/// Two observations with equal identity saw the same allocation; any
/// reallocation of the slot changes the generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackingIdentity {
    /// Slot id.
    pub buffer: BufferId,
    /// Generation of the slot's bytes.
    pub generation: u64,
}

#[derive(Debug)]
struct BufferSlot {
    bytes: Vec<u8>,
    generation: u64,
    occupants: u32,
}

/// Arena of growable byte buffers addressed by [`BufferId`].
#[derive(Debug, Default)]
pub struct BufferArena {
    slots: Vec<Option<BufferSlot>>,
    free: Vec<u32>,
    next_generation: u64,
}

impl BufferArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Stores `bytes` in a fresh slot with no occupants.
    pub fn insert(&mut self, bytes: Vec<u8>) -> BufferId {
        let generation = self.bump_generation();
        let slot = BufferSlot {
            bytes,
            generation,
            occupants: 0,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                BufferId(index)
            }
            None => {
                self.slots.push(Some(slot));
                BufferId((self.slots.len() - 1) as u32)
            }
        }
    }

    fn slot(&self, id: BufferId) -> BaleResult<&BufferSlot> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| BaleError::illegal_state(format!("buffer {id} is not live")))
    }

    fn slot_mut(&mut self, id: BufferId) -> BaleResult<&mut BufferSlot> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| BaleError::illegal_state(format!("buffer {id} is not live")))
    }

    /// Returns true if `id` names a live slot.
    #[must_use]
    pub fn contains(&self, id: BufferId) -> bool {
        self.slot(id).is_ok()
    }

    /// Returns the bytes of a slot.
    pub fn bytes(&self, id: BufferId) -> BaleResult<&[u8]> {
        Ok(&self.slot(id)?.bytes)
    }

    /// Returns the bytes of a slot for in-place writes.
    ///
    /// The length cannot change through this borrow; use [`Self::splice`].
    pub fn bytes_mut(&mut self, id: BufferId) -> BaleResult<&mut [u8]> {
        Ok(&mut self.slot_mut(id)?.bytes)
    }

    /// Returns `len` bytes starting at `handle`.
    pub fn region(&self, handle: BufferHandle, len: usize) -> BaleResult<&[u8]> {
        let bytes = self.bytes(handle.buffer)?;
        bytes
            .get(handle.offset..handle.offset + len)
            .ok_or_else(|| region_error(handle, len, bytes.len()))
    }

    /// Returns `len` mutable bytes starting at `handle`.
    pub fn region_mut(&mut self, handle: BufferHandle, len: usize) -> BaleResult<&mut [u8]> {
        let bytes = &mut self.slot_mut(handle.buffer)?.bytes;
        let available = bytes.len();
        bytes
            .get_mut(handle.offset..handle.offset + len)
            .ok_or_else(|| region_error(handle, len, available))
    }

    /// Returns the identity of a slot's current allocation.
    pub fn identity(&self, id: BufferId) -> BaleResult<BackingIdentity> {
        Ok(BackingIdentity {
            buffer: id,
            generation: self.slot(id)?.generation,
        })
    }

    /// Returns the number of records living in a slot.
    pub fn occupants(&self, id: BufferId) -> BaleResult<u32> {
        Ok(self.slot(id)?.occupants)
    }

    /// Registers one more occupant of a slot.
    pub fn retain(&mut self, id: BufferId) -> BaleResult<()> {
        self.slot_mut(id)?.occupants += 1;
        Ok(())
    }

    /// Drops one occupant; frees the slot when none remain.
    ///
    /// Returns true if the slot was freed.
    pub fn release(&mut self, id: BufferId) -> BaleResult<bool> {
        let slot = self.slot_mut(id)?;
        slot.occupants = slot.occupants.saturating_sub(1);
        if slot.occupants == 0 {
            self.remove(id);
            return Ok(true);
        }
        Ok(false)
    }

    /// Frees a slot regardless of occupants, returning its bytes.
    pub fn remove(&mut self, id: BufferId) -> Option<Vec<u8>> {
        let slot = self.slots.get_mut(id.index())?.take()?;
        self.free.push(id.0);
        Some(slot.bytes)
    }

    /// Replaces `remove` bytes at `at` with `insert` zero bytes.
    ///
    /// The slot keeps its id but gets a new generation; handles of other
    /// occupants past `at` must be patched by the caller.
    pub fn splice(&mut self, id: BufferId, at: usize, remove: usize, insert: usize) -> BaleResult<()> {
        let generation = self.bump_generation();
        let slot = self.slot_mut(id)?;
        let end = at
            .checked_add(remove)
            .filter(|end| *end <= slot.bytes.len())
            .ok_or_else(|| {
                BaleError::illegal_argument(format!(
                    "splice {at}+{remove} outside {}-byte buffer",
                    slot.bytes.len()
                ))
            })?;
        slot.bytes
            .splice(at..end, std::iter::repeat(0u8).take(insert));
        slot.generation = generation;
        Ok(())
    }

    /// Returns the number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if no slot is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the total bytes held by live slots.
    #[must_use]
    pub fn resident_bytes(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.bytes.len())
            .sum()
    }
}

fn region_error(handle: BufferHandle, len: usize, available: usize) -> BaleError {
    BaleError::illegal_state(format!(
        "region {}+{len} outside {available}-byte buffer {}",
        handle.offset, handle.buffer
    ))
}
