//! Agent registry and envelope header table.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bale_common::error::{BaleError, BaleResult};
use bale_common::types::{ControllerId, ReferenceId, StorageSlot};
use bale_record::{AgentLink, BufferHandle, ManagedHeader};

use crate::envelope::EnvelopeHeader;

/// Identifies an agent: its controller and registry slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentId {
    controller: ControllerId,
    slot: u32,
}

impl AgentId {
    pub(crate) fn new(controller: ControllerId, slot: usize) -> Self {
        Self {
            controller,
            slot: slot as u32,
        }
    }

    /// Returns the owning controller.
    pub fn controller(&self) -> ControllerId {
        self.controller
    }

    /// Returns the registry slot.
    pub fn slot(&self) -> usize {
        self.slot as usize
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({}:{})", self.controller, self.slot)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.controller, self.slot)
    }
}

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    /// Bytes are resident; no application object yet.
    Registered,
    /// A factory produced the application object.
    Instantiated,
    /// Bytes were dropped; only the header is kept.
    Unloaded,
}

impl AgentState {
    /// Returns true if the agent's bytes are resident.
    pub fn is_resident(self) -> bool {
        !matches!(self, Self::Unloaded)
    }
}

/// Registry entry of one agent.
pub(crate) struct AgentEntry {
    /// Position of the bytes; `None` while unloaded.
    pub at: Option<BufferHandle>,
    pub link: AgentLink,
    pub state: AgentState,
    /// Decoded header, refreshed after every change made through the
    /// controller and kept while unloaded.
    pub header: ManagedHeader,
    /// Index within the envelope it was last loaded from or saved to.
    pub position: Option<usize>,
    pub object: Option<Arc<dyn Any + Send + Sync>>,
}

impl AgentEntry {
    pub fn reference_id(&self) -> ReferenceId {
        self.header.reference_id
    }

    pub fn is_dirty(&self) -> bool {
        !self.link.synced
    }
}

impl fmt::Debug for AgentEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentEntry")
            .field("at", &self.at)
            .field("link", &self.link)
            .field("state", &self.state)
            .field("reference", &self.header.reference_id)
            .field("position", &self.position)
            .field("has_object", &self.object.is_some())
            .finish()
    }
}

/// Holed slot array of agents, growing by a fixed increment.
#[derive(Debug)]
pub(crate) struct Registry {
    slots: Vec<Option<AgentEntry>>,
    references: BTreeMap<ReferenceId, usize>,
    increment: usize,
    live: usize,
    /// No slot below this index is free.
    first_free: usize,
}

impl Registry {
    pub fn new(increment: usize) -> Self {
        Self {
            slots: Vec::new(),
            references: BTreeMap::new(),
            increment: increment.max(1),
            live: 0,
            first_free: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Stores an entry in the first free slot, growing when full.
    pub fn insert(&mut self, entry: AgentEntry) -> BaleResult<usize> {
        let reference = entry.reference_id();
        if self.references.contains_key(&reference) {
            return Err(BaleError::illegal_argument(format!(
                "reference id {reference} is already registered"
            )));
        }

        let hole = self.slots[self.first_free..]
            .iter()
            .position(Option::is_none)
            .map(|offset| self.first_free + offset);
        let slot = match hole {
            Some(slot) => slot,
            None => {
                let slot = self.slots.len();
                self.slots
                    .resize_with(slot + self.increment, || None);
                slot
            }
        };
        self.slots[slot] = Some(entry);
        self.references.insert(reference, slot);
        self.live += 1;
        self.first_free = slot + 1;
        Ok(slot)
    }

    pub fn remove(&mut self, slot: usize) -> Option<AgentEntry> {
        let entry = self.slots.get_mut(slot)?.take()?;
        self.references.remove(&entry.reference_id());
        self.live -= 1;
        self.first_free = self.first_free.min(slot);
        Some(entry)
    }

    pub fn get(&self, slot: usize) -> Option<&AgentEntry> {
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut AgentEntry> {
        self.slots.get_mut(slot)?.as_mut()
    }

    pub fn slot_of(&self, reference: ReferenceId) -> Option<usize> {
        self.references.get(&reference).copied()
    }

    pub fn contains_reference(&self, reference: ReferenceId) -> bool {
        self.references.contains_key(&reference)
    }

    /// Re-indexes an entry under a new reference id.
    pub fn rekey(&mut self, slot: usize, reference: ReferenceId) -> BaleResult<()> {
        if self.references.contains_key(&reference) {
            return Err(BaleError::illegal_argument(format!(
                "reference id {reference} is already registered"
            )));
        }
        let entry = self
            .slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or_else(|| BaleError::illegal_argument(format!("registry slot {slot} is empty")))?;
        self.references.remove(&entry.header.reference_id);
        entry.header.reference_id = reference;
        self.references.insert(reference, slot);
        Ok(())
    }

    /// Returns the lowest unused reference id at or after `start`, wrapping
    /// around once.
    pub fn free_reference(&self, start: ReferenceId) -> Option<ReferenceId> {
        let start = start.as_u16().max(1);
        (start..=u16::MAX)
            .chain(1..start)
            .map(ReferenceId::new)
            .find(|id| !self.references.contains_key(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &AgentEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|entry| (slot, entry)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut AgentEntry)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_mut().map(|entry| (slot, entry)))
    }

    /// Slots of the agents saved to `storage`, ordered by envelope position
    /// and then by registry slot.
    pub fn members(&self, storage: StorageSlot) -> Vec<usize> {
        let mut members: Vec<(usize, usize)> = self
            .iter()
            .filter(|(_, entry)| entry.link.storage == storage)
            .map(|(slot, entry)| (entry.position.unwrap_or(usize::MAX), slot))
            .collect();
        members.sort_unstable();
        members.into_iter().map(|(_, slot)| slot).collect()
    }
}

/// State of one (group, instance) envelope slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderEntry {
    /// Header of the envelope last loaded or saved.
    pub header: EnvelopeHeader,
    /// True once the slot's members were unloaded; the next load reattaches
    /// them.
    pub stub: bool,
}

/// Table of envelope headers keyed by storage slot; absent means the slot
/// was never loaded.
#[derive(Debug, Default)]
pub(crate) struct HeaderTable {
    entries: BTreeMap<StorageSlot, HeaderEntry>,
}

impl HeaderTable {
    pub fn get(&self, slot: StorageSlot) -> Option<HeaderEntry> {
        self.entries.get(&slot).copied()
    }

    pub fn is_loaded(&self, slot: StorageSlot) -> bool {
        self.entries.get(&slot).is_some_and(|entry| !entry.stub)
    }

    pub fn set_loaded(&mut self, header: EnvelopeHeader) {
        self.entries
            .insert(header.slot, HeaderEntry { header, stub: false });
    }

    pub fn set_stub(&mut self, slot: StorageSlot) {
        if let Some(entry) = self.entries.get_mut(&slot) {
            entry.stub = true;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StorageSlot, &HeaderEntry)> {
        self.entries.iter()
    }
}
