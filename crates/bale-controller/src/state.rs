//! Mutable state of a controller: arena, registry and header table.
//!
//! Everything here runs under the controller's state lock.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, warn};

use bale_common::config::ExpansionPolicy;
use bale_common::error::{BaleError, BaleResult};
use bale_common::types::{ControllerId, ReferenceId, StorageSlot};
use bale_record::{
    AgentLink, BufferArena, BufferHandle, ManagedHeader, ManagedView, ManagedViewMut, RecordFlags,
};

use crate::envelope::{self, Envelope, EnvelopeHeader};
use crate::registry::{AgentEntry, AgentId, AgentState, HeaderTable, Registry};

/// Outcome of attaching one envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Attached {
    pub added: usize,
    pub matched: usize,
    pub kept: usize,
}

enum Placement {
    New,
    Matched(usize),
    Kept(usize),
}

pub(crate) struct ControllerState {
    id: ControllerId,
    pub arena: BufferArena,
    pub registry: Registry,
    pub headers: HeaderTable,
    root: Option<usize>,
    root_flagged: bool,
    next_reference: ReferenceId,
    /// Slots whose stored envelope no longer matches the registry even
    /// though no resident member is dirty.
    pub stale: BTreeSet<StorageSlot>,
}

impl ControllerState {
    pub fn new(id: ControllerId, registry_increment: usize) -> Self {
        Self {
            id,
            arena: BufferArena::new(),
            registry: Registry::new(registry_increment),
            headers: HeaderTable::default(),
            root: None,
            root_flagged: false,
            next_reference: ReferenceId::new(1),
            stale: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> Option<usize> {
        self.root
    }

    fn check(&self, id: AgentId) -> BaleResult<usize> {
        if id.controller() != self.id {
            return Err(BaleError::illegal_state(format!(
                "agent {id} belongs to controller {}, not {}",
                id.controller(),
                self.id
            )));
        }
        if self.registry.get(id.slot()).is_none() {
            return Err(BaleError::illegal_argument(format!("no agent at {id}")));
        }
        Ok(id.slot())
    }

    pub fn entry(&self, id: AgentId) -> BaleResult<&AgentEntry> {
        let slot = self.check(id)?;
        self.registry
            .get(slot)
            .ok_or_else(|| BaleError::illegal_argument(format!("no agent at {id}")))
    }

    pub fn entry_mut(&mut self, id: AgentId) -> BaleResult<&mut AgentEntry> {
        let slot = self.check(id)?;
        self.registry
            .get_mut(slot)
            .ok_or_else(|| BaleError::illegal_argument(format!("no agent at {id}")))
    }

    pub(crate) fn resident_at(&self, id: AgentId) -> BaleResult<(BufferHandle, ManagedHeader)> {
        let entry = self.entry(id)?;
        let at = entry.at.ok_or_else(|| {
            BaleError::illegal_state(format!("agent {id} is unloaded"))
        })?;
        Ok((at, entry.header))
    }

    /// Returns the complete bytes of a resident agent.
    pub fn bytes(&self, id: AgentId) -> BaleResult<&[u8]> {
        let (at, header) = self.resident_at(id)?;
        self.arena.region(at, header.total_length as usize)
    }

    pub fn view(&self, id: AgentId) -> BaleResult<ManagedView<'_>> {
        ManagedView::new(self.bytes(id)?)
    }

    /// Runs `f` over a write view of a resident, mutable agent and marks it
    /// dirty.
    ///
    /// Identity fields cannot change through this path.
    pub fn write<R>(
        &mut self,
        id: AgentId,
        f: impl FnOnce(&mut ManagedViewMut<'_>) -> BaleResult<R>,
    ) -> BaleResult<R> {
        let (at, header) = self.resident_at(id)?;
        if header.flags.contains(RecordFlags::IMMUTABLE) {
            return Err(BaleError::illegal_state(format!("agent {id} is immutable")));
        }
        let region = self.arena.region_mut(at, header.total_length as usize)?;
        let mut view = ManagedViewMut::new(region)?;
        let result = f(&mut view)?;
        let updated = *view.header();
        if updated.reference_id != header.reference_id || updated.storage() != header.storage() {
            return Err(BaleError::illegal_state(format!(
                "identity of agent {id} changed outside the controller"
            )));
        }

        let entry = self.entry_mut(id)?;
        entry.header = updated;
        entry.link.synced = false;
        Ok(result)
    }

    /// Sets or clears a flag of a resident agent. Immutability is one-way.
    pub fn set_flag(&mut self, id: AgentId, flag: RecordFlags, on: bool) -> BaleResult<()> {
        let (at, header) = self.resident_at(id)?;
        if header.flags.contains(flag) == on {
            return Ok(());
        }
        if flag.contains(RecordFlags::IMMUTABLE) && !on {
            return Err(BaleError::illegal_state(format!("agent {id} is immutable")));
        }
        let region = self.arena.region_mut(at, header.total_length as usize)?;
        let mut view = ManagedViewMut::new(region)?;
        view.set_flag(flag, on)?;
        let updated = *view.header();

        let entry = self.entry_mut(id)?;
        entry.header = updated;
        entry.link.synced = false;
        Ok(())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers the record at `at`, assigning a reference id when it has
    /// none (or, with `remap`, when its id is taken).
    pub fn register(
        &mut self,
        at: BufferHandle,
        link: AgentLink,
        position: Option<usize>,
        remap: bool,
    ) -> BaleResult<usize> {
        if let Some(owner) = link.controller {
            return Err(BaleError::illegal_state(format!(
                "record is already registered with controller {owner}"
            )));
        }

        let total = ManagedHeader::peek_total(self.arena.region(at, ManagedHeader::SIZE)?)?;
        let mut header = *ManagedView::new(self.arena.region(at, total)?)?.header();
        let mut renamed = false;
        let taken = self.registry.contains_reference(header.reference_id);
        if !header.reference_id.is_valid() || (remap && taken) {
            let reference = self
                .registry
                .free_reference(self.next_reference)
                .ok_or_else(|| BaleError::illegal_state("reference ids exhausted"))?;
            ManagedViewMut::new(self.arena.region_mut(at, total)?)?.set_reference_id(reference);
            if header.reference_id.is_valid() {
                debug!(from = %header.reference_id, to = %reference, "reference id remapped");
            }
            header.reference_id = reference;
            renamed = true;
        }

        let entry = AgentEntry {
            at: Some(at),
            link: AgentLink {
                controller: Some(self.id),
                slot: None,
                storage: header.storage(),
                locked: false,
                synced: link.synced && !renamed,
                root: false,
            },
            state: AgentState::Registered,
            header,
            position,
            object: None,
        };
        let slot = self.registry.insert(entry)?;
        self.arena.retain(at.buffer)?;
        if let Some(entry) = self.registry.get_mut(slot) {
            entry.link.slot = Some(slot);
        }
        self.next_reference = header
            .reference_id
            .next()
            .unwrap_or(ReferenceId::new(1));
        self.designate_root(slot, link.root);

        debug!(
            controller = %self.id,
            slot,
            reference = %header.reference_id,
            storage = %header.storage(),
            "agent registered"
        );
        Ok(slot)
    }

    /// Registers a record owning `bytes` in a private buffer.
    pub fn adopt(&mut self, bytes: Vec<u8>, link: AgentLink, remap: bool) -> BaleResult<usize> {
        let buffer = self.arena.insert(bytes);
        match self.register(BufferHandle::new(buffer, 0), link, None, remap) {
            Ok(slot) => Ok(slot),
            Err(err) => {
                self.arena.remove(buffer);
                Err(err)
            }
        }
    }

    fn designate_root(&mut self, slot: usize, flagged: bool) {
        if flagged && !self.root_flagged {
            if let Some(previous) = self.root.and_then(|root| self.registry.get_mut(root)) {
                previous.link.root = false;
            }
            self.root = Some(slot);
            self.root_flagged = true;
        } else if self.root.is_none() {
            self.root = Some(slot);
        }
        if self.root == Some(slot) {
            if let Some(entry) = self.registry.get_mut(slot) {
                entry.link.root = true;
            }
        }
    }

    fn forget_root(&mut self, slot: usize) {
        if self.root != Some(slot) {
            return;
        }
        self.root = self.registry.iter().next().map(|(slot, _)| slot);
        self.root_flagged = false;
        if let Some(entry) = self.root.and_then(|root| self.registry.get_mut(root)) {
            entry.link.root = true;
        }
    }

    /// Removes an agent, returning its bytes.
    pub fn remove(&mut self, id: AgentId) -> BaleResult<Vec<u8>> {
        let entry = self.entry(id)?;
        if entry.link.locked {
            return Err(BaleError::illegal_state(format!("agent {id} is locked")));
        }
        let bytes = self.bytes(id)?.to_vec();
        let slot = id.slot();
        let entry = self
            .registry
            .remove(slot)
            .ok_or_else(|| BaleError::illegal_argument(format!("no agent at {id}")))?;
        if let Some(at) = entry.at {
            self.arena.release(at.buffer)?;
        }
        self.stale.insert(entry.link.storage);
        self.forget_root(slot);
        debug!(controller = %self.id, slot, reference = %entry.header.reference_id, "agent removed");
        Ok(bytes)
    }

    /// Marks every member of `storage` dirty.
    pub fn touch_slot(&mut self, storage: StorageSlot) {
        for slot in self.registry.members(storage) {
            if let Some(entry) = self.registry.get_mut(slot) {
                entry.link.synced = false;
            }
        }
        self.stale.insert(storage);
    }

    /// Moves an agent to another storage slot.
    pub fn relocate(&mut self, id: AgentId, to: StorageSlot) -> BaleResult<StorageSlot> {
        let (at, header) = self.resident_at(id)?;
        let from = header.storage();
        if from == to {
            return Ok(from);
        }
        let mut view = ManagedViewMut::new(self.arena.region_mut(at, header.total_length as usize)?)?;
        view.set_group_id(to.group);
        view.set_instance_id(to.instance);
        let updated = *view.header();

        self.touch_slot(from);
        let entry = self.entry_mut(id)?;
        entry.header = updated;
        entry.link.storage = to;
        entry.position = None;
        entry.link.synced = false;
        self.touch_slot(to);
        Ok(from)
    }

    // =========================================================================
    // Envelopes
    // =========================================================================

    /// Builds the envelope of every resident agent saved to `storage`.
    pub fn build_envelope(&self, storage: StorageSlot) -> BaleResult<(Vec<u8>, Vec<usize>)> {
        let members: Vec<usize> = self
            .registry
            .members(storage)
            .into_iter()
            .filter(|&slot| self.registry.get(slot).is_some_and(|e| e.at.is_some()))
            .collect();
        let mut records = Vec::with_capacity(members.len());
        let mut root = ReferenceId::NONE;
        for &slot in &members {
            let id = AgentId::new(self.id, slot);
            records.push(self.bytes(id)?);
            if self.root == Some(slot) {
                root = self.entry(id)?.header.reference_id;
            }
        }
        let bytes = envelope::encode(storage, root, records.iter().copied())?;
        Ok((bytes, members))
    }

    /// Records a completed save of `members` to `storage`.
    pub fn mark_saved(&mut self, storage: StorageSlot, members: &[usize], header: EnvelopeHeader) {
        for (position, &slot) in members.iter().enumerate() {
            if let Some(entry) = self.registry.get_mut(slot) {
                entry.link.synced = true;
                entry.position = Some(position);
            }
        }
        self.headers.set_loaded(header);
        self.stale.remove(&storage);
    }

    /// Registers the records of a decoded envelope, reattaching unloaded
    /// agents by position and leaving resident ones untouched.
    pub fn attach(
        &mut self,
        bytes: Vec<u8>,
        envelope: &Envelope,
        policy: ExpansionPolicy,
    ) -> BaleResult<Attached> {
        let storage = envelope.header.slot;
        let by_position: HashMap<usize, usize> = self
            .registry
            .members(storage)
            .into_iter()
            .filter_map(|slot| {
                let position = self.registry.get(slot)?.position?;
                Some((position, slot))
            })
            .collect();

        // Validate everything before touching the registry.
        let mut headers = Vec::with_capacity(envelope.records.len());
        let mut placements = Vec::with_capacity(envelope.records.len());
        let mut claimed = HashSet::new();
        for (position, range) in envelope.records.iter().enumerate() {
            let header = ManagedHeader::from_bytes(&bytes[range.clone()])?;
            if header.storage() != storage {
                return Err(BaleError::corrupt_data(format!(
                    "record {position} names slot {} inside envelope {storage}",
                    header.storage()
                )));
            }
            let placement = match by_position.get(&position) {
                Some(&slot) if self.registry.get(slot).is_some_and(|e| e.state.is_resident()) => {
                    Placement::Kept(slot)
                }
                Some(&slot) => Placement::Matched(slot),
                None => Placement::New,
            };
            let reference = header.reference_id;
            if reference.is_valid() {
                let owner = self.registry.slot_of(reference);
                let clash = match placement {
                    Placement::Kept(_) => false,
                    Placement::Matched(slot) => owner.is_some_and(|owner| owner != slot),
                    Placement::New => owner.is_some(),
                };
                if clash || !claimed.insert(reference) {
                    return Err(BaleError::illegal_argument(format!(
                        "reference id {reference} in envelope {storage} is already registered"
                    )));
                }
            }
            headers.push(header);
            placements.push(placement);
        }

        let shared = policy
            .shares_buffers()
            .then(|| self.arena.insert(bytes.clone()));
        let mut attached = Attached::default();
        for (position, (range, placement)) in envelope.records.iter().zip(placements).enumerate() {
            let header = headers[position];
            let at = match (&placement, shared) {
                (Placement::Kept(_), _) => None,
                (_, Some(buffer)) => Some(BufferHandle::new(buffer, range.start)),
                (_, None) => Some(BufferHandle::new(
                    self.arena.insert(bytes[range.clone()].to_vec()),
                    0,
                )),
            };

            match (placement, at) {
                (Placement::Kept(slot), _) => {
                    if let Some(entry) = self.registry.get_mut(slot) {
                        entry.position = Some(position);
                    }
                    attached.kept += 1;
                }
                (Placement::Matched(slot), Some(at)) => {
                    let entry_reference = self
                        .registry
                        .get(slot)
                        .map(AgentEntry::reference_id)
                        .unwrap_or(ReferenceId::NONE);
                    if header.reference_id.is_valid() && header.reference_id != entry_reference {
                        self.registry.rekey(slot, header.reference_id)?;
                    }
                    self.arena.retain(at.buffer)?;
                    if let Some(entry) = self.registry.get_mut(slot) {
                        entry.at = Some(at);
                        entry.header = header;
                        entry.state = AgentState::Registered;
                        entry.position = Some(position);
                        entry.link.synced = true;
                    }
                    attached.matched += 1;
                }
                (Placement::New, Some(at)) => {
                    let link = AgentLink {
                        synced: true,
                        root: envelope.header.root_reference.is_valid()
                            && header.reference_id == envelope.header.root_reference,
                        ..AgentLink::default()
                    };
                    if let Err(err) = self.register(at, link, Some(position), false) {
                        if shared.is_none() {
                            self.arena.remove(at.buffer);
                        }
                        return Err(err);
                    }
                    attached.added += 1;
                }
                (_, None) => {}
            }
        }

        if let Some(buffer) = shared {
            if self.arena.occupants(buffer)? == 0 {
                self.arena.remove(buffer);
            }
        }
        self.headers.set_loaded(envelope.header);
        Ok(attached)
    }

    /// Drops the bytes of every unpinned, unlocked member of `storage` and
    /// turns its header entry into a stub.
    pub fn unload(&mut self, storage: StorageSlot) -> BaleResult<usize> {
        let mut unloaded = 0;
        for slot in self.registry.members(storage) {
            let Some(entry) = self.registry.get_mut(slot) else {
                continue;
            };
            let Some(at) = entry.at else {
                continue;
            };
            if entry.header.flags.contains(RecordFlags::PINNED) || entry.link.locked {
                continue;
            }
            if entry.is_dirty() {
                warn!(slot, reference = %entry.header.reference_id, %storage, "discarding unsaved agent");
            }
            entry.at = None;
            entry.state = AgentState::Unloaded;
            entry.object = None;
            entry.link.synced = true;
            self.arena.release(at.buffer)?;
            unloaded += 1;
        }
        self.headers.set_stub(storage);
        Ok(unloaded)
    }
}
