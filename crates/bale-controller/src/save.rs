//! Saving dirty storage slots.
//!
//! The save granularity is the storage slot: when any member of a slot is
//! dirty, every resident member is written in one envelope with a single
//! `save` call. A slot with a member locked by another thread is handed to
//! a background thread that waits for the locks, or skipped when deferred
//! saves are disabled.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use parking_lot::RwLockUpgradableReadGuard;
use tracing::{debug, info, warn};

use bale_common::error::{BaleError, BaleResult};
use bale_common::types::StorageSlot;
use bale_storage::StorageSource;

use crate::controller::{RecordController, Shared};
use crate::envelope::EnvelopeHeader;
use crate::registry::AgentId;

/// Totals of one save pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    /// Envelopes written.
    pub envelopes: usize,
    /// Records written across all envelopes.
    pub records_saved: usize,
    /// Bytes written across all envelopes.
    pub bytes_written: usize,
    /// Slots handed to a background thread.
    pub deferred: usize,
    /// Slots left dirty.
    pub skipped: usize,
}

impl SaveStats {
    /// Adds another pass's totals to this one.
    pub fn absorb(&mut self, other: SaveStats) {
        self.envelopes += other.envelopes;
        self.records_saved += other.records_saved;
        self.bytes_written += other.bytes_written;
        self.deferred += other.deferred;
        self.skipped += other.skipped;
    }
}

impl Shared {
    /// Blocks until the calling thread holds `id`.
    ///
    /// Fails and gives the key back when the agent was removed while the
    /// caller waited.
    pub(crate) fn lock_agent(&self, id: AgentId) -> BaleResult<()> {
        self.state.read().entry(id)?;
        self.coordinator.acquire(id);
        let mut state = self.state.write();
        match state.entry_mut(id) {
            Ok(entry) => {
                entry.link.locked = true;
                Ok(())
            }
            Err(err) => {
                self.coordinator.release(&id)?;
                Err(err)
            }
        }
    }

    /// Takes `id` if no other holder has it.
    pub(crate) fn try_lock_agent(&self, id: AgentId) -> BaleResult<bool> {
        let mut state = self.state.write();
        let entry = state.entry_mut(id)?;
        if !self.coordinator.try_acquire(id) {
            return Ok(false);
        }
        entry.link.locked = true;
        Ok(true)
    }

    /// Releases `id`, handing it to the oldest waiter.
    ///
    /// The key and the locked flag change under one state write lock, so a
    /// handed-off agent never looks unlocked.
    pub(crate) fn unlock_agent(&self, id: AgentId) -> BaleResult<()> {
        let mut state = self.state.write();
        self.coordinator.release(&id)?;
        let still_held = self.coordinator.is_locked(&id);
        if let Ok(entry) = state.entry_mut(id) {
            entry.link.locked = still_held;
        }
        Ok(())
    }

    /// Releases every key in `ids`, reporting the first failure.
    pub(crate) fn release_all(&self, ids: &[AgentId]) -> BaleResult<()> {
        let mut first = None;
        for id in ids {
            if let Err(err) = self.coordinator.release(id) {
                warn!(agent = %id, %err, "release failed");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Writes one envelope holding every resident member of `storage`.
    pub(crate) fn save_slot(
        &self,
        storage: StorageSlot,
        source: &dyn StorageSource,
    ) -> BaleResult<SaveStats> {
        let state = self.state.upgradable_read();
        let (bytes, members) = state.build_envelope(storage)?;
        source.save(&bytes, 0, bytes.len(), storage.instance)?;
        let header = EnvelopeHeader::from_bytes(&bytes)?;

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        state.mark_saved(storage, &members, header);
        drop(state);

        self.stats.record_save(bytes.len());
        debug!(controller = %self.id, %storage, records = members.len(), bytes = bytes.len(), "envelope saved");
        Ok(SaveStats {
            envelopes: 1,
            records_saved: members.len(),
            bytes_written: bytes.len(),
            ..SaveStats::default()
        })
    }

    /// Members of `storage` as agent ids, in registry order.
    fn member_ids(&self, storage: StorageSlot) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self
            .state
            .read()
            .registry
            .members(storage)
            .into_iter()
            .map(|slot| AgentId::new(self.id, slot))
            .collect();
        ids.sort();
        ids
    }

    /// Saves `storage` after taking every member lock, waiting as needed.
    fn save_slot_blocking(
        &self,
        storage: StorageSlot,
        source: &dyn StorageSource,
    ) -> BaleResult<SaveStats> {
        let ids = self.member_ids(storage);
        for &id in &ids {
            self.coordinator.acquire(id);
        }
        let result = self.save_slot(storage, source);
        let released = self.release_all(&ids);
        let saved = result?;
        released?;
        Ok(saved)
    }
}

impl RecordController {
    /// Saves every storage slot holding a dirty agent, plus every slot
    /// that lost or gained members since its last save.
    ///
    /// Slots whose group has no source stay dirty and count as skipped.
    pub fn save_agents(&self) -> BaleResult<SaveStats> {
        let slots: BTreeSet<StorageSlot> = {
            let state = self.shared.state.read();
            state
                .registry
                .iter()
                .filter(|(_, entry)| entry.at.is_some() && entry.is_dirty())
                .map(|(_, entry)| entry.link.storage)
                .chain(state.stale.iter().copied())
                .collect()
        };

        let mut stats = SaveStats::default();
        for storage in slots {
            stats.absorb(self.save_storage(storage)?);
        }
        if stats.envelopes > 0 || stats.deferred > 0 {
            info!(
                controller = %self.id(),
                envelopes = stats.envelopes,
                records = stats.records_saved,
                bytes = stats.bytes_written,
                deferred = stats.deferred,
                "agents saved"
            );
        }
        Ok(stats)
    }

    fn save_storage(&self, storage: StorageSlot) -> BaleResult<SaveStats> {
        let Some(source) = self.shared.source(storage.group) else {
            let dirty = {
                let mut state = self.shared.state.write();
                let had_members = !state.registry.members(storage).is_empty();
                if !had_members {
                    state.stale.remove(&storage);
                }
                had_members
            };
            if dirty {
                debug!(%storage, "no source; slot left dirty");
            }
            return Ok(SaveStats {
                skipped: usize::from(dirty),
                ..SaveStats::default()
            });
        };

        let stub = self
            .shared
            .state
            .read()
            .headers
            .get(storage)
            .is_some_and(|entry| entry.stub);
        if stub {
            self.shared.load_slot(storage, source.as_ref())?;
        }

        let ids = self.shared.member_ids(storage);
        let mut held = Vec::with_capacity(ids.len());
        for &id in &ids {
            if !self.shared.coordinator.try_acquire(id) {
                break;
            }
            held.push(id);
        }
        if held.len() == ids.len() {
            let result = self.shared.save_slot(storage, source.as_ref());
            let released = self.shared.release_all(&held);
            let saved = result?;
            released?;
            return Ok(saved);
        }
        self.shared.release_all(&held)?;

        if !self.config().deferred_saves {
            warn!(%storage, "slot has a locked member; save skipped");
            return Ok(SaveStats {
                skipped: 1,
                ..SaveStats::default()
            });
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("bale-save-{}-{}", storage.group, storage.instance))
            .spawn(move || shared.save_slot_blocking(storage, source.as_ref()))?;
        self.deferred.lock().push(handle);
        self.shared.stats.record_deferred();
        warn!(%storage, "slot has a locked member; save deferred");
        Ok(SaveStats {
            deferred: 1,
            ..SaveStats::default()
        })
    }

    /// Waits for every deferred save started so far.
    ///
    /// Must not be called while the calling thread holds an agent lock a
    /// deferred save is waiting for.
    pub fn wait_deferred(&self) -> BaleResult<SaveStats> {
        let handles: Vec<_> = self.deferred.lock().drain(..).collect();
        let mut stats = SaveStats::default();
        for handle in handles {
            let saved = handle
                .join()
                .map_err(|_| BaleError::illegal_state("deferred save thread panicked"))??;
            stats.absorb(saved);
        }
        Ok(stats)
    }

    /// Returns the number of deferred saves not yet waited for.
    pub fn pending_deferred(&self) -> usize {
        self.deferred.lock().len()
    }
}
