//! The record controller.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use bale_common::config::{ControllerConfig, ExpansionPolicy};
use bale_common::error::{BaleError, BaleResult};
use bale_common::types::{ClassId, ControllerId, GroupId, ReferenceId, StorageSlot};
use bale_record::{AgentLink, GrowthPlan, ManagedRecord, RecordId, RecordStore};
use bale_storage::StorageSource;
use bale_sync::AccessCoordinator;

use crate::agent::Agent;
use crate::expansion::Growth;
use crate::factory::{AgentObject, RecordFactory};
use crate::pattern::HeaderPattern;
use crate::registry::{AgentId, AgentState, HeaderEntry};
use crate::save::SaveStats;
use crate::state::ControllerState;

/// Statistics about a controller.
#[derive(Debug, Default)]
pub struct ControllerStats {
    /// Agents registered, added or loaded.
    pub agents_added: AtomicU64,
    /// Envelopes loaded from storage sources.
    pub envelopes_loaded: AtomicU64,
    /// Envelopes written to storage sources.
    pub envelopes_saved: AtomicU64,
    /// Bytes written to storage sources.
    pub bytes_saved: AtomicU64,
    /// Growth requests served.
    pub expansions: AtomicU64,
    /// Growth requests that copied a record into a private buffer.
    pub expulsions: AtomicU64,
    /// Saves handed to a background thread.
    pub deferred_saves: AtomicU64,
}

impl ControllerStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_added(&self, count: usize) {
        self.agents_added
            .fetch_add(count as u64, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_load(&self) {
        self.envelopes_loaded.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_save(&self, bytes: usize) {
        self.envelopes_saved.fetch_add(1, AtomicOrdering::Relaxed);
        self.bytes_saved
            .fetch_add(bytes as u64, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_expansion(&self, growth: Growth) {
        self.expansions.fetch_add(1, AtomicOrdering::Relaxed);
        if growth == Growth::Expelled {
            self.expulsions.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    pub(crate) fn record_deferred(&self) {
        self.deferred_saves.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// State shared with background save threads.
pub(crate) struct Shared {
    pub id: ControllerId,
    pub policy: ExpansionPolicy,
    pub max_header_probe: usize,
    pub state: RwLock<ControllerState>,
    pub sources: RwLock<BTreeMap<GroupId, Arc<dyn StorageSource>>>,
    pub coordinator: AccessCoordinator<AgentId>,
    pub stats: ControllerStats,
}

impl Shared {
    pub fn source(&self, group: GroupId) -> Option<Arc<dyn StorageSource>> {
        self.sources.read().get(&group).cloned()
    }
}

/// Registry and lifecycle manager of managed records.
///
/// The controller owns the bytes of every registered record (an *agent*)
/// in one arena, loads envelopes from storage sources on demand, applies
/// its expansion policy when agents grow, and writes dirty storage slots
/// back one envelope at a time.
///
/// All methods take `&self`; registry, header table and arena live behind
/// one lock, and per-agent mutual exclusion goes through an
/// [`AccessCoordinator`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use bale_common::config::ControllerConfig;
/// use bale_common::types::{GroupId, InstanceId};
/// use bale_controller::RecordController;
/// use bale_record::{ManagedRecord, RecordType};
/// use bale_storage::MemorySource;
///
/// let controller = RecordController::new(ControllerConfig::default()).unwrap();
/// let source = Arc::new(MemorySource::new());
/// controller.add_source(GroupId::new(0), source.clone());
///
/// let record = ManagedRecord::builder(RecordType::new(1).unwrap())
///     .storage(GroupId::new(0), InstanceId::new(0))
///     .data(vec![1, 2, 3])
///     .build()
///     .unwrap();
/// let id = controller.add_agent(record).unwrap();
/// controller.agent(id).unwrap().write_uint(0, 1, 9).unwrap();
///
/// let saved = controller.save_agents().unwrap();
/// assert_eq!(saved.records_saved, 1);
/// assert_eq!(source.save_count(), 1);
/// ```
pub struct RecordController {
    config: ControllerConfig,
    pub(crate) shared: Arc<Shared>,
    factories: RwLock<Vec<Arc<dyn RecordFactory>>>,
    pub(crate) deferred: Mutex<Vec<JoinHandle<BaleResult<SaveStats>>>>,
}

impl RecordController {
    /// Creates a controller with no agents and no sources.
    pub fn new(config: ControllerConfig) -> BaleResult<Self> {
        config.validate()?;
        let id = ControllerId::allocate();
        let shared = Shared {
            id,
            policy: config.expansion_policy,
            max_header_probe: config.max_header_probe,
            state: RwLock::new(ControllerState::new(id, config.registry_increment)),
            sources: RwLock::new(BTreeMap::new()),
            coordinator: AccessCoordinator::new(),
            stats: ControllerStats::new(),
        };
        debug!(controller = %id, policy = ?config.expansion_policy, "controller created");
        Ok(Self {
            config,
            shared: Arc::new(shared),
            factories: RwLock::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
        })
    }

    /// Returns the controller id.
    pub fn id(&self) -> ControllerId {
        self.shared.id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &ControllerStats {
        &self.shared.stats
    }

    /// Sets the storage source of a group, returning the previous one.
    pub fn add_source(
        &self,
        group: GroupId,
        source: Arc<dyn StorageSource>,
    ) -> Option<Arc<dyn StorageSource>> {
        debug!(controller = %self.id(), %group, ?source, "storage source added");
        self.shared.sources.write().insert(group, source)
    }

    /// Appends a factory to the instantiation chain.
    pub fn register_factory(&self, factory: Arc<dyn RecordFactory>) {
        self.factories.write().push(factory);
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a detached record.
    ///
    /// A zero reference id is replaced with the next free id; a taken one
    /// is an error, as is a record still linked to a controller.
    pub fn add_agent(&self, record: ManagedRecord) -> BaleResult<AgentId> {
        let (bytes, link) = record.into_parts();
        let slot = self.shared.state.write().adopt(bytes, link, false)?;
        self.shared.stats.record_added(1);
        Ok(AgentId::new(self.id(), slot))
    }

    /// Returns a handle on an agent.
    pub fn agent(&self, id: AgentId) -> BaleResult<Agent<'_>> {
        self.shared.state.read().entry(id)?;
        Ok(Agent::new(self, id))
    }

    /// Returns the number of agents.
    pub fn agent_count(&self) -> usize {
        self.shared.state.read().registry.len()
    }

    /// Returns the number of registry slots, free ones included.
    pub fn registry_capacity(&self) -> usize {
        self.shared.state.read().registry.capacity()
    }

    /// Returns every agent in registry order.
    pub fn agents(&self) -> Vec<AgentId> {
        self.shared
            .state
            .read()
            .registry
            .iter()
            .map(|(slot, _)| AgentId::new(self.id(), slot))
            .collect()
    }

    /// Returns the root agent: the first one flagged root, else the first
    /// one added.
    pub fn root(&self) -> Option<AgentId> {
        self.shared
            .state
            .read()
            .root()
            .map(|slot| AgentId::new(self.id(), slot))
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Finds an agent by reference id, loading sources on a miss and
    /// instantiating the agent through the factory chain.
    pub fn find_by_reference(&self, reference: ReferenceId) -> BaleResult<Option<AgentId>> {
        if !reference.is_valid() {
            return Err(BaleError::illegal_argument(format!(
                "reference id {reference} is out of range"
            )));
        }

        let mut slot = self.shared.state.read().registry.slot_of(reference);
        if slot.is_none() {
            self.load_all_agents()?;
            slot = self.shared.state.read().registry.slot_of(reference);
        }
        let Some(slot) = slot else {
            return Ok(None);
        };
        let id = AgentId::new(self.id(), slot);

        let (state, storage) = {
            let guard = self.shared.state.read();
            let entry = guard.entry(id)?;
            (entry.state, entry.link.storage)
        };
        if state == AgentState::Unloaded {
            self.shared.ensure_loaded(storage)?;
        }
        self.instantiate(id)?;
        Ok(Some(id))
    }

    fn find_where(&self, pred: impl Fn(&bale_record::ManagedHeader) -> bool) -> Vec<AgentId> {
        self.shared
            .state
            .read()
            .registry
            .iter()
            .filter(|(_, entry)| pred(&entry.header))
            .map(|(slot, _)| AgentId::new(self.id(), slot))
            .collect()
    }

    /// Finds every agent of a class.
    pub fn find_by_class(&self, class: ClassId) -> Vec<AgentId> {
        self.find_where(|header| header.class_id == class)
    }

    /// Finds every agent saved to a storage slot, in envelope order.
    pub fn find_by_storage(&self, storage: StorageSlot) -> Vec<AgentId> {
        self.shared
            .state
            .read()
            .registry
            .members(storage)
            .into_iter()
            .map(|slot| AgentId::new(self.id(), slot))
            .collect()
    }

    /// Finds every agent whose header matches a pattern.
    pub fn find_by_pattern(&self, pattern: &HeaderPattern) -> Vec<AgentId> {
        self.find_where(|header| pattern.matches(header))
    }

    /// Runs the factory chain for a registered agent.
    ///
    /// Returns true if the agent has an object afterwards.
    pub fn instantiate(&self, id: AgentId) -> BaleResult<bool> {
        let (header, state) = {
            let guard = self.shared.state.read();
            let entry = guard.entry(id)?;
            (entry.header, entry.state)
        };
        match state {
            AgentState::Instantiated => return Ok(true),
            AgentState::Unloaded => {
                return Err(BaleError::illegal_state(format!("agent {id} is unloaded")))
            }
            AgentState::Registered => {}
        }

        let factories = self.factories.read().clone();
        for factory in factories {
            if let Some(object) = factory.create_object(&header, header.interface_id, self) {
                let mut guard = self.shared.state.write();
                let entry = guard.entry_mut(id)?;
                if entry.state == AgentState::Registered {
                    entry.state = AgentState::Instantiated;
                    entry.object = Some(object);
                }
                debug!(agent = %id, class = %header.class_id, "agent instantiated");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns the object bound to an agent.
    pub fn object(&self, id: AgentId) -> BaleResult<AgentObject> {
        let guard = self.shared.state.read();
        let entry = guard.entry(id)?;
        entry.object.clone().ok_or_else(|| {
            BaleError::illegal_state(format!("agent {id} has not been instantiated"))
        })
    }

    /// Returns the object bound to an agent as a concrete type.
    pub fn object_as<T: Any + Send + Sync>(&self, id: AgentId) -> BaleResult<Arc<T>> {
        self.object(id)?.downcast::<T>().map_err(|_| {
            BaleError::illegal_argument(format!(
                "object of agent {id} is not a {}",
                std::any::type_name::<T>()
            ))
        })
    }

    // =========================================================================
    // Expansion
    // =========================================================================

    fn grow(
        &self,
        id: AgentId,
        plan: impl FnOnce(&bale_record::ManagedHeader) -> BaleResult<GrowthPlan>,
    ) -> BaleResult<Growth> {
        let growth = self
            .shared
            .state
            .write()
            .grow(id, self.shared.policy, plan)?;
        self.shared.stats.record_expansion(growth);
        Ok(growth)
    }

    /// Grows an agent's data region by `n` bytes, from slack when possible.
    ///
    /// Physical growth also reserves `default_slack` fresh slack bytes.
    pub fn expand_data(&self, id: AgentId, n: usize) -> BaleResult<Growth> {
        let reserve = self.config.default_slack;
        self.grow(id, |header| GrowthPlan::expand_data(header, n, reserve))
    }

    /// Adds `n` bytes of slack to an agent.
    pub fn expand_buffer(&self, id: AgentId, n: usize) -> BaleResult<Growth> {
        self.grow(id, |header| GrowthPlan::expand_buffer(header, n))
    }

    /// Removes an agent's slack.
    pub fn buffer_trim(&self, id: AgentId) -> BaleResult<Growth> {
        self.grow(id, |header| Ok(GrowthPlan::trim(header)))
    }

    /// Replaces an agent's data region with `n` zeroed bytes.
    pub fn expand_reset_array_data(&self, id: AgentId, n: usize) -> BaleResult<Growth> {
        self.grow(id, |header| GrowthPlan::reset_data(header, n))
    }

    /// Stores the serialized tree under `root` as an agent's data region.
    pub fn set_content(&self, id: AgentId, store: &RecordStore, root: RecordId) -> BaleResult<Growth> {
        let bytes = store.serialize(root)?;
        let growth = {
            let mut state = self.shared.state.write();
            let growth = state.grow(id, self.shared.policy, |header| {
                GrowthPlan::reset_data(header, bytes.len())
            })?;
            state.write(id, |view| view.write_bytes(0, &bytes))?;
            growth
        };
        self.shared.stats.record_expansion(growth);
        Ok(growth)
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Unregisters an agent and returns it as a detached record with every
    /// identity field cleared.
    pub fn remove_agent(&self, id: AgentId) -> BaleResult<ManagedRecord> {
        let bytes = {
            let mut state = self.shared.state.write();
            if self.shared.coordinator.is_locked(&id) {
                return Err(BaleError::illegal_state(format!("agent {id} is locked")));
            }
            state.remove(id)?
        };
        let mut record = ManagedRecord::parse(bytes)?;
        record.clear_identity()?;
        Ok(record)
    }

    /// Moves an agent to another storage slot.
    ///
    /// The target slot is loaded first when its group has a source, so the
    /// next save rewrites it with its existing members. Both slots are
    /// marked dirty.
    pub fn move_agent(&self, id: AgentId, to: StorageSlot) -> BaleResult<()> {
        self.shared.state.read().entry(id)?;
        self.shared.ensure_loaded(to)?;
        let from = self.shared.state.write().relocate(id, to)?;
        if from != to {
            debug!(agent = %id, %from, %to, "agent moved");
        }
        Ok(())
    }

    /// Takes over every agent of another controller.
    ///
    /// Colliding reference ids are remapped to free ones. The other
    /// controller's agents must all be resident and unlocked; on success it
    /// is left empty, on failure neither controller changes.
    pub fn merge_from(&self, other: &RecordController) -> BaleResult<Vec<AgentId>> {
        if other.id() == self.id() {
            return Err(BaleError::illegal_argument(
                "a controller cannot merge with itself",
            ));
        }

        // Locked in controller id order.
        let (mut ours, mut theirs) = if self.id() < other.id() {
            let ours = self.shared.state.write();
            (ours, other.shared.state.write())
        } else {
            let theirs = other.shared.state.write();
            (self.shared.state.write(), theirs)
        };

        let mut ids = Vec::new();
        for (slot, entry) in theirs.registry.iter() {
            let id = AgentId::new(other.id(), slot);
            if entry.link.locked || other.shared.coordinator.is_locked(&id) {
                return Err(BaleError::illegal_state(format!("agent {id} is locked")));
            }
            if entry.at.is_none() {
                return Err(BaleError::illegal_state(format!("agent {id} is unloaded")));
            }
            ids.push(id);
        }
        let free = usize::from(u16::MAX) - ours.registry.len();
        if ids.len() > free {
            return Err(BaleError::illegal_state(format!(
                "reference ids exhausted: {} agents to merge, {free} ids free",
                ids.len()
            )));
        }

        let mut merged = Vec::with_capacity(ids.len());
        for id in ids {
            let storage = theirs.entry(id)?.link.storage;
            let bytes = theirs.remove(id)?;
            theirs.stale.remove(&storage);
            let slot = ours.adopt(bytes, AgentLink::default(), true)?;
            merged.push(AgentId::new(self.id(), slot));
        }
        drop(theirs);
        drop(ours);

        self.shared.stats.record_added(merged.len());
        info!(controller = %self.id(), from = %other.id(), agents = merged.len(), "controllers merged");
        Ok(merged)
    }

    // =========================================================================
    // Memory
    // =========================================================================

    /// Drops the bytes of every unpinned, unlocked agent of a storage slot,
    /// keeping their headers. Unsaved changes are discarded.
    pub fn unload_group(&self, storage: StorageSlot) -> BaleResult<usize> {
        let unloaded = self.shared.state.write().unload(storage)?;
        debug!(%storage, unloaded, "group unloaded");
        Ok(unloaded)
    }

    /// Unloads every loaded storage slot. Pinned agents are kept.
    pub fn memory_clear(&self) -> BaleResult<usize> {
        let mut state = self.shared.state.write();
        let slots: Vec<StorageSlot> = state.headers.iter().map(|(slot, _)| *slot).collect();
        let mut unloaded = 0;
        for slot in slots {
            unloaded += state.unload(slot)?;
        }
        info!(controller = %self.id(), unloaded, resident = state.arena.resident_bytes(), "memory cleared");
        Ok(unloaded)
    }

    /// Returns the header entry of a storage slot, if it was ever loaded
    /// or saved.
    pub fn envelope_header(&self, storage: StorageSlot) -> Option<HeaderEntry> {
        self.shared.state.read().headers.get(storage)
    }

    /// Returns every storage slot with a header entry.
    pub fn known_slots(&self) -> Vec<StorageSlot> {
        self.shared
            .state
            .read()
            .headers
            .iter()
            .map(|(slot, _)| *slot)
            .collect()
    }

    /// Returns the bytes held by the arena.
    pub fn resident_bytes(&self) -> usize {
        self.shared.state.read().arena.resident_bytes()
    }
}

impl fmt::Debug for RecordController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("RecordController")
            .field("id", &self.shared.id)
            .field("policy", &self.shared.policy)
            .field("agents", &state.registry.len())
            .field("slots", &state.registry.capacity())
            .field("resident_bytes", &state.arena.resident_bytes())
            .finish()
    }
}
