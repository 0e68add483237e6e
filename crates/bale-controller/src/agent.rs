//! Agent handles.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bale_common::error::BaleResult;
use bale_common::types::{ReferenceId, StorageSlot};
use bale_record::{
    AgentLink, BackingIdentity, BufferHandle, ManagedHeader, ManagedView, RecordFlags, RecordId,
    RecordStore,
};

use crate::controller::RecordController;
use crate::expansion::Growth;
use crate::factory::AgentObject;
use crate::registry::{AgentId, AgentState};

/// Borrowed handle on one agent of a controller.
///
/// Every call takes the controller's state lock for its own duration; hold
/// an [`AgentGuard`] to make a sequence of calls exclusive among threads
/// that also lock the agent.
#[derive(Clone, Copy)]
pub struct Agent<'c> {
    controller: &'c RecordController,
    id: AgentId,
}

impl<'c> Agent<'c> {
    pub(crate) fn new(controller: &'c RecordController, id: AgentId) -> Self {
        Self { controller, id }
    }

    /// Returns the agent id.
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Returns the owning controller.
    pub fn controller(&self) -> &'c RecordController {
        self.controller
    }

    fn inspect<R>(&self, f: impl FnOnce(&crate::registry::AgentEntry) -> R) -> BaleResult<R> {
        let state = self.controller.shared.state.read();
        Ok(f(state.entry(self.id)?))
    }

    /// Returns the decoded header. Kept for unloaded agents too.
    pub fn header(&self) -> BaleResult<ManagedHeader> {
        self.inspect(|entry| entry.header)
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> BaleResult<AgentState> {
        self.inspect(|entry| entry.state)
    }

    /// Returns the runtime link.
    pub fn link(&self) -> BaleResult<AgentLink> {
        self.inspect(|entry| entry.link)
    }

    /// Returns the reference id.
    pub fn reference_id(&self) -> BaleResult<ReferenceId> {
        self.inspect(|entry| entry.reference_id())
    }

    /// Returns the storage slot the agent is saved to.
    pub fn storage(&self) -> BaleResult<StorageSlot> {
        self.inspect(|entry| entry.link.storage)
    }

    /// Returns true if the bytes differ from the last save or load.
    pub fn is_dirty(&self) -> BaleResult<bool> {
        self.inspect(|entry| entry.is_dirty())
    }

    /// Returns true if a thread holds the agent's lock.
    pub fn is_locked(&self) -> BaleResult<bool> {
        self.inspect(|entry| entry.link.locked)
    }

    /// Returns where the agent's bytes live, or `None` when unloaded.
    pub fn handle(&self) -> BaleResult<Option<BufferHandle>> {
        self.inspect(|entry| entry.at)
    }

    /// Returns the identity of the allocation holding the agent's bytes.
    pub fn backing(&self) -> BaleResult<BackingIdentity> {
        let state = self.controller.shared.state.read();
        let (at, _) = state.resident_at(self.id)?;
        state.arena.identity(at.buffer)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Runs `f` over a read view of the agent's bytes.
    pub fn with_view<R>(&self, f: impl FnOnce(&ManagedView<'_>) -> R) -> BaleResult<R> {
        let state = self.controller.shared.state.read();
        let view = state.view(self.id)?;
        Ok(f(&view))
    }

    /// Copies out the complete record bytes.
    pub fn bytes(&self) -> BaleResult<Vec<u8>> {
        self.with_view(|view| view.bytes().to_vec())
    }

    /// Copies out the data region.
    pub fn data(&self) -> BaleResult<Vec<u8>> {
        self.with_view(|view| view.data().to_vec())
    }

    /// Reads an unsigned field of 1 to 4 bytes from the data region.
    pub fn read_uint(&self, offset: usize, width: usize) -> BaleResult<u32> {
        self.with_view(|view| view.read_uint(offset, width))?
    }

    /// Reads a sign-extended field of 1 to 4 bytes from the data region.
    pub fn read_int(&self, offset: usize, width: usize) -> BaleResult<i32> {
        self.with_view(|view| view.read_int(offset, width))?
    }

    /// Parses the data region as a serialized record tree into `store`.
    pub fn content(&self, store: &mut RecordStore) -> BaleResult<RecordId> {
        let data = self.data()?;
        store.deserialize(&data)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Writes an unsigned field into the data region.
    pub fn write_uint(&self, offset: usize, width: usize, value: u32) -> BaleResult<()> {
        self.controller
            .shared
            .state
            .write()
            .write(self.id, |view| view.write_uint(offset, width, value))
    }

    /// Writes a signed field into the data region.
    pub fn write_int(&self, offset: usize, width: usize, value: i32) -> BaleResult<()> {
        self.controller
            .shared
            .state
            .write()
            .write(self.id, |view| view.write_int(offset, width, value))
    }

    /// Copies `bytes` into the data region at `offset`.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> BaleResult<()> {
        self.controller
            .shared
            .state
            .write()
            .write(self.id, |view| view.write_bytes(offset, bytes))
    }

    /// Pins or unpins the agent. Pinned agents survive unloading.
    pub fn set_pinned(&self, pinned: bool) -> BaleResult<()> {
        self.controller
            .shared
            .state
            .write()
            .set_flag(self.id, RecordFlags::PINNED, pinned)
    }

    /// Makes the agent read-only for good.
    pub fn set_immutable(&self) -> BaleResult<()> {
        self.controller
            .shared
            .state
            .write()
            .set_flag(self.id, RecordFlags::IMMUTABLE, true)
    }

    /// See [`RecordController::expand_data`].
    pub fn expand_data(&self, n: usize) -> BaleResult<Growth> {
        self.controller.expand_data(self.id, n)
    }

    /// See [`RecordController::expand_buffer`].
    pub fn expand_buffer(&self, n: usize) -> BaleResult<Growth> {
        self.controller.expand_buffer(self.id, n)
    }

    /// See [`RecordController::buffer_trim`].
    pub fn buffer_trim(&self) -> BaleResult<Growth> {
        self.controller.buffer_trim(self.id)
    }

    /// See [`RecordController::expand_reset_array_data`].
    pub fn expand_reset_array_data(&self, n: usize) -> BaleResult<Growth> {
        self.controller.expand_reset_array_data(self.id, n)
    }

    /// See [`RecordController::set_content`].
    pub fn set_content(&self, store: &RecordStore, root: RecordId) -> BaleResult<Growth> {
        self.controller.set_content(self.id, store, root)
    }

    // =========================================================================
    // Objects and locking
    // =========================================================================

    /// Returns the bound application object.
    pub fn object(&self) -> BaleResult<AgentObject> {
        self.controller.object(self.id)
    }

    /// Returns the bound application object as a concrete type.
    pub fn object_as<T: Any + Send + Sync>(&self) -> BaleResult<Arc<T>> {
        self.controller.object_as(self.id)
    }

    /// Blocks until the calling thread holds the agent's lock.
    pub fn lock(&self) -> BaleResult<AgentGuard<'c>> {
        self.controller.shared.lock_agent(self.id)?;
        Ok(AgentGuard {
            controller: self.controller,
            id: self.id,
        })
    }

    /// Takes the agent's lock if no other thread holds it.
    pub fn try_lock(&self) -> BaleResult<Option<AgentGuard<'c>>> {
        if !self.controller.shared.try_lock_agent(self.id)? {
            return Ok(None);
        }
        Ok(Some(AgentGuard {
            controller: self.controller,
            id: self.id,
        }))
    }
}

impl fmt::Debug for Agent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").field("id", &self.id).finish()
    }
}

/// Holds an agent's lock; dropping it hands the lock to the oldest waiter.
#[must_use = "the agent is unlocked when the guard is dropped"]
pub struct AgentGuard<'c> {
    controller: &'c RecordController,
    id: AgentId,
}

impl AgentGuard<'_> {
    /// Returns the locked agent.
    pub fn id(&self) -> AgentId {
        self.id
    }
}

impl Drop for AgentGuard<'_> {
    fn drop(&mut self) {
        let _ = self.controller.shared.unlock_agent(self.id);
    }
}

impl fmt::Debug for AgentGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentGuard").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use bale_common::config::ControllerConfig;
    use bale_common::error::BaleError;
    use bale_common::types::ClassId;
    use bale_record::{ManagedRecord, RecordType};

    use crate::factory::ClassFactory;

    fn controller() -> RecordController {
        RecordController::new(ControllerConfig::default()).unwrap()
    }

    fn record(class: u16) -> ManagedRecord {
        ManagedRecord::builder(RecordType::new(4).unwrap())
            .class(ClassId::new(class))
            .data(vec![0; 8])
            .build()
            .unwrap()
    }

    #[test]
    fn test_read_write_fields() {
        let controller = controller();
        let agent = controller.agent(controller.add_agent(record(1)).unwrap()).unwrap();
        agent.write_uint(0, 2, 0xBEEF).unwrap();
        agent.write_int(4, 1, -3).unwrap();
        assert_eq!(agent.read_uint(0, 2).unwrap(), 0xBEEF);
        assert_eq!(agent.read_int(4, 1).unwrap(), -3);
        assert!(agent.write_uint(7, 2, 1).is_err());
        assert!(agent.is_dirty().unwrap());
    }

    #[test]
    fn test_immutable_is_one_way() {
        let controller = controller();
        let agent = controller.agent(controller.add_agent(record(1)).unwrap()).unwrap();
        agent.set_immutable().unwrap();
        assert!(matches!(
            agent.write_uint(0, 1, 1).unwrap_err(),
            BaleError::IllegalState { .. }
        ));
        assert!(agent.expand_data(4).is_err());
        agent.set_immutable().unwrap();
        agent.set_pinned(true).unwrap();
        assert!(agent.header().unwrap().flags.contains(RecordFlags::PINNED));
    }

    #[test]
    fn test_factory_chain() {
        struct Widget(u16);

        let controller = controller();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        controller.register_factory(Arc::new(ClassFactory::new(ClassId::new(2), move |h: &ManagedHeader| {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(Widget(h.class_id.as_u16())) as AgentObject
        })));

        let plain = controller.add_agent(record(1)).unwrap();
        let widget = controller.add_agent(record(2)).unwrap();
        assert!(!controller.instantiate(plain).unwrap());
        assert!(controller.instantiate(widget).unwrap());
        assert!(controller.instantiate(widget).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let agent = controller.agent(widget).unwrap();
        assert_eq!(agent.state().unwrap(), AgentState::Instantiated);
        assert_eq!(agent.object_as::<Widget>().unwrap().0, 2);
        assert!(agent.object_as::<String>().is_err());
    }

    #[test]
    fn test_lock_serializes_threads() {
        let controller = Arc::new(controller());
        let id = controller.add_agent(record(1)).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let controller = Arc::clone(&controller);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let agent = controller.agent(id).unwrap();
                        let _guard = agent.lock().unwrap();
                        let value = agent.read_uint(0, 4).unwrap();
                        agent.write_uint(0, 4, value + 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let agent = controller.agent(id).unwrap();
        assert_eq!(agent.read_uint(0, 4).unwrap(), 200);
        assert!(!agent.is_locked().unwrap());
    }

    #[test]
    fn test_try_lock() {
        let controller = controller();
        let agent = controller.agent(controller.add_agent(record(1)).unwrap()).unwrap();
        let guard = agent.try_lock().unwrap().unwrap();
        assert!(agent.is_locked().unwrap());
        assert!(controller.remove_agent(agent.id()).is_err());
        drop(guard);
        assert!(!agent.is_locked().unwrap());
        assert!(controller.remove_agent(agent.id()).is_ok());
    }
}
