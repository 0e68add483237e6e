//! Loading envelopes from storage sources.

use std::sync::Arc;

use tracing::{debug, info, warn};

use bale_common::error::{BaleError, BaleResult};
use bale_common::types::{GroupId, InstanceId, StorageSlot};
use bale_storage::StorageSource;

use crate::controller::{RecordController, Shared};
use crate::envelope::{Envelope, EnvelopeHeader};
use crate::state::Attached;

/// Totals of one `load_all_agents` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Envelopes read and attached.
    pub envelopes: usize,
    /// Agents registered for the first time.
    pub added: usize,
    /// Unloaded agents reattached by position.
    pub matched: usize,
    /// Resident agents left untouched.
    pub kept: usize,
}

impl LoadStats {
    fn absorb(&mut self, attached: Attached) {
        self.envelopes += 1;
        self.added += attached.added;
        self.matched += attached.matched;
        self.kept += attached.kept;
    }
}

impl Shared {
    /// Lists the instances of a group's source.
    ///
    /// Sources without enumerable ids are probed through their default
    /// instance's envelope header.
    pub(crate) fn instances(&self, source: &dyn StorageSource) -> BaleResult<Vec<InstanceId>> {
        if source.has_enumerable_ids() {
            return Ok(source.valid_ids()?);
        }
        let probe = match source.load_header(self.max_header_probe) {
            Ok(probe) => probe,
            Err(err) if err.is_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let header = EnvelopeHeader::from_bytes(&probe)?;
        Ok(vec![header.slot.instance])
    }

    /// Loads one storage slot unless it is already loaded.
    ///
    /// Returns `None` if the slot was loaded or the source holds nothing
    /// for it.
    pub(crate) fn load_slot(
        &self,
        storage: StorageSlot,
        source: &dyn StorageSource,
    ) -> BaleResult<Option<Attached>> {
        if self.state.read().headers.is_loaded(storage) {
            return Ok(None);
        }

        let bytes = match source.load(storage.instance) {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let envelope = Envelope::decode(&bytes)?;
        if envelope.header.slot != storage {
            return Err(BaleError::corrupt_data(format!(
                "envelope of slot {} found at {storage}",
                envelope.header.slot
            )));
        }

        let mut state = self.state.write();
        if state.headers.is_loaded(storage) {
            return Ok(None);
        }
        if state.headers.get(storage).is_some() {
            warn!(%storage, "reloading unloaded slot");
        }
        let attached = state.attach(bytes.to_vec(), &envelope, self.policy)?;
        drop(state);

        self.stats.record_load();
        self.stats.record_added(attached.added);
        info!(
            controller = %self.id,
            %storage,
            records = envelope.records.len(),
            added = attached.added,
            matched = attached.matched,
            "envelope loaded"
        );
        Ok(Some(attached))
    }

    /// Loads a storage slot if its group has a source.
    pub(crate) fn ensure_loaded(&self, storage: StorageSlot) -> BaleResult<Option<Attached>> {
        match self.source(storage.group) {
            Some(source) => self.load_slot(storage, source.as_ref()),
            None => {
                if !self.state.read().headers.is_loaded(storage) {
                    debug!(%storage, "no source for slot");
                }
                Ok(None)
            }
        }
    }

    /// Loads every slot of one group's source.
    pub(crate) fn load_group(
        &self,
        group: GroupId,
        source: &Arc<dyn StorageSource>,
    ) -> BaleResult<LoadStats> {
        let mut stats = LoadStats::default();
        for instance in self.instances(source.as_ref())? {
            let storage = StorageSlot::new(group, instance);
            if let Some(attached) = self.load_slot(storage, source.as_ref())? {
                stats.absorb(attached);
            }
        }
        Ok(stats)
    }
}

impl RecordController {
    /// Loads every envelope of every source that is not loaded yet.
    ///
    /// Resident agents are left untouched; unloaded agents get their bytes
    /// back.
    pub fn load_all_agents(&self) -> BaleResult<LoadStats> {
        let sources: Vec<(GroupId, Arc<dyn StorageSource>)> = self
            .shared
            .sources
            .read()
            .iter()
            .map(|(group, source)| (*group, Arc::clone(source)))
            .collect();

        let mut stats = LoadStats::default();
        for (group, source) in sources {
            let loaded = self.shared.load_group(group, &source)?;
            stats.envelopes += loaded.envelopes;
            stats.added += loaded.added;
            stats.matched += loaded.matched;
            stats.kept += loaded.kept;
        }
        debug!(controller = %self.id(), ?stats, "sources loaded");
        Ok(stats)
    }

    /// Loads one storage slot from its group's source.
    ///
    /// Returns false if the slot was already loaded, has no source, or the
    /// source holds nothing for it.
    pub fn load_slot(&self, storage: StorageSlot) -> BaleResult<bool> {
        Ok(self.shared.ensure_loaded(storage)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bale_common::config::ControllerConfig;
    use bale_common::types::{ClassId, ReferenceId};
    use bale_record::{ManagedRecord, RecordType};
    use bale_storage::MemorySource;

    use crate::envelope;

    fn slot(instance: u16) -> StorageSlot {
        StorageSlot::new(GroupId::new(1), InstanceId::new(instance))
    }

    fn stored(storage: StorageSlot, references: &[u16]) -> Vec<u8> {
        let records: Vec<Vec<u8>> = references
            .iter()
            .map(|&r| {
                ManagedRecord::builder(RecordType::new(5).unwrap())
                    .class(ClassId::new(9))
                    .storage(storage.group, storage.instance)
                    .reference(ReferenceId::new(r))
                    .data(vec![r as u8; 3])
                    .build()
                    .unwrap()
                    .into_bytes()
            })
            .collect();
        envelope::encode(
            storage,
            ReferenceId::new(references[0]),
            records.iter().map(Vec::as_slice),
        )
        .unwrap()
    }

    fn controller_with(source: Arc<MemorySource>) -> RecordController {
        let controller = RecordController::new(ControllerConfig::for_testing()).unwrap();
        controller.add_source(GroupId::new(1), source);
        controller
    }

    #[test]
    fn test_load_all_agents() {
        let source = Arc::new(MemorySource::new());
        source.insert(InstanceId::new(0), stored(slot(0), &[1, 2]));
        source.insert(InstanceId::new(1), stored(slot(1), &[3]));
        let controller = controller_with(source);

        let stats = controller.load_all_agents().unwrap();
        assert_eq!(stats.envelopes, 2);
        assert_eq!(stats.added, 3);
        assert_eq!(controller.agent_count(), 3);
        assert_eq!(controller.find_by_storage(slot(0)).len(), 2);

        let again = controller.load_all_agents().unwrap();
        assert_eq!(again, LoadStats::default());
        assert_eq!(controller.agent_count(), 3);
    }

    #[test]
    fn test_loaded_agents_are_clean() {
        let source = Arc::new(MemorySource::new());
        source.insert(InstanceId::new(0), stored(slot(0), &[1, 2]));
        let controller = controller_with(source);
        controller.load_all_agents().unwrap();

        for id in controller.agents() {
            assert!(!controller.agent(id).unwrap().is_dirty().unwrap());
        }
        let root = controller.root().unwrap();
        assert_eq!(
            controller.agent(root).unwrap().reference_id().unwrap(),
            ReferenceId::new(1)
        );
    }

    #[test]
    fn test_non_enumerable_source_is_probed() {
        let source = Arc::new(MemorySource::non_enumerable(InstanceId::new(4)));
        source.insert(InstanceId::new(4), stored(slot(4), &[8]));
        let controller = controller_with(source);

        let stats = controller.load_all_agents().unwrap();
        assert_eq!(stats.added, 1);
        assert!(controller.envelope_header(slot(4)).is_some());
    }

    #[test]
    fn test_empty_non_enumerable_source() {
        let source = Arc::new(MemorySource::non_enumerable(InstanceId::new(0)));
        let controller = controller_with(source);
        assert_eq!(controller.load_all_agents().unwrap(), LoadStats::default());
    }

    #[test]
    fn test_misplaced_envelope_is_corrupt() {
        let source = Arc::new(MemorySource::new());
        source.insert(InstanceId::new(2), stored(slot(3), &[1]));
        let controller = controller_with(source);

        let err = controller.load_all_agents().unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(controller.agent_count(), 0);
    }

    #[test]
    fn test_find_by_reference_loads_on_miss() {
        let source = Arc::new(MemorySource::new());
        source.insert(InstanceId::new(0), stored(slot(0), &[11, 12]));
        let controller = controller_with(source);

        let id = controller
            .find_by_reference(ReferenceId::new(12))
            .unwrap()
            .unwrap();
        assert_eq!(controller.agent(id).unwrap().data().unwrap(), vec![12; 3]);
    }

    #[test]
    fn test_unload_then_find_reloads() {
        let source = Arc::new(MemorySource::new());
        source.insert(InstanceId::new(0), stored(slot(0), &[11, 12]));
        let controller = controller_with(source);
        controller.load_all_agents().unwrap();

        assert_eq!(controller.unload_group(slot(0)).unwrap(), 2);
        assert_eq!(controller.resident_bytes(), 0);
        assert!(controller.envelope_header(slot(0)).unwrap().stub);

        let id = controller
            .find_by_reference(ReferenceId::new(11))
            .unwrap()
            .unwrap();
        assert_eq!(controller.agent_count(), 2);
        assert_eq!(controller.agent(id).unwrap().data().unwrap(), vec![11; 3]);
        assert!(!controller.envelope_header(slot(0)).unwrap().stub);
    }
}
