use std::sync::Arc;

use bale_common::config::{ControllerConfig, ExpansionPolicy};
use bale_common::error::BaleResult;
use bale_common::types::{ClassId, GroupId, InstanceId, ReferenceId, StorageSlot};
use bale_controller::{envelope, RecordController};
use bale_record::{ManagedRecord, RecordId, RecordStore, RecordType};
use bale_storage::MemorySource;

/// Every expansion policy.
pub const POLICIES: [ExpansionPolicy; 3] = [
    ExpansionPolicy::Expulse,
    ExpansionPolicy::Single,
    ExpansionPolicy::Multiple,
];

/// Record type used by the fixtures.
pub fn record_type() -> RecordType {
    RecordType::new(5).unwrap_or(RecordType::LITERAL_ARRAY)
}

/// Storage slot `(group, instance)`.
pub fn slot(group: u16, instance: u16) -> StorageSlot {
    StorageSlot::new(GroupId::new(group), InstanceId::new(instance))
}

/// A managed record with `data` and `slack` bytes of slack.
pub fn managed(
    reference: u16,
    storage: StorageSlot,
    data: &[u8],
    slack: usize,
) -> BaleResult<ManagedRecord> {
    ManagedRecord::builder(record_type())
        .class(ClassId::new(1))
        .storage(storage.group, storage.instance)
        .reference(ReferenceId::new(reference))
        .data(data.to_vec())
        .slack(slack)
        .build()
}

/// Encodes an envelope of records `(reference, data, slack)` for `storage`.
///
/// The first record is the stored root.
pub fn envelope_bytes(storage: StorageSlot, records: &[(u16, &[u8], usize)]) -> BaleResult<Vec<u8>> {
    let encoded = records
        .iter()
        .map(|&(reference, data, slack)| {
            managed(reference, storage, data, slack).map(ManagedRecord::into_bytes)
        })
        .collect::<BaleResult<Vec<_>>>()?;
    let root = records
        .first()
        .map_or(ReferenceId::NONE, |&(reference, _, _)| ReferenceId::new(reference));
    envelope::encode(storage, root, encoded.iter().map(Vec::as_slice))
}

/// A controller with a memory source for group 0.
pub fn memory_controller(
    config: ControllerConfig,
) -> BaleResult<(RecordController, Arc<MemorySource>)> {
    let controller = RecordController::new(config)?;
    let source = Arc::new(MemorySource::new());
    controller.add_source(GroupId::new(0), source.clone());
    Ok((controller, source))
}

/// Builds the tree used by the format scenarios: a 16-byte root of type 5
/// holding one literal array sub-record `{1, 2, 3}`.
pub fn scenario_tree(store: &mut RecordStore) -> BaleResult<RecordId> {
    let root = store.create(record_type(), 16)?;
    let array = store.create_literal_array(&[1, 2, 3])?;
    store.add_sub(root, array)?;
    Ok(root)
}

/// Builds a tree where one sub-record is shared by two parents and the
/// shared record links back to the root.
///
/// ```text
/// root ─┬─ left ──┐
///       └─ right ─┴─(alias)─ shared ─(alias)─ root
/// ```
pub fn shared_cyclic_tree(store: &mut RecordStore) -> BaleResult<RecordId> {
    let root = store.create(record_type(), 4)?;
    let left = store.create(record_type(), 2)?;
    let right = store.create(record_type(), 2)?;
    let shared = store.create_literal_array(&[7, -7, 300])?;

    store.view_mut(root)?.write_uint(0, 4, 0xDEAD_BEEF)?;
    store.view_mut(left)?.write_uint(0, 2, 1)?;
    store.view_mut(right)?.write_uint(0, 2, 2)?;

    store.add_sub(root, left)?;
    store.add_sub(root, right)?;
    store.add_sub(left, shared)?;
    store.add_alias(right, shared)?;
    store.add_alias(shared, root)?;
    Ok(root)
}
