//! Round-trip, versioning and merge properties of the record format.

use bale_common::config::ControllerConfig;
use bale_common::types::ReferenceId;
use bale_record::{MergeRegistry, RecordStore, RecordType};
use bale_test::fixtures::{self, slot};

#[test]
fn test_roundtrip_preserves_sharing_and_cycle() {
    let mut store = RecordStore::new();
    let root = fixtures::shared_cyclic_tree(&mut store).unwrap();
    let bytes = store.serialize(root).unwrap();

    let mut other = RecordStore::new();
    let copy = other.deserialize(&bytes).unwrap();
    assert!(store.equals_content(root, &other, copy).unwrap());

    let subs = other.subs(copy).unwrap().to_vec();
    assert_eq!(subs.len(), 2);
    let via_left = other.subs(subs[0].id).unwrap()[0];
    let via_right = other.subs(subs[1].id).unwrap()[0];
    assert_eq!(via_left.id, via_right.id);
    assert!(!via_left.aliased);
    assert!(via_right.aliased);

    let back = other.subs(via_left.id).unwrap()[0];
    assert!(back.aliased);
    assert_eq!(back.id, copy);
    assert_eq!(other.read_array(via_left.id, 0).unwrap(), vec![7, -7, 300]);
}

#[test]
fn test_reserialization_is_byte_identical() {
    let mut store = RecordStore::new();
    let root = fixtures::shared_cyclic_tree(&mut store).unwrap();
    let first = store.serialize(root).unwrap();

    let mut second_store = RecordStore::new();
    let parsed = second_store.deserialize(&first).unwrap();
    let second = second_store.serialize(parsed).unwrap();
    assert_eq!(first, second);

    let mut third_store = RecordStore::new();
    let reparsed = third_store.deserialize(&second).unwrap();
    assert_eq!(third_store.serialize(reparsed).unwrap(), first);
}

#[test]
fn test_deep_clone_is_independent() {
    let mut store = RecordStore::new();
    let root = fixtures::shared_cyclic_tree(&mut store).unwrap();
    let clone = store.deep_clone(root).unwrap();
    assert!(store.equals_content(root, &store, clone).unwrap());

    store.view_mut(clone).unwrap().write_uint(0, 4, 1).unwrap();
    assert!(!store.equals_content(root, &store, clone).unwrap());
    assert_eq!(store.view(root).unwrap().read_uint(0, 4).unwrap(), 0xDEAD_BEEF);
}

#[test]
fn test_versioning_counts_writes_and_shrinks_on_disable() {
    let mut store = RecordStore::new();
    let id = store.create(fixtures::record_type(), 8).unwrap();
    let plain_len = store.bytes(id).unwrap().len();

    store.set_versioning(id, true).unwrap();
    assert_eq!(store.version(id).unwrap(), Some(0));
    let versioned_len = store.bytes(id).unwrap().len();
    assert_eq!(versioned_len, plain_len + 2);

    let k = 7u16;
    for i in 0..k {
        store.view_mut(id).unwrap().write_uint(0, 2, u32::from(i)).unwrap();
    }
    assert_eq!(store.version(id).unwrap(), Some(k));

    store.set_versioning(id, false).unwrap();
    assert_eq!(store.version(id).unwrap(), None);
    assert_eq!(store.bytes(id).unwrap().len(), versioned_len - 2);
    assert_eq!(store.header(id).unwrap().length as usize, plain_len);
    assert_eq!(store.view(id).unwrap().read_uint(0, 2).unwrap(), u32::from(k - 1));
}

#[test]
fn test_merge_cascade() {
    let registry = MergeRegistry::with_defaults();
    let mut store = RecordStore::new();

    let root = store.create(fixtures::record_type(), 4).unwrap();
    store.view_mut(root).unwrap().write_uint(0, 4, 11).unwrap();
    let root_bytes = store.bytes(root).unwrap().to_vec();

    // No overlay: root itself, untouched.
    assert_eq!(store.cascade(root, None, &registry).unwrap(), root);
    assert_eq!(store.bytes(root).unwrap(), root_bytes.as_slice());

    // Complete overlay: byte-equal copy of the overlay tree.
    let overlay = store.create(fixtures::record_type(), 4).unwrap();
    let child = store.create_literal_array(&[4, 5]).unwrap();
    store.view_mut(overlay).unwrap().write_uint(0, 4, 22).unwrap();
    store.add_sub(overlay, child).unwrap();
    let merged = store.cascade(root, Some(overlay), &registry).unwrap();
    assert_ne!(merged, overlay);
    assert!(store.equals(merged, &store, overlay).unwrap());
    assert_eq!(store.bytes(merged).unwrap(), store.bytes(overlay).unwrap());
    assert_eq!(store.bytes(root).unwrap(), root_bytes.as_slice());

    // Incomplete literal array overlay: element-wise override.
    let base = store.create_literal_array(&[1, 2, 3]).unwrap();
    let patch = store.create_literal_array(&[9]).unwrap();
    store.set_incomplete(patch, true).unwrap();
    let merged = store.cascade(base, Some(patch), &registry).unwrap();
    assert_eq!(store.read_array(merged, 0).unwrap(), vec![9, 2, 3]);

    // Incomplete overlay of a type with no handler: root wins.
    let other = store.create(fixtures::record_type(), 4).unwrap();
    store.set_incomplete(other, true).unwrap();
    assert_eq!(store.cascade(root, Some(other), &registry).unwrap(), root);

    // Mismatched types are rejected.
    let foreign = store.create(RecordType::new(9).unwrap(), 4).unwrap();
    assert!(store.cascade(root, Some(foreign), &registry).is_err());
}

#[test]
fn test_tree_survives_agent_save_and_reload() {
    let (controller, source) = fixtures::memory_controller(ControllerConfig::default()).unwrap();
    let mut store = RecordStore::new();
    let root = fixtures::shared_cyclic_tree(&mut store).unwrap();

    let id = controller
        .add_agent(fixtures::managed(40, slot(0, 2), &[], 0).unwrap())
        .unwrap();
    controller.set_content(id, &store, root).unwrap();
    controller.save_agents().unwrap();
    assert_eq!(source.save_count(), 1);

    let (reloaded, _) = fixtures::memory_controller(ControllerConfig::default()).unwrap();
    reloaded.add_source(bale_common::types::GroupId::new(0), source);
    let found = reloaded
        .find_by_reference(ReferenceId::new(40))
        .unwrap()
        .unwrap();

    let mut other = RecordStore::new();
    let copy = reloaded.agent(found).unwrap().content(&mut other).unwrap();
    assert!(store.equals_content(root, &other, copy).unwrap());
}
