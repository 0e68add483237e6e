//! Expansion policies: equivalence, slack absorption, array-mate handling.

use bale_common::config::{ControllerConfig, ExpansionPolicy};
use bale_common::types::ReferenceId;
use bale_controller::{AgentId, Growth, RecordController};
use bale_record::ManagedHeader;
use bale_test::fixtures::{self, slot, POLICIES};

/// Loads three records `(1, 2, 3)` of one envelope under `policy`.
fn loaded(policy: ExpansionPolicy, slack: usize) -> (RecordController, [AgentId; 3]) {
    let config = ControllerConfig::default().with_expansion_policy(policy);
    let (controller, source) = fixtures::memory_controller(config).unwrap();
    let bytes = fixtures::envelope_bytes(
        slot(0, 0),
        &[(1, &[1; 6], slack), (2, &[2; 6], slack), (3, &[3; 6], slack)],
    )
    .unwrap();
    source.insert(slot(0, 0).instance, bytes);
    controller.load_all_agents().unwrap();

    let find = |r: u16| {
        controller
            .find_by_reference(ReferenceId::new(r))
            .unwrap()
            .unwrap()
    };
    let ids = [find(1), find(2), find(3)];
    (controller, ids)
}

fn assert_consistent(header: &ManagedHeader, bytes: &[u8]) {
    assert_eq!(header.total_length as usize, bytes.len());
    assert_eq!(
        header.total_length as u64,
        u64::from(header.static_length)
            + u64::from(header.dynamic_length)
            + u64::from(header.data_length)
            + u64::from(header.buffer_length)
    );
}

#[test]
fn test_expansion_equivalence_across_policies() {
    let n = 5;
    for policy in POLICIES {
        let (controller, [a, b, c]) = loaded(policy, 0);
        let agent = controller.agent(b).unwrap();
        let before = agent.header().unwrap();
        let data_before = agent.data().unwrap();

        let growth = agent.expand_data(n).unwrap();
        let expected = match policy {
            ExpansionPolicy::Expulse => Growth::Expelled,
            ExpansionPolicy::Single | ExpansionPolicy::Multiple => Growth::Spliced,
        };
        assert_eq!(growth, expected, "{policy:?}");

        let after = agent.header().unwrap();
        let bytes = agent.bytes().unwrap();
        assert_eq!(after.data_length, before.data_length + n as u32, "{policy:?}");
        assert_consistent(&after, &bytes);
        let data = agent.data().unwrap();
        assert_eq!(&data[..data_before.len()], data_before.as_slice(), "{policy:?}");
        assert!(data[data_before.len()..].iter().all(|&byte| byte == 0));
        assert!(agent.is_dirty().unwrap());

        for (mate, fill) in [(a, 1u8), (c, 3u8)] {
            let mate = controller.agent(mate).unwrap();
            assert_eq!(mate.data().unwrap(), vec![fill; 6], "{policy:?}");
            assert!(!mate.is_dirty().unwrap(), "{policy:?}");
        }
    }
}

#[test]
fn test_detached_growth_matches_managed_growth() {
    let n = 5;
    let mut detached = fixtures::managed(9, slot(0, 0), &[4; 6], 0).unwrap();
    detached.expand_data(n).unwrap();
    let header = detached.header().unwrap();
    assert_eq!(header.data_length, 6 + n as u32);
    assert_consistent(&header, detached.bytes());
    assert_eq!(&detached.data().unwrap()[..6], &[4; 6]);

    for policy in POLICIES {
        let (controller, [_, b, _]) = loaded(policy, 0);
        controller.expand_data(b, n).unwrap();
        let managed = controller.agent(b).unwrap().header().unwrap();
        assert_eq!(managed.data_length, header.data_length, "{policy:?}");
        assert_eq!(managed.total_length, header.total_length, "{policy:?}");
    }
}

#[test]
fn test_slack_absorption_keeps_backing() {
    for policy in POLICIES {
        let (controller, [a, b, c]) = loaded(policy, 8);
        let agent = controller.agent(b).unwrap();
        let backing = agent.backing().unwrap();
        let mates = [
            controller.agent(a).unwrap().backing().unwrap(),
            controller.agent(c).unwrap().backing().unwrap(),
        ];

        assert_eq!(agent.expand_data(8).unwrap(), Growth::InPlace, "{policy:?}");
        assert_eq!(agent.backing().unwrap(), backing, "{policy:?}");
        let header = agent.header().unwrap();
        assert_eq!(header.data_length, 14);
        assert_eq!(header.buffer_length, 0);
        assert_consistent(&header, &agent.bytes().unwrap());

        assert_eq!(controller.agent(a).unwrap().backing().unwrap(), mates[0]);
        assert_eq!(controller.agent(c).unwrap().backing().unwrap(), mates[1]);
    }
}

#[test]
fn test_expulse_leaves_mates_in_place() {
    let (controller, [a, b, c]) = loaded(ExpansionPolicy::Expulse, 0);
    let shared = controller.agent(a).unwrap().backing().unwrap();
    assert_eq!(controller.agent(b).unwrap().backing().unwrap(), shared);

    controller.expand_data(b, 3).unwrap();
    assert_ne!(controller.agent(b).unwrap().backing().unwrap().buffer, shared.buffer);
    assert_eq!(controller.agent(a).unwrap().backing().unwrap(), shared);
    assert_eq!(controller.agent(c).unwrap().backing().unwrap(), shared);

    // A private buffer is resized directly from then on.
    assert_eq!(controller.expand_data(b, 3).unwrap(), Growth::Spliced);
    assert_eq!(controller.stats().expulsions.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[test]
fn test_single_shifts_later_mates() {
    let (controller, [a, b, c]) = loaded(ExpansionPolicy::Single, 0);
    let handle_a = controller.agent(a).unwrap().handle().unwrap().unwrap();
    let handle_c = controller.agent(c).unwrap().handle().unwrap().unwrap();

    controller.expand_data(b, 10).unwrap();
    let moved_a = controller.agent(a).unwrap().handle().unwrap().unwrap();
    let moved_c = controller.agent(c).unwrap().handle().unwrap().unwrap();
    assert_eq!(moved_a, handle_a);
    assert_eq!(moved_c.buffer, handle_c.buffer);
    assert_eq!(moved_c.offset, handle_c.offset + 10);
    assert_eq!(controller.agent(c).unwrap().data().unwrap(), vec![3; 6]);
}

#[test]
fn test_multiple_gives_private_buffers() {
    let (controller, [a, b, c]) = loaded(ExpansionPolicy::Multiple, 0);
    let buffers: Vec<_> = [a, b, c]
        .iter()
        .map(|&id| controller.agent(id).unwrap().backing().unwrap().buffer)
        .collect();
    assert_ne!(buffers[0], buffers[1]);
    assert_ne!(buffers[1], buffers[2]);
    assert_ne!(buffers[0], buffers[2]);
}

#[test]
fn test_default_slack_reserved_on_growth() {
    let config = ControllerConfig::default().with_default_slack(16);
    let (controller, _) = fixtures::memory_controller(config).unwrap();
    let id = controller
        .add_agent(fixtures::managed(1, slot(0, 0), &[1, 2], 0).unwrap())
        .unwrap();

    assert_eq!(controller.expand_data(id, 4).unwrap(), Growth::Spliced);
    let header = controller.agent(id).unwrap().header().unwrap();
    assert_eq!(header.data_length, 6);
    assert_eq!(header.buffer_length, 16);

    let backing = controller.agent(id).unwrap().backing().unwrap();
    assert_eq!(controller.expand_data(id, 10).unwrap(), Growth::InPlace);
    assert_eq!(controller.agent(id).unwrap().backing().unwrap(), backing);
}

#[test]
fn test_trim_and_reset() {
    let (controller, [_, b, _]) = loaded(ExpansionPolicy::Single, 8);
    controller.buffer_trim(b).unwrap();
    let header = controller.agent(b).unwrap().header().unwrap();
    assert_eq!(header.buffer_length, 0);
    assert_eq!(controller.agent(b).unwrap().data().unwrap(), vec![2; 6]);

    controller.expand_reset_array_data(b, 3).unwrap();
    assert_eq!(controller.agent(b).unwrap().data().unwrap(), vec![0; 3]);

    controller.expand_buffer(b, 5).unwrap();
    let header = controller.agent(b).unwrap().header().unwrap();
    assert_eq!(header.buffer_length, 5);
    assert_consistent(&header, &controller.agent(b).unwrap().bytes().unwrap());
}

#[test]
fn test_grown_agents_persist_under_every_policy() {
    for policy in POLICIES {
        let config = ControllerConfig::default().with_expansion_policy(policy);
        let (controller, source) = fixtures::memory_controller(config.clone()).unwrap();
        source.insert(
            slot(0, 0).instance,
            fixtures::envelope_bytes(slot(0, 0), &[(1, &[1; 4], 0), (2, &[2; 4], 2)]).unwrap(),
        );
        controller.load_all_agents().unwrap();
        let first = controller.find_by_reference(ReferenceId::new(1)).unwrap().unwrap();
        controller.expand_data(first, 6).unwrap();
        controller.agent(first).unwrap().write_bytes(4, &[9; 6]).unwrap();
        controller.save_agents().unwrap();

        let reloaded = RecordController::new(config).unwrap();
        reloaded.add_source(bale_common::types::GroupId::new(0), source);
        let first = reloaded.find_by_reference(ReferenceId::new(1)).unwrap().unwrap();
        let second = reloaded.find_by_reference(ReferenceId::new(2)).unwrap().unwrap();
        assert_eq!(
            reloaded.agent(first).unwrap().data().unwrap(),
            [[1u8; 4].as_slice(), [9u8; 6].as_slice()].concat(),
            "{policy:?}"
        );
        assert_eq!(reloaded.agent(second).unwrap().data().unwrap(), vec![2; 4]);
        assert_eq!(reloaded.root(), Some(first));
    }
}
