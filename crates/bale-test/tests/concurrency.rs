//! Concurrency: independent growth, agent locking, contested saves.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bale_common::config::{ControllerConfig, ExpansionPolicy};
use bale_controller::{AgentId, RecordController};
use bale_test::fixtures::{self, slot};
use bale_test::workload::run_concurrently;

fn controller_with_agents(count: u16, policy: ExpansionPolicy) -> (Arc<RecordController>, Vec<AgentId>) {
    let config = ControllerConfig::default().with_expansion_policy(policy);
    let (controller, _) = fixtures::memory_controller(config).unwrap();
    let ids = (1..=count)
        .map(|r| {
            controller
                .add_agent(fixtures::managed(r, slot(0, 0), &[0; 4], 0).unwrap())
                .unwrap()
        })
        .collect();
    (Arc::new(controller), ids)
}

#[test]
fn test_growth_of_unrelated_agent_does_not_wait_for_lock() {
    let (controller, ids) = controller_with_agents(2, ExpansionPolicy::Expulse);
    let (held, other) = (ids[0], ids[1]);
    assert_ne!(
        controller.agent(held).unwrap().backing().unwrap().buffer,
        controller.agent(other).unwrap().backing().unwrap().buffer
    );

    let (locked_tx, locked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let holder = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || {
            let agent = controller.agent(held).unwrap();
            let _guard = agent.lock().unwrap();
            locked_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
    };
    locked_rx.recv().unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let grower = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || {
            let agent = controller.agent(other).unwrap();
            let _guard = agent.lock().unwrap();
            for _ in 0..10 {
                agent.expand_data(4).unwrap();
            }
            done_tx.send(()).unwrap();
        })
    };

    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("growth of an unrelated agent blocked on another agent's lock");
    release_tx.send(()).unwrap();
    holder.join().unwrap();
    grower.join().unwrap();

    let header = controller.agent(other).unwrap().header().unwrap();
    assert_eq!(header.data_length, 44);
}

#[test]
fn test_parallel_growth_of_independent_agents() {
    for policy in fixtures::POLICIES {
        let (controller, ids) = controller_with_agents(4, policy);
        let reports = run_concurrently(ids.len(), |worker| {
            let agent = controller.agent(ids[worker]).unwrap();
            for round in 0..25u32 {
                agent.expand_data(2).unwrap();
                let at = 4 + 2 * round as usize;
                agent.write_uint(at, 2, worker as u32).unwrap();
            }
            agent.header().unwrap().data_length
        });

        for report in &reports {
            assert_eq!(report.value, 54, "{policy:?}");
            let data = controller.agent(ids[report.worker]).unwrap().data().unwrap();
            assert_eq!(&data[..4], &[0; 4]);
            assert!(data[4..]
                .chunks(2)
                .all(|pair| pair == [0, report.worker as u8]));
        }
    }
}

#[test]
fn test_locking_serializes_mutation() {
    let (controller, ids) = controller_with_agents(1, ExpansionPolicy::Single);
    let id = ids[0];
    let inside = AtomicBool::new(false);
    let overlaps = AtomicUsize::new(0);

    run_concurrently(4, |_| {
        for _ in 0..100 {
            let agent = controller.agent(id).unwrap();
            let _guard = agent.lock().unwrap();
            if inside.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            let value = agent.read_uint(0, 4).unwrap();
            thread::yield_now();
            agent.write_uint(0, 4, value + 1).unwrap();
            inside.store(false, Ordering::SeqCst);
        }
    });

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    let agent = controller.agent(id).unwrap();
    assert_eq!(agent.read_uint(0, 4).unwrap(), 400);
    assert!(!agent.is_locked().unwrap());
}

#[test]
fn test_saves_race_with_writers() {
    let (controller, source) = fixtures::memory_controller(ControllerConfig::default()).unwrap();
    let controller = Arc::new(controller);
    let ids: Vec<AgentId> = (1..=3)
        .map(|r| {
            controller
                .add_agent(fixtures::managed(r, slot(0, r % 2), &[0; 4], 0).unwrap())
                .unwrap()
        })
        .collect();

    run_concurrently(4, |worker| {
        for round in 0..50u32 {
            if worker == 0 {
                controller.save_agents().unwrap();
            } else {
                let agent = controller.agent(ids[worker - 1]).unwrap();
                let _guard = agent.lock().unwrap();
                agent.write_uint(0, 4, round).unwrap();
            }
        }
    });
    controller.wait_deferred().unwrap();
    controller.save_agents().unwrap();
    controller.wait_deferred().unwrap();

    for &id in &ids {
        assert!(!controller.agent(id).unwrap().is_dirty().unwrap());
    }
    let reloaded = RecordController::new(ControllerConfig::default()).unwrap();
    reloaded.add_source(bale_common::types::GroupId::new(0), source);
    reloaded.load_all_agents().unwrap();
    assert_eq!(reloaded.agent_count(), 3);
    for agent in reloaded.agents() {
        assert_eq!(reloaded.agent(agent).unwrap().read_uint(0, 4).unwrap(), 49);
    }
}
