//! Simulated Failure Tests
//!
//! Crashes and restarts injected into a settled cluster: the survivors must
//! rebuild a single tree and the configuration must survive.

use distconf_core::{KeeperConfig, NodeId, StorageConfig};
use distconf_testkit::{assert_converged, init_test_tracing, SimCluster};

const MAX_STEPS: usize = 200_000;

fn settled_cluster(nodes: u32, seed: u64) -> SimCluster {
    let config = KeeperConfig {
        rng_seed: Some(seed),
        ..KeeperConfig::default()
    };
    let mut sim = SimCluster::with_nodes(nodes, config);
    sim.persist(NodeId(1), StorageConfig::new(2, b"payload".to_vec()));
    sim.start();
    sim.run_until_quiescent(MAX_STEPS).expect("cluster settles");
    assert_converged(&sim.statuses());
    sim
}

#[test]
fn losing_the_root_promotes_the_next_highest() {
    init_test_tracing();
    for seed in 0..8 {
        let mut sim = settled_cluster(5, seed);
        let before = sim.keeper(NodeId(5)).unwrap().storage_config().clone();

        sim.kill(NodeId(5));
        sim.run_until_quiescent(MAX_STEPS).expect("survivors settle");

        assert_eq!(assert_converged(&sim.statuses()), 4, "seed {seed}");
        for id in 1..=4 {
            assert_eq!(sim.keeper(NodeId(id)).unwrap().storage_config(), &before);
        }
    }
}

#[test]
fn losing_an_inner_node_reattaches_its_subtree() {
    init_test_tracing();
    for seed in 0..8 {
        let mut sim = settled_cluster(7, seed);
        let inner = (1..7)
            .map(NodeId)
            .find(|&id| !sim.keeper(id).unwrap().bound_nodes().is_empty());
        let Some(inner) = inner else {
            continue;
        };

        sim.kill(inner);
        sim.run_until_quiescent(MAX_STEPS).expect("survivors settle");

        assert_eq!(assert_converged(&sim.statuses()), 7, "seed {seed}");
        let root = sim.keeper(NodeId(7)).unwrap();
        assert_eq!(root.bound_nodes().all_bound_count(), 5);
        assert!(!root.bound_nodes().is_bound(inner));
    }
}

#[test]
fn restarted_node_reloads_and_rejoins() {
    init_test_tracing();
    let mut sim = settled_cluster(4, 21);
    let persisted = sim.persisted(NodeId(2)).cloned().expect("node 2 persisted");

    sim.kill(NodeId(2));
    sim.run_until_quiescent(MAX_STEPS).expect("survivors settle");
    assert_eq!(sim.keeper(NodeId(4)).unwrap().bound_nodes().all_bound_count(), 2);

    sim.restart(NodeId(2));
    while !sim.keeper(NodeId(2)).unwrap().is_steady() {
        assert!(sim.step().expect("consistent step"));
    }
    assert_eq!(sim.keeper(NodeId(2)).unwrap().storage_config(), &persisted);

    sim.run_until_quiescent(MAX_STEPS).expect("cluster settles again");
    assert_eq!(assert_converged(&sim.statuses()), 4);
    assert_eq!(sim.keeper(NodeId(4)).unwrap().bound_nodes().all_bound_count(), 3);
}

#[test]
fn lone_survivor_becomes_root() {
    init_test_tracing();
    let mut sim = settled_cluster(3, 4);
    sim.kill(NodeId(3));
    sim.kill(NodeId(2));
    sim.run_until_quiescent(MAX_STEPS).expect("survivor settles");

    assert_eq!(sim.roots().into_iter().collect::<Vec<_>>(), vec![NodeId(1)]);
    let survivor = sim.keeper(NodeId(1)).unwrap();
    assert!(survivor.binding().is_none());
    assert!(survivor.subscriptions().is_empty());
}
