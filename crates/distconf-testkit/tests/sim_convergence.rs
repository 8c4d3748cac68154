//! Simulated Cluster Convergence Tests
//!
//! Whole clusters of keepers run in the deterministic simulator until no
//! event or timer is left, then must form a single tree under the highest
//! node id and agree on one configuration.

use distconf_core::{KeeperConfig, NodeId, StorageConfig};
use assert_matches::assert_matches;
use distconf_testkit::{assert_converged, init_test_tracing, SimCluster, SimError};

const MAX_STEPS: usize = 200_000;

fn seeded(seed: u64) -> KeeperConfig {
    KeeperConfig {
        rng_seed: Some(seed),
        ..KeeperConfig::default()
    }
}

fn settle(sim: &mut SimCluster) -> u32 {
    sim.run_until_quiescent(MAX_STEPS).expect("cluster settles");
    assert_converged(&sim.statuses())
}

#[test]
fn single_node_is_its_own_root() {
    init_test_tracing();
    let mut sim = SimCluster::with_nodes(1, seeded(1));
    sim.start();
    assert_eq!(settle(&mut sim), 1);
    assert!(sim.keeper(NodeId(1)).unwrap().bound_nodes().is_empty());
}

#[test]
fn clusters_settle_under_the_highest_id() {
    init_test_tracing();
    for seed in 0..16 {
        let mut sim = SimCluster::with_nodes(6, seeded(seed));
        sim.start();
        assert_eq!(settle(&mut sim), 6, "seed {seed}");
        assert_eq!(sim.roots().into_iter().collect::<Vec<_>>(), vec![NodeId(6)]);

        let root = sim.keeper(NodeId(6)).unwrap();
        assert_eq!(root.bound_nodes().all_bound_count(), 5, "seed {seed}");
        for id in 1..=5 {
            let keeper = sim.keeper(NodeId(id)).unwrap();
            let parent = keeper.binding().map(|binding| binding.node_id).unwrap();
            assert!(parent > NodeId(id), "seed {seed}: {id} bound below {parent}");
        }
    }
}

#[test]
fn seeded_config_reaches_every_node() {
    init_test_tracing();
    let mut sim = SimCluster::with_nodes(5, seeded(3));
    sim.persist(NodeId(2), StorageConfig::new(3, b"hello".to_vec()));
    sim.start();
    settle(&mut sim);

    let agreed = sim.keeper(NodeId(5)).unwrap().storage_config().clone();
    assert_eq!(agreed.blob, b"hello".to_vec());
    assert!(agreed.generation >= 4);
    for id in 1..=5 {
        assert_eq!(sim.keeper(NodeId(id)).unwrap().storage_config(), &agreed);
        assert_eq!(sim.persisted(NodeId(id)), Some(&agreed), "node {id} persisted");
    }
}

#[test]
fn highest_generation_wins() {
    init_test_tracing();
    let mut sim = SimCluster::with_nodes(5, seeded(11));
    sim.persist(NodeId(1), StorageConfig::new(2, b"older".to_vec()));
    sim.persist(NodeId(4), StorageConfig::new(20, b"newer".to_vec()));
    sim.start();
    settle(&mut sim);

    let agreed = sim.keeper(NodeId(1)).unwrap().storage_config().clone();
    assert_eq!(agreed.blob, b"newer".to_vec());
    assert!(agreed.generation > 20);
}

#[test]
fn agreeing_cluster_keeps_its_generation() {
    init_test_tracing();
    let shared = StorageConfig::new(9, b"same".to_vec());
    let mut sim = SimCluster::with_nodes(4, seeded(5));
    for id in 1..=4 {
        sim.persist(NodeId(id), shared.clone());
    }
    sim.start();
    settle(&mut sim);

    for id in 1..=4 {
        assert_eq!(sim.keeper(NodeId(id)).unwrap().storage_config(), &shared);
    }
}

#[test]
fn failed_load_still_receives_the_cluster_config() {
    init_test_tracing();
    let mut sim = SimCluster::with_nodes(4, seeded(8));
    sim.persist(NodeId(3), StorageConfig::new(1, b"cfg".to_vec()));
    sim.fail_loads(NodeId(2));
    sim.start();
    settle(&mut sim);

    let node2 = sim.keeper(NodeId(2)).unwrap();
    assert_eq!(node2.storage_config().blob, b"cfg".to_vec());
}

#[test]
fn step_budget_is_enforced() {
    let mut sim = SimCluster::with_nodes(5, seeded(2));
    sim.start();
    assert_matches!(sim.run_until_quiescent(3), Err(SimError::StepLimit { steps: 3 }));

    // the run can be resumed afterwards
    settle(&mut sim);
    assert!(sim.steps() > 3);
}
