//! Local Async Cluster Tests
//!
//! Keeper runtimes on tokio, connected through the in-memory network, with
//! every message passing through the wire codec.

use distconf_core::effects::StorageEffects;
use distconf_core::{FileConfigStore, KeeperConfig, NodeId, StorageConfig};
use distconf_testkit::{init_test_tracing, LocalCluster};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn ids(count: u32) -> Vec<NodeId> {
    (1..=count).map(NodeId).collect()
}

fn fast_config(seed: u64) -> KeeperConfig {
    KeeperConfig {
        quorum_check_timeout_ms: 500,
        bind_retry_min_ms: 10,
        bind_retry_max_ms: 50,
        rng_seed: Some(seed),
    }
}

#[tokio::test(start_paused = true)]
async fn local_cluster_converges_and_propagates_config() {
    init_test_tracing();
    let initial = BTreeMap::from([(NodeId(2), StorageConfig::new(3, b"hello".to_vec()))]);
    let cluster = LocalCluster::start_in_memory(&ids(4), &fast_config(1), &initial);

    let report = cluster
        .wait_for_convergence(400, Duration::from_millis(25))
        .await
        .unwrap();
    assert_eq!(report.root(), Some(4));
    // let the last store tasks finish
    tokio::time::sleep(Duration::from_millis(100)).await;

    for id in ids(4) {
        let persisted = cluster.persisted(id).await.unwrap().unwrap();
        assert_eq!(persisted.blob, b"hello".to_vec(), "node {id}");
        assert!(persisted.generation >= 4);
    }
    assert!(cluster.network().delivered() > 0);

    let page = cluster.handle(NodeId(4)).unwrap().status_page().await.unwrap();
    assert!(page.contains("Distributed config keeper on node 4"));
    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stopped_root_is_replaced() {
    init_test_tracing();
    let mut cluster = LocalCluster::start_in_memory(&ids(4), &fast_config(2), &BTreeMap::new());
    cluster
        .wait_for_convergence(400, Duration::from_millis(25))
        .await
        .unwrap();

    cluster.stop_node(NodeId(4)).await;
    let report = cluster
        .wait_for_convergence(400, Duration::from_millis(25))
        .await
        .unwrap();
    assert_eq!(report.root(), Some(3));
    assert_eq!(cluster.node_ids(), ids(3));
    cluster.shutdown().await;
}

#[tokio::test]
async fn file_backed_cluster_persists_config() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let seeded = FileConfigStore::new(dir.path().join("node-1.cfg"));
    seeded
        .store_persisted_config(&StorageConfig::new(5, b"on disk".to_vec()))
        .await
        .unwrap();

    let root = dir.path().to_path_buf();
    let cluster = LocalCluster::start(&ids(3), &fast_config(3), |id| -> Arc<dyn StorageEffects> {
        Arc::new(FileConfigStore::new(root.join(format!("node-{id}.cfg"))))
    });
    let report = cluster
        .wait_for_convergence(400, Duration::from_millis(25))
        .await
        .unwrap();
    assert_eq!(report.root(), Some(3));
    tokio::time::sleep(Duration::from_millis(100)).await;
    cluster.shutdown().await;

    for id in ids(3) {
        let store = FileConfigStore::new(dir.path().join(format!("node-{id}.cfg")));
        let persisted = store.load_persisted_config().await.unwrap().unwrap();
        assert_eq!(persisted.blob, b"on disk".to_vec(), "node {id}");
        assert!(persisted.generation > 5);
    }
}
