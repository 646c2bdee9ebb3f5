//! Log bootstrap across several nodes.

use drift_cluster::membership::NODE_PREFIX;
use drift_cluster::{CoordinationStore, Role};
use drift_integration_tests::{ClusterOptions, TestCluster};

#[tokio::test]
async fn test_concurrent_start_elects_single_bootstrapper() {
    let cluster = TestCluster::start(ClusterOptions::clustered(5)).await;

    let leaders: Vec<_> = cluster
        .nodes
        .iter()
        .filter(|n| n.service.bootstrap().unwrap().role == Role::Leader)
        .collect();
    assert_eq!(leaders.len(), 1, "exactly one node bootstraps the log");
    let leader = leaders[0];
    let root = leader.public_key();

    for node in &cluster.nodes {
        let outcome = node.service.bootstrap().unwrap();
        assert_eq!(outcome.log_key, root);
        if node.identity.node_id() != leader.identity.node_id() {
            assert_eq!(
                outcome.role,
                Role::Follower {
                    bootstrapper: leader.identity.node_id()
                }
            );
        }

        // Every node opened the log under the same root, signing as itself.
        let init = node.log.init_params().expect("log initialized");
        assert_eq!(init.log_key, root);
        assert_eq!(init.node_key, node.public_key());
    }

    cluster.shutdown();
}

#[tokio::test]
async fn test_late_joiner_follows_recorded_bootstrapper() {
    let mut cluster = TestCluster::start(ClusterOptions::clustered(2)).await;
    let root = cluster.node(0).service.bootstrap().unwrap().log_key;

    let index = cluster.add_node().await;
    let outcome = cluster.node(index).service.bootstrap().unwrap();
    assert!(matches!(outcome.role, Role::Follower { .. }));
    assert_eq!(outcome.log_key, root);

    cluster.shutdown();
}

#[tokio::test]
async fn test_standalone_nodes_root_their_own_logs() {
    let cluster = TestCluster::start(ClusterOptions::standalone(3)).await;

    let mut roots = Vec::new();
    for node in &cluster.nodes {
        let outcome = node.service.bootstrap().unwrap();
        assert_eq!(outcome.role, Role::Standalone);
        assert_eq!(outcome.log_key, node.public_key());
        assert!(node.service.membership().is_none());
        roots.push(outcome.log_key.to_bytes());
    }
    roots.sort();
    roots.dedup();
    assert_eq!(roots.len(), 3);

    // Nothing touched the coordination store.
    assert!(cluster.coordinator.get_prefix("/").await.unwrap().is_empty());

    cluster.shutdown();
}

#[tokio::test]
async fn test_every_clustered_node_registers_presence() {
    let cluster = TestCluster::start(ClusterOptions::clustered(3)).await;

    let members = cluster.coordinator.get_prefix(NODE_PREFIX).await.unwrap();
    assert_eq!(members.len(), 3);
    for node in &cluster.nodes {
        let key = node.public_key().to_bytes();
        assert!(members.iter().any(|(_, value)| value.as_slice() == key));
        // A node's own key is part of the member set it seeds.
        assert!(node.log.nodes().contains(&key));
    }

    cluster.shutdown();
}
