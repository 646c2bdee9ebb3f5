//! Presence leases and self-eviction across nodes.

use std::time::Duration;

use drift_cluster::{MembershipConfig, MembershipEvent};
use drift_integration_tests::{ClusterOptions, TestCluster};
use tokio::sync::broadcast;

async fn next_matching(
    events: &mut broadcast::Receiver<MembershipEvent>,
    wanted: impl Fn(&MembershipEvent) -> bool,
) -> MembershipEvent {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let event = events.recv().await.expect("membership events closed");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for membership event")
}

#[tokio::test]
async fn test_expired_node_removes_itself_exactly_once() {
    let cluster = TestCluster::start(ClusterOptions::clustered(2)).await;
    let (evicted, survivor) = (cluster.node(0), cluster.node(1));

    let membership = evicted.service.membership().unwrap();
    let mut evicted_events = membership.subscribe();
    let mut survivor_events = survivor.service.membership().unwrap().subscribe();

    assert!(cluster.coordinator.expire_lease(membership.lease()));

    next_matching(&mut evicted_events, |e| *e == MembershipEvent::SelfEvicted).await;
    let expired_id = evicted.identity.node_id();
    next_matching(&mut survivor_events, |e| {
        *e == MembershipEvent::PeerExpired(expired_id)
    })
    .await;

    // A second expiry finds nothing to delete.
    assert!(!cluster.coordinator.expire_lease(membership.lease()));
    tokio::task::yield_now().await;

    assert_eq!(evicted.log.removed(), vec![evicted.public_key()]);
    // Peers only observe the expiry.
    assert!(survivor.log.removed().is_empty());

    cluster.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_renewed_lease_outlives_its_ttl() {
    let options = ClusterOptions {
        membership: MembershipConfig {
            lease_ttl: Duration::from_secs(60),
            renew_interval: Some(Duration::from_secs(20)),
        },
        ..ClusterOptions::clustered(1)
    };
    let cluster = TestCluster::start(options).await;
    let node = cluster.node(0);
    let mut events = node.service.membership().unwrap().subscribe();

    tokio::time::sleep(Duration::from_secs(300)).await;

    assert!(node.service.membership().unwrap().is_running());
    assert!(events.try_recv().is_err());
    assert!(node.log.removed().is_empty());

    cluster.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_unrenewed_lease_evicts_after_one_ttl() {
    let options = ClusterOptions {
        membership: MembershipConfig {
            lease_ttl: Duration::from_secs(60),
            renew_interval: None,
        },
        ..ClusterOptions::clustered(1)
    };
    let cluster = TestCluster::start(options).await;
    let node = cluster.node(0);
    let mut events = node.service.membership().unwrap().subscribe();

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(node.log.removed().is_empty());

    next_matching(&mut events, |e| *e == MembershipEvent::SelfEvicted).await;
    assert_eq!(node.log.removed(), vec![node.public_key()]);

    cluster.shutdown();
}
