//! End-to-end import pipeline tests: import → verify → upload → publish.

use drift_integration_tests::{ClusterOptions, PROTOCOL, STORAGE, TestCluster, test_data};
use drift_store::ObjectStore;
use drift_sync::{STAGING_BUCKET, SyncError};
use tokio::io::AsyncReadExt;

const REQUESTER: u64 = 11;

#[tokio::test]
async fn test_import_produces_durable_copy_and_publishes_it() {
    let cluster = TestCluster::start(ClusterOptions::standalone(1)).await;
    let node = cluster.node(0);

    let data = test_data(200_000, 1);
    let announced = cluster.announce(&data);
    let hash = node
        .service
        .node()
        .import(&announced.identifier(), REQUESTER)
        .await
        .unwrap();
    assert_eq!(hash, announced.hash);
    node.settle().await;

    let record = node.meta.get_upload(&hash).unwrap().expect("upload record");
    assert_eq!(record.protocol, STORAGE);
    assert_eq!(record.size, data.len() as u64);
    assert_eq!(record.user_id, REQUESTER);
    assert!(record.confirmed);

    // The durable copy holds the announced bytes.
    let mut download = node.store.get_object(STORAGE, &hash.to_hex()).await.unwrap();
    let mut stored = Vec::new();
    download.reader.read_to_end(&mut stored).await.unwrap();
    assert_eq!(stored, data);

    // Staging copy is gone, the upload was announced to the log.
    assert!(!node
        .store
        .has_object(STAGING_BUCKET, &format!("{PROTOCOL}-{}", hash.to_hex())));
    assert_eq!(node.log.publish_count(), 1);
    assert_eq!(node.service.jobs().completed(), 2);
    assert_eq!(node.service.jobs().failed(), 0);

    cluster.shutdown();
}

#[tokio::test]
async fn test_second_node_imports_from_first_nodes_copy() {
    let cluster = TestCluster::start(ClusterOptions::standalone(2)).await;
    let (first, second) = (cluster.node(0), cluster.node(1));

    let data = test_data(150_000, 2);
    let announced = cluster.announce(&data);
    first
        .service
        .node()
        .import(&announced.identifier(), REQUESTER)
        .await
        .unwrap();
    first.settle().await;
    assert_eq!(first.log.publish_count(), 1);

    // The original copy goes bad; only the first node's upload still verifies.
    assert!(cluster.network.corrupt(&announced.key, 10));

    let hash = second
        .service
        .node()
        .import(&announced.identifier(), REQUESTER + 1)
        .await
        .unwrap();
    second.settle().await;

    let record = second.meta.get_upload(&hash).unwrap().expect("upload record");
    assert_eq!(record.user_id, REQUESTER + 1);
    assert_eq!(second.log.publish_count(), 1);

    cluster.shutdown();
}

#[tokio::test]
async fn test_repeated_imports_upload_once() {
    let cluster = TestCluster::start(ClusterOptions::standalone(1)).await;
    let node = cluster.node(0);
    let announced = cluster.announce(&test_data(80_000, 3));
    let identifier = announced.identifier();

    for _ in 0..10 {
        match node.service.node().import(&identifier, REQUESTER).await {
            Ok(hash) => assert_eq!(hash, announced.hash),
            Err(SyncError::AlreadyExists) => {}
            Err(e) => panic!("unexpected import error: {e}"),
        }
    }
    node.settle().await;

    assert_eq!(node.meta.all_uploads().unwrap().len(), 1);
    assert_eq!(node.log.publish_count(), 1);

    let err = node
        .service
        .node()
        .import(&identifier, REQUESTER)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AlreadyExists));
    assert_eq!(err.to_string(), "object already exists");

    cluster.shutdown();
}

#[tokio::test]
async fn test_interrupted_upload_rewinds_and_completes() {
    let cluster = TestCluster::start(ClusterOptions::standalone(1)).await;
    let node = cluster.node(0);
    let data = test_data(300_000, 4);
    let announced = cluster.announce(&data);

    node.store.interrupt_next_uploads(2);
    node.service
        .node()
        .import(&announced.identifier(), REQUESTER)
        .await
        .unwrap();
    node.settle().await;

    assert!(node.meta.get_upload(&announced.hash).unwrap().is_some());
    let mut download = node
        .store
        .get_object(STORAGE, &announced.hash.to_hex())
        .await
        .unwrap();
    let mut stored = Vec::new();
    download.reader.read_to_end(&mut stored).await.unwrap();
    assert_eq!(stored, data);

    cluster.shutdown();
}

#[tokio::test]
async fn test_scan_republishes_after_failed_announcement() {
    let cluster = TestCluster::start(ClusterOptions::standalone(1)).await;
    let node = cluster.node(0);
    let announced = cluster.announce(&test_data(50_000, 5));

    // The upload itself succeeds even though announcing it fails.
    node.log.fail_next_publishes(1);
    node.service
        .node()
        .import(&announced.identifier(), REQUESTER)
        .await
        .unwrap();
    node.settle().await;
    assert!(node.meta.get_upload(&announced.hash).unwrap().is_some());
    assert_eq!(node.log.publish_count(), 0);

    let published = node.service.node().scan_objects().await.unwrap();
    assert_eq!(published, 1);
    assert_eq!(node.log.publish_count(), 1);

    cluster.shutdown();
}

#[tokio::test]
async fn test_import_rejects_unannounced_and_foreign_objects() {
    let cluster = TestCluster::start(ClusterOptions::standalone(1)).await;
    let node = cluster.node(0).service.node();

    let missing = drift_types::ContentHash::from_data(b"never announced");
    let err = node
        .import(&format!("{PROTOCOL}:{missing}"), REQUESTER)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "object not found");

    let err = node.import("unknown:00", REQUESTER).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid object");

    cluster.shutdown();
}
