//! Import driven through the HTTP API.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use drift_api::{ApiServer, ApiServerConfig, ImportResponse, LogKeyResponse};
use drift_integration_tests::{ClusterOptions, TestCluster, test_data};
use http_body_util::BodyExt;
use tower::ServiceExt;

const TOKEN: &str = "integration-token";
const USER: u64 = 21;

fn import(object: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/import")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {TOKEN}"))
        .body(Body::from(serde_json::json!({ "object": object }).to_string()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

#[tokio::test]
async fn test_http_import_runs_pipeline() {
    let cluster = TestCluster::start(ClusterOptions::clustered(1)).await;
    let node = cluster.node(0);
    let router = ApiServer::new(ApiServerConfig {
        node: node.service.node().clone(),
        tokens: HashMap::from([(TOKEN.to_string(), USER)]),
    })
    .into_router();

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/api/log/key").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let key: LogKeyResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(key.key, hex::encode(node.public_key().as_bytes()));

    let announced = cluster.announce(&test_data(100_000, 9));
    let response = router
        .clone()
        .oneshot(import(&announced.identifier()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: ImportResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body.hash, announced.hash.to_hex());

    node.settle().await;
    let record = node.meta.get_upload(&announced.hash).unwrap().unwrap();
    assert_eq!(record.user_id, USER);

    let response = router
        .oneshot(import(&announced.identifier()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(error["error"], "object already exists");

    cluster.shutdown();
}
