//! Tests for the drift-api crate.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use drift_jobs::{JobConfig, JobRunner};
use drift_log::MemoryLog;
use drift_meta::MetaStore;
use drift_store::{MemoryNetwork, MemoryStore};
use drift_sync::{HashProtocol, ProtocolRegistry, SyncDeps, SyncNode};
use drift_types::{ContentHash, UploadNotifier};
use ed25519_dalek::SigningKey;
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::{ApiServer, ApiServerConfig, ImportResponse, LogKeyResponse};

const TOKEN: &str = "secret-token";
const USER: u64 = 7;

struct TestApp {
    router: axum::Router,
    store: Arc<MemoryStore>,
    log: Arc<MemoryLog>,
    meta: Arc<MetaStore>,
    log_key: [u8; 32],
    _runner: JobRunner,
}

fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new(MemoryNetwork::new()));
    let log = Arc::new(MemoryLog::new());
    let meta = Arc::new(MetaStore::open_temporary().unwrap());
    let deps = SyncDeps {
        log: log.clone(),
        objects: store.clone(),
        storage: store.clone(),
        meta: meta.clone(),
        protocols: ProtocolRegistry::new().with(Arc::new(HashProtocol::new("proto1", "store1"))),
        notifier: UploadNotifier::new(),
    };
    let (queue, runner) = drift_jobs::channel(meta.clone(), JobConfig::default());
    let log_key = SigningKey::from_bytes(&[4; 32]).verifying_key();
    let node = Arc::new(SyncNode::new(true, log_key, deps, queue));

    let tokens = HashMap::from([(TOKEN.to_string(), USER)]);
    let router = ApiServer::new(ApiServerConfig { node, tokens }).into_router();
    TestApp {
        router,
        store,
        log,
        meta,
        log_key: log_key.to_bytes(),
        _runner: runner,
    }
}

fn import_request(token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/import")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_log_key() {
    let app = test_app();
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/log/key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: LogKeyResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body.key, hex::encode(app.log_key));
}

#[tokio::test]
async fn test_import_requires_auth() {
    let app = test_app();
    let body = r#"{"object":"proto1:00"}"#;

    let response = app
        .router
        .clone()
        .oneshot(import_request(None, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .oneshot(import_request(Some("wrong"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_import_validation_errors_are_bad_requests() {
    let app = test_app();
    let missing = ContentHash::from_data(b"missing");

    for (object, message) in [
        ("other:00".to_string(), "invalid object"),
        (format!("proto1:{missing}"), "object not found"),
    ] {
        let body = serde_json::json!({ "object": object }).to_string();
        let response = app
            .router
            .clone()
            .oneshot(import_request(Some(TOKEN), &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], message);
    }
}

#[tokio::test]
async fn test_import_malformed_body() {
    let app = test_app();
    let response = app
        .router
        .oneshot(import_request(Some(TOKEN), "not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_import_queues_verification_for_requester() {
    let app = test_app();
    let meta = app.store.seed_object("proto1", b"hello drift");
    app.log.seed(meta.clone());

    let body = serde_json::json!({ "object": meta.identifier() }).to_string();
    let response = app
        .router
        .oneshot(import_request(Some(TOKEN), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: ImportResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body.hash, meta.hash.to_hex());

    let jobs = app.meta.list_jobs().unwrap();
    assert_eq!(jobs.len(), 1);
    let args: drift_types::VerifyObjectArgs = drift_jobs::decode_args(&jobs[0].args).unwrap();
    assert_eq!(args.requester, USER);
}
