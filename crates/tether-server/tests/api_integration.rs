//! HTTP API integration tests, driven against a scripted session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use tether_config::TetherConfig;
use tether_config::schema::ServerConfig;
use tether_memory::SqliteMemory;
use tether_runtime::{Runtime, RuntimeHandle};
use tether_session::mock::ScriptedTransport;
use tokio_util::sync::CancellationToken;

struct TestServer {
    app: axum::Router,
    handle: RuntimeHandle,
    transport: Arc<ScriptedTransport>,
    target: PathBuf,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn setup(api_key: Option<&str>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("persona.md");
    std::fs::write(&target, "original persona").unwrap();

    let mut config = TetherConfig::default();
    config.autonomy.enabled = false;
    config.session.poll_interval_ms = 10;
    config.session.response_timeout_secs = 2;
    config.patch.clone_dir = dir.path().join("clones");
    config.patch.targets = HashMap::from([("persona".to_string(), target.clone())]);

    let transport = Arc::new(ScriptedTransport::new());
    let memory = Arc::new(SqliteMemory::open_in_memory().unwrap());
    let runtime = Runtime::new(config, transport.clone(), memory).unwrap();
    let handle = runtime.handle();
    let cancel = CancellationToken::new();
    tokio::spawn(runtime.run(cancel.clone()));

    let server_config = ServerConfig {
        api_key: api_key.map(String::from),
        ..Default::default()
    };
    TestServer {
        app: tether_server::build_router(server_config, handle.clone()),
        handle,
        transport,
        target,
        cancel,
        _dir: dir,
    }
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ── Health & Status ────────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let server = setup(None);
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let resp = server.app.clone().oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_status_endpoint() {
    let server = setup(None);
    let req = Request::get("/api/v1/status").body(Body::empty()).unwrap();
    let resp = server.app.clone().oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["queue_depth"], 0);
    assert_eq!(json["session"]["held"], false);
    assert_eq!(json["session"]["transport"], "scripted");
    assert!(json["pending_patch"].is_null());
}

// ── Chat ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_returns_reply() {
    let server = setup(None);
    server.transport.reply("<reply>hello back</reply>");

    let resp = server
        .app
        .clone()
        .oneshot(post_json("/api/v1/chat", serde_json::json!({ "message": "hi" })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["replies"], serde_json::json!(["hello back"]));
    assert_eq!(json["degraded"], false);
    assert!(json["request_id"].is_string());
    assert_eq!(server.transport.prompts(), ["hi"]);
}

#[tokio::test]
async fn test_chat_rejects_empty_message() {
    let server = setup(None);
    let resp = server
        .app
        .clone()
        .oneshot(post_json("/api/v1/chat", serde_json::json!({ "message": "  " })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(server.transport.prompts().is_empty());
}

#[tokio::test]
async fn test_chat_without_key_is_not_privileged() {
    let server = setup(None);
    server
        .transport
        .reply("<reply>on it</reply><actions>[{\"tool\": \"shell_exec\", \"args\": {\"command\": \"true\"}}]</actions>");

    let resp = server
        .app
        .clone()
        .oneshot(post_json("/api/v1/chat", serde_json::json!({ "message": "run it" })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["outcomes"][0]["tool_name"], "shell_exec");
    assert_eq!(json["outcomes"][0]["is_error"], true);
    assert_eq!(json["outcomes"][0]["error_kind"], "permission");
}

#[tokio::test]
async fn test_chat_timeout_maps_to_gateway_timeout() {
    let server = setup(None);
    let resp = server
        .app
        .clone()
        .oneshot(post_json("/api/v1/chat", serde_json::json!({ "message": "silence" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    let json = body_json(resp).await;
    assert!(json["error"].as_str().unwrap().contains("stabilize"));
}

// ── Auth ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_api_requires_bearer_token() {
    let server = setup(Some("secret"));

    let req = Request::get("/api/v1/status").body(Body::empty()).unwrap();
    let resp = server.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = Request::get("/api/v1/status")
        .header("authorization", "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let resp = server.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = Request::get("/api/v1/status")
        .header("authorization", "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let resp = server.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_is_public_with_key() {
    let server = setup(Some("secret"));
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let resp = server.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Patches ────────────────────────────────────────────────────

#[tokio::test]
async fn test_patches_list() {
    let server = setup(None);
    let req = Request::get("/api/v1/patches").body(Body::empty()).unwrap();
    let resp = server.app.clone().oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["targets"], serde_json::json!(["persona"]));
    assert!(json["pending"].is_null());
    assert_eq!(json["history"], serde_json::json!([]));
}

#[tokio::test]
async fn test_deploy_overwrites_target() {
    let server = setup(None);
    let proposal = server
        .handle
        .patches()
        .propose("persona", "revised persona", "tone down")
        .await
        .unwrap();

    let uri = format!("/api/v1/patches/{}/deploy", proposal.id);
    let resp = server
        .app
        .clone()
        .oneshot(Request::post(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "deployed");

    assert_eq!(std::fs::read_to_string(&server.target).unwrap(), "revised persona");
    assert!(server.handle.patches().pending().await.is_none());
}

#[tokio::test]
async fn test_drop_leaves_target_untouched() {
    let server = setup(None);
    let proposal = server
        .handle
        .patches()
        .propose("persona", "unwanted", "experiment")
        .await
        .unwrap();

    let uri = format!("/api/v1/patches/{}/drop", proposal.id);
    let resp = server
        .app
        .clone()
        .oneshot(Request::post(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "dropped");

    assert_eq!(std::fs::read_to_string(&server.target).unwrap(), "original persona");
    assert!(!proposal.clone_path.exists());
}

#[tokio::test]
async fn test_deploy_unknown_patch_is_not_found() {
    let server = setup(None);
    let uri = format!("/api/v1/patches/{}/deploy", uuid::Uuid::new_v4());
    let resp = server
        .app
        .clone()
        .oneshot(Request::post(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deploy_rejects_malformed_id() {
    let server = setup(None);
    let resp = server
        .app
        .clone()
        .oneshot(
            Request::post("/api/v1/patches/not-a-uuid/deploy")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
