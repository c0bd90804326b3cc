//! Validation, rewriting and relaying through the full router, pool and pipeline.

use crate::mock_infrastructure::{GuardHarness, RpcMockBuilder, TestEnv};
use http::StatusCode;
use serde_json::json;

const GET_BLOCK: &str = r#"{"jsonrpc":"2.0","id":7,"method":"getBlock","params":[]}"#;

#[tokio::test]
async fn test_happy_path_relays_upstream_bytes() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream
        .at("/rpc")
        .mock_exact_body(GET_BLOCK, 200, r#"{"jsonrpc":"2.0","id":7,"result":"0xff"}"#);

    let env = TestEnv::single(&upstream.url_with_path("/rpc")).set("PROXY_METHODS", "getBlock");
    let harness = GuardHarness::start(&env).await;

    let reply = harness.post("/", GET_BLOCK, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), r#"{"jsonrpc":"2.0","id":7,"result":"0xff"}"#);
    assert_eq!(reply.headers["x-upstream"], "mock");

    upstream.assert_all();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_method_outside_whitelist_is_rejected() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream.expect_untouched();

    let env = TestEnv::single(&upstream.url_with_path("/rpc")).set("PROXY_METHODS", "getBlock");
    let harness = GuardHarness::start(&env).await;

    let reply = harness.post("/", r#"{"method":"evilRpc","id":3,"params":[]}"#, None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.text(), r#"{"jsonrpc":"2.0","id":-1,"error":"method not allow: evilRpc"}"#);
    assert_eq!(reply.headers["content-type"], "application/json");

    upstream.assert_all();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_empty_whitelists_accept_anything() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream.at("/any/path").mock_result("whatever_method", &json!(1), &json!(true));

    let harness = GuardHarness::start(&TestEnv::single(&upstream.url())).await;

    let reply = harness.post("/any/path", r#"{"id":1,"method":"whatever_method"}"#, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["result"], true);

    upstream.assert_all();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_path_whitelist() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream.at("/wallet").mock_result("getbalance", &json!(1), &json!(0.5));

    let env = TestEnv::single(&upstream.url()).set("PROXY_PATHS", "/, /wallet");
    let harness = GuardHarness::start(&env).await;

    let reply = harness.post("/other", r#"{"id":1,"method":"getbalance"}"#, None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json(), json!({"jsonrpc":"2.0","id":-1,"error":"path not allowed /other"}));

    let reply = harness.post("/wallet", r#"{"id":1,"method":"getbalance"}"#, None).await;
    assert_eq!(reply.status, StatusCode::OK);

    upstream.assert_all();
    harness.shutdown().await;
}

/// Builds a request body of exactly `len` bytes.
fn body_of_len(len: usize) -> String {
    let frame = r#"{"id":1,"method":"getBlock","params":[""]}"#;
    let padding = "a".repeat(len - frame.len());
    let body = format!(r#"{{"id":1,"method":"getBlock","params":["{padding}"]}}"#);
    assert_eq!(body.len(), len);
    body
}

#[tokio::test]
async fn test_body_cap_boundary() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream.mock_result("getBlock", &json!(1), &json!("0x1"));

    let harness = GuardHarness::start(&TestEnv::single(&upstream.url())).await;

    let reply = harness.post("/", body_of_len(16384), None).await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = harness.post("/", body_of_len(16385), None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json(), json!({"jsonrpc":"2.0","id":-1,"error":"invalid size limited body"}));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_invalid_json_is_rejected() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream.expect_untouched();

    let harness = GuardHarness::start(&TestEnv::single(&upstream.url())).await;

    let reply = harness.post("/", "{not json", None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error"], "invalid json");

    upstream.assert_all();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_client_auth_is_checked_and_replaced_with_node_auth() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream.mock_authorized("node-jwt", r#"{"result":"ok","error":null,"id":1}"#);

    let env = TestEnv::single(&upstream.url())
        .set("PROXY_TOKEN", "client-secret")
        .set("NODE_TOKEN", "node-jwt");
    let harness = GuardHarness::start(&env).await;

    let reply = harness.post("/", r#"{"id":1,"method":"getinfo"}"#, None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error"], "request not authorized");

    let reply = harness.post("/", r#"{"id":1,"method":"getinfo"}"#, Some("wrong")).await;
    assert_eq!(reply.json()["error"], "request not authorized");

    let reply = harness.post("/", r#"{"id":1,"method":"getinfo"}"#, Some("client-secret")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["result"], "ok");

    upstream.assert_all();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_basic_node_credentials() {
    let mut upstream = RpcMockBuilder::new().await;
    upstream.mock_authorized("Basic cnBjOnB3", r#"{"result":1,"error":null,"id":1}"#);

    let env = TestEnv::single(&upstream.url()).set("NODE_USER", "rpc").set("NODE_PASSWORD", "pw");
    let harness = GuardHarness::start(&env).await;

    let reply = harness.post("/", r#"{"id":1,"method":"getinfo"}"#, Some("ignored")).await;
    assert_eq!(reply.status, StatusCode::OK);

    upstream.assert_all();
    harness.shutdown().await;
}
