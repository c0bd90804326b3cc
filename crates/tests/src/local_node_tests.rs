//! Requests under the local prefix go to the colocated, read-only binding.

use crate::mock_infrastructure::{GuardHarness, RpcMockBuilder, TestEnv, ADMIN_TOKEN};
use guard_core::store::ConfigStore;
use http::StatusCode;
use serde_json::json;

fn with_local(env: TestEnv, local_url: &str) -> TestEnv {
    env.set("LOCAL_NODE_PATH", "/local/").set("LOCAL_NODE_URL", local_url)
}

#[tokio::test]
async fn test_local_prefix_is_stripped() {
    let mut primary = RpcMockBuilder::new().await;
    primary.expect_untouched();
    let mut local = RpcMockBuilder::new().await;
    local.at("/node/wallet/main").mock_result("getbalance", &json!(1), &json!(2.5));
    local.at("/node").mock_result("getblockcount", &json!(2), &json!(100));

    let env = with_local(TestEnv::single(&primary.url()), &local.url_with_path("/node"));
    let harness = GuardHarness::start(&env).await;

    let reply = harness.post("/local/wallet/main", r#"{"id":1,"method":"getbalance"}"#, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["result"], 2.5);

    let reply = harness.post("/local", r#"{"id":2,"method":"getblockcount"}"#, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["result"], 100);

    primary.assert_all();
    local.assert_all();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_prefix_lookalike_goes_to_primary() {
    let mut primary = RpcMockBuilder::new().await;
    primary.at("/localx").mock_result("getblockcount", &json!(1), &json!("primary"));
    let local = RpcMockBuilder::new().await;

    let env = with_local(TestEnv::single(&primary.url()), &local.url());
    let harness = GuardHarness::start(&env).await;

    let reply = harness.post("/localx", r#"{"id":1,"method":"getblockcount"}"#, None).await;
    assert_eq!(reply.json()["result"], "primary");

    primary.assert_all();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_local_errors_are_relayed_without_failover() {
    let mut primary = RpcMockBuilder::new().await;
    primary.expect_untouched();
    let mut secondary = RpcMockBuilder::new().await;
    secondary.expect_untouched();
    let mut local = RpcMockBuilder::new().await;
    local.mock_rpc_error("getblock", &json!({"code": -1, "message": "pruned"}));

    let env = with_local(TestEnv::failover(&primary.url(), &secondary.url()), &local.url());
    let harness = GuardHarness::start(&env).await;

    let reply = harness.post("/local", r#"{"id":1,"method":"getblock"}"#, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["error"]["message"], "pruned");

    primary.assert_all();
    secondary.assert_all();
    local.assert_all();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_local_traffic_is_still_validated() {
    let mut local = RpcMockBuilder::new().await;
    local.expect_untouched();

    let env = with_local(TestEnv::single("http://u:9/"), &local.url())
        .set("PROXY_METHODS", "getblockcount");
    let harness = GuardHarness::start(&env).await;

    let reply = harness.post("/local", r#"{"id":1,"method":"stop"}"#, None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error"], "method not allow: stop");

    local.assert_all();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_local_admin_is_read_only() {
    let env = with_local(TestEnv::single("http://u:9/"), "http://127.0.0.1:8332/");
    let harness = GuardHarness::start(&env).await;

    let reply = harness.get("/local/config", Some(ADMIN_TOKEN)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["result"], json!({"url":"http://127.0.0.1:8332/"}));

    let reply = harness
        .post("/local/config", r#"{"url":"http://elsewhere/"}"#, Some(ADMIN_TOKEN))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error"], "only get request allowed on local node");

    assert!(harness.store.get("btc_local").await.unwrap().is_none());
    harness.shutdown().await;
}
