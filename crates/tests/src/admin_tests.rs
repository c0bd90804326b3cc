//! Runtime read/replace of upstream targets through the admin paths.

use crate::mock_infrastructure::{
    send_request, GuardHarness, RpcMockBuilder, TestEnv, ADMIN_PATH, ADMIN_TOKEN, NODE_KEY,
};
use futures::future::join_all;
use guard_core::store::{ConfigStore, SqliteConfigStore};
use http::{Method, StatusCode};
use serde_json::json;
use std::sync::Arc;

const NEW_TARGET: &str = r#"{"url":"http://new:80/","jwt":"B"}"#;

#[tokio::test]
async fn test_admin_round_trip_persists_target() {
    let harness = GuardHarness::start(&TestEnv::single("http://u:9/rpc")).await;

    let reply = harness.post(ADMIN_PATH, NEW_TARGET, Some(ADMIN_TOKEN)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), r#"{"jsonrpc":"2.0","id":1,"result":"successfully updated"}"#);

    let reply = harness.get(ADMIN_PATH, Some(ADMIN_TOKEN)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({"jsonrpc":"2.0","id":1,"result":{"url":"http://new:80/","jwt":"B"}}));

    let stored = harness.store.get(NODE_KEY).await.unwrap().unwrap();
    assert_eq!(serde_json::to_string(&stored.value).unwrap(), NEW_TARGET);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_get_post_get_is_idempotent() {
    let env = TestEnv::single("http://u:9/rpc").set("NODE_USER", "rpc").set("NODE_PASSWORD", "pw");
    let harness = GuardHarness::start(&env).await;

    let before = harness.get(ADMIN_PATH, Some(ADMIN_TOKEN)).await;
    assert_eq!(before.json()["result"], json!({"url":"http://u:9/rpc","username":"rpc","password":"pw"}));

    let result = before.json()["result"].to_string();
    let reply = harness.post(ADMIN_PATH, result, Some(ADMIN_TOKEN)).await;
    assert_eq!(reply.status, StatusCode::OK);

    let after = harness.get(ADMIN_PATH, Some(ADMIN_TOKEN)).await;
    assert_eq!(before.body, after.body);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_admin_requires_admin_credentials() {
    let harness = GuardHarness::start(&TestEnv::single("http://u:9/rpc")).await;

    let reply = harness.get(ADMIN_PATH, None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.text(), r#"{"jsonrpc":"2.0","id":-1,"error":"request not authorized"}"#);

    let reply = harness.post(ADMIN_PATH, NEW_TARGET, Some("admin-tokenX")).await;
    assert_eq!(reply.json()["error"], "request not authorized");

    let reply = harness.get(ADMIN_PATH, Some(ADMIN_TOKEN)).await;
    assert_eq!(reply.json()["result"]["url"], "http://u:9/rpc");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_admin_update_redirects_traffic() {
    let mut old = RpcMockBuilder::new().await;
    old.expect_untouched();
    let mut new = RpcMockBuilder::new().await;
    new.mock_authorized("fresh-jwt", r#"{"result":"new node","error":null,"id":1}"#);

    let harness = GuardHarness::start(&TestEnv::single(&old.url())).await;

    let payload = json!({"url": new.url(), "jwt": "fresh-jwt"}).to_string();
    let reply = harness.post(ADMIN_PATH, payload, Some(ADMIN_TOKEN)).await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = harness.post("/", r#"{"id":1,"method":"getinfo"}"#, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["result"], "new node");

    old.assert_all();
    new.assert_all();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_empty_url_restores_environment_defaults() {
    let harness = GuardHarness::start(&TestEnv::single("http://u:9/rpc").set("NODE_TOKEN", "E")).await;

    harness.post(ADMIN_PATH, NEW_TARGET, Some(ADMIN_TOKEN)).await;
    let reply = harness.post(ADMIN_PATH, r#"{"url":""}"#, Some(ADMIN_TOKEN)).await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = harness.get(ADMIN_PATH, Some(ADMIN_TOKEN)).await;
    assert_eq!(reply.json()["result"], json!({"url":"http://u:9/rpc","jwt":"E"}));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_secondary_has_its_own_admin_path_and_key() {
    let harness = GuardHarness::start(&TestEnv::failover("http://a:1/", "http://b:2/")).await;

    let reply = harness.post("/config2", NEW_TARGET, Some(ADMIN_TOKEN)).await;
    assert_eq!(reply.status, StatusCode::OK);

    let primary = harness.get(ADMIN_PATH, Some(ADMIN_TOKEN)).await;
    assert_eq!(primary.json()["result"]["url"], "http://a:1/");

    let stored = harness.store.get(&format!("{NODE_KEY}_2")).await.unwrap().unwrap();
    assert_eq!(stored.value.url, "http://new:80/");
    let stored = harness.store.get(&format!("{NODE_KEY}_1")).await.unwrap().unwrap();
    assert_eq!(stored.value.url, "http://a:1/");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_sqlite_store_survives_restart() {
    let store: Arc<dyn ConfigStore> =
        Arc::new(SqliteConfigStore::connect("sqlite::memory:").await.unwrap());
    let env = TestEnv::single("http://u:9/rpc");

    let first = GuardHarness::start_with_store(&env, Arc::clone(&store)).await;
    let reply = first.post(ADMIN_PATH, NEW_TARGET, Some(ADMIN_TOKEN)).await;
    assert_eq!(reply.status, StatusCode::OK);
    first.shutdown().await;

    // A restart adopts the stored target over the environment's NODE_URL.
    let second = GuardHarness::start_with_store(&env, store).await;
    let reply = second.get(ADMIN_PATH, Some(ADMIN_TOKEN)).await;
    assert_eq!(reply.json()["result"], json!({"url":"http://new:80/","jwt":"B"}));
    second.shutdown().await;
}

/// Flips the live target between two upstreams while proxied traffic flows. Each upstream only
/// answers its own token, so a rewrite that paired one upstream's URL with the other's token
/// would surface as mockito's 501.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_never_tear_the_target() {
    let mut a = RpcMockBuilder::new().await;
    a.mock_authorized("token-a", r#"{"result":"a","error":null,"id":1}"#);
    let mut b = RpcMockBuilder::new().await;
    b.mock_authorized("token-b", r#"{"result":"b","error":null,"id":1}"#);

    let env = TestEnv::single(&a.url()).set("NODE_TOKEN", "token-a").set("PROXY_WORKERS", "8");
    let harness = GuardHarness::start(&env).await;

    let targets = [
        json!({"url": a.url(), "jwt": "token-a"}).to_string(),
        json!({"url": b.url(), "jwt": "token-b"}).to_string(),
    ];
    let app = harness.app.clone();
    let flipper = tokio::spawn(async move {
        for round in 0..40 {
            let body = targets[round % 2].clone();
            let reply =
                send_request(app.clone(), Method::POST, ADMIN_PATH, body, Some(ADMIN_TOKEN)).await;
            assert_eq!(reply.status, StatusCode::OK);
        }
    });

    let clients: Vec<_> = (0..8)
        .map(|_| {
            let app = harness.app.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    let reply = send_request(
                        app.clone(),
                        Method::POST,
                        "/",
                        r#"{"id":1,"method":"getinfo"}"#,
                        None,
                    )
                    .await;
                    assert_eq!(reply.status, StatusCode::OK, "{}", reply.text());
                }
            })
        })
        .collect();

    flipper.await.unwrap();
    for joined in join_all(clients).await {
        joined.unwrap();
    }
    harness.shutdown().await;
}
