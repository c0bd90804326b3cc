//! Worker pool backpressure and cancellation with real requests held at the upstream.

use crate::mock_infrastructure::{send_request, GatedUpstream, GuardHarness, Reply, TestEnv};
use axum::Router;
use http::{Method, StatusCode};
use std::time::Duration;
use tokio::task::JoinHandle;

fn spawn_call(app: &Router, id: u32) -> JoinHandle<Reply> {
    let app = app.clone();
    let body = format!(r#"{{"id":{id},"method":"getblock"}}"#);
    tokio::spawn(async move { send_request(app, Method::POST, "/", body, None).await })
}

#[tokio::test]
async fn test_third_request_waits_for_a_free_worker() {
    let upstream = GatedUpstream::start().await;
    let env = TestEnv::single(&upstream.url()).set("PROXY_WORKERS", "2");
    let harness = GuardHarness::start(&env).await;

    let first = spawn_call(&harness.app, 1);
    let second = spawn_call(&harness.app, 2);
    upstream.wait_for_started(2).await;

    let third = spawn_call(&harness.app, 3);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(upstream.started(), 2, "third request must stay queued");

    upstream.release(1);
    upstream.wait_for_started(3).await;
    assert!(upstream.finished() >= 1);

    upstream.release(2);
    for call in [first, second, third] {
        let reply = call.await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.json()["result"], "released");
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_queued_request_never_reaches_upstream() {
    let upstream = GatedUpstream::start().await;
    let env = TestEnv::single(&upstream.url()).set("PROXY_WORKERS", "2");
    let harness = GuardHarness::start(&env).await;

    let busy = [spawn_call(&harness.app, 1), spawn_call(&harness.app, 2)];
    upstream.wait_for_started(2).await;

    let queued = spawn_call(&harness.app, 3);
    tokio::time::sleep(Duration::from_millis(50)).await;
    queued.abort();
    assert!(queued.await.unwrap_err().is_cancelled());

    upstream.release(2);
    for call in busy {
        assert_eq!(call.await.unwrap().status, StatusCode::OK);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(upstream.started(), 2);

    // The pool is still healthy after the cancellation.
    upstream.release(1);
    let reply = spawn_call(&harness.app, 4).await.unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(upstream.started(), 3);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_answers_queued_request_with_service_unavailable() {
    let upstream = GatedUpstream::start().await;
    let env = TestEnv::single(&upstream.url()).set("PROXY_WORKERS", "1");
    let harness = GuardHarness::start(&env).await;
    let app = harness.app.clone();

    let running = spawn_call(&app, 1);
    upstream.wait_for_started(1).await;
    let queued = spawn_call(&app, 2);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopping = tokio::spawn(harness.shutdown());
    tokio::time::sleep(Duration::from_millis(20)).await;
    upstream.release(1);

    assert_eq!(running.await.unwrap().status, StatusCode::OK);
    let reply = queued.await.unwrap();
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.json()["error"], "proxy shutting down");
    stopping.await.unwrap();
    assert_eq!(upstream.started(), 1);

    let reply = spawn_call(&app, 3).await.unwrap();
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
}
