mod common;

use axum::http::StatusCode;
use common::{mock_adapter, TestGateway};
use serde_json::json;
use std::time::{Duration, Instant};
use uniproxy::config::Config;

#[tokio::test]
async fn test_concurrent_calls_complete_out_of_order() {
    let gw = TestGateway::start(vec![mock_adapter("mock", vec![])]);
    let session = gw.initialize("mock").await;

    let started = Instant::now();
    let slow = gw.call_tool("mock", &session, 1, "sleep", json!({"ms": 400}));
    let fast = async {
        let reply = gw.call_tool("mock", &session, 2, "sleep", json!({"ms": 10})).await;
        (reply, started.elapsed())
    };
    let (slow, (fast, fast_elapsed)) = tokio::join!(slow, fast);

    assert_eq!(slow.json()["id"], json!(1));
    assert_eq!(slow.tool_text(), "slept 400");
    assert_eq!(fast.json()["id"], json!(2));
    assert_eq!(fast.tool_text(), "slept 10");
    // The short call must not queue behind the long one on the shared pipe.
    assert!(fast_elapsed < Duration::from_millis(400), "fast call took {fast_elapsed:?}");
    gw.gateway.shutdown();
}

#[tokio::test]
async fn test_backend_crash_ends_session() {
    let gw = TestGateway::start(vec![mock_adapter("mock", vec![])]);
    let session = gw.initialize("mock").await;
    let first_pid = gw.call_tool("mock", &session, 1, "pid", json!({})).await.tool_text();

    let reply = gw.call_tool("mock", &session, 2, "crash", json!({})).await;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.error_code(), Some(-32000));
    assert_eq!(reply.json()["id"], json!(2));

    // The exit event is handled asynchronously; wait for the session to go.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !gw.gateway.router().sessions().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let reply = gw.call_tool("mock", &session, 3, "pid", json!({})).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.error_code(), Some(-32001));

    let fresh = gw.initialize("mock").await;
    assert_ne!(fresh, session);
    let second_pid = gw.call_tool("mock", &fresh, 4, "pid", json!({})).await.tool_text();
    assert_ne!(first_pid, second_pid);
    gw.gateway.shutdown();
}

#[tokio::test]
async fn test_crash_fails_every_pending_call() {
    let gw = TestGateway::start(vec![mock_adapter("mock", vec![])]);
    let session = gw.initialize("mock").await;

    let started = Instant::now();
    let pending = gw.call_tool("mock", &session, 1, "sleep", json!({"ms": 3000}));
    let crash = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        gw.call_tool("mock", &session, 2, "crash", json!({})).await
    };
    let (pending, crash) = tokio::join!(pending, crash);

    for (reply, id) in [(&pending, 1), (&crash, 2)] {
        assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
        assert_eq!(reply.error_code(), Some(-32000));
        assert_eq!(reply.json()["id"], json!(id));
    }
    assert!(started.elapsed() < Duration::from_secs(2), "pending call waited {:?}", started.elapsed());
    gw.gateway.shutdown();
}

#[tokio::test]
async fn test_dispatch_timeout_keeps_session() {
    let config = Config {
        dispatch_timeout_secs: 1,
        ..Config::default()
    };
    let gw = TestGateway::start_with(config, vec![mock_adapter("mock", vec![])]);
    let session = gw.initialize("mock").await;

    let started = Instant::now();
    let reply = gw.call_tool("mock", &session, 1, "sleep", json!({"ms": 3000})).await;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.error_code(), Some(-32000));
    assert!(started.elapsed() < Duration::from_millis(2500));

    let reply = gw.call_tool("mock", &session, 2, "echo", json!({"text": "alive"})).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.tool_text(), "alive");
    gw.gateway.shutdown();
}

#[tokio::test]
async fn test_sessions_get_their_own_process() {
    let gw = TestGateway::start(vec![mock_adapter("mock", vec![])]);
    let a = gw.initialize("mock").await;
    let b = gw.initialize("mock").await;
    assert_ne!(a, b);

    let pid_a = gw.call_tool("mock", &a, 1, "pid", json!({})).await.tool_text();
    let pid_b = gw.call_tool("mock", &b, 1, "pid", json!({})).await.tool_text();
    assert_ne!(pid_a, pid_b);
    assert_eq!(gw.gateway.router().backends().stdio().process_count(), 2);

    gw.gateway.shutdown();
    assert_eq!(gw.gateway.router().backends().stdio().process_count(), 0);
}

#[tokio::test]
async fn test_backend_errors_pass_through() {
    let gw = TestGateway::start(vec![mock_adapter("mock", vec![])]);
    let session = gw.initialize("mock").await;

    let reply = gw.call_tool("mock", &session, 9, "no-such-tool", json!({})).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.error_code(), Some(-32602));
    assert_eq!(reply.json()["id"], json!(9));

    // A backend error answer does not end the session.
    let reply = gw.call_tool("mock", &session, 10, "echo", json!({"text": "still here"})).await;
    assert_eq!(reply.tool_text(), "still here");
    gw.gateway.shutdown();
}

#[tokio::test]
async fn test_missing_command_is_backend_unavailable() {
    let gw = TestGateway::start(vec![uniproxy::gateway_core::models::AdapterResource::stdio(
        "broken",
        "/nonexistent/mcp-server-binary",
        vec![],
    )]);
    let reply = gw.post("broken", None, common::initialize_message(1)).await;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.error_code(), Some(-32000));
    assert!(reply.session.is_none());
    assert!(gw.gateway.router().sessions().is_empty());
}
