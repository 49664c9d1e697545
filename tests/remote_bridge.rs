mod common;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use common::TestGateway;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uniproxy::config::Config;
use uniproxy::gateway_core::models::{AdapterResource, AuthRequirement, AuthScheme};

#[derive(Clone, Default)]
struct Recorded {
    requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

async fn remote_mcp(State(recorded): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    recorded
        .requests
        .lock()
        .unwrap()
        .push((headers, body.clone()));

    let id = body.get("id").cloned().unwrap_or(Value::Null);
    if body.get("method") == Some(&json!("notifications/stall")) || body["params"]["name"] == json!("hang") {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    if body["params"]["name"] == json!("fail") {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match body.get("method").and_then(Value::as_str) {
        Some("initialize") => {
            let result = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": body["params"]["protocolVersion"],
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "remote-mock", "version": "1"}
                }
            });
            ([("mcp-session-id", "remote-1")], Json(result)).into_response()
        }
        Some("tools/call") if body["params"]["name"] == json!("stream") => {
            let token = body.pointer("/params/_meta/progressToken").cloned().unwrap_or(json!(0));
            let progress = json!({
                "jsonrpc": "2.0",
                "method": "notifications/progress",
                "params": {"progressToken": token, "progress": 1, "total": 1}
            });
            let done = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"content": [{"type": "text", "text": "streamed"}]}
            });
            let sse = format!("event: message\ndata: {progress}\n\nevent: message\ndata: {done}\n\n");
            ([("content-type", "text/event-stream")], sse).into_response()
        }
        Some(_) if id.is_null() => StatusCode::ACCEPTED.into_response(),
        Some(_) => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"content": [{"type": "text", "text": "remote ok"}]}
        }))
        .into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn spawn_remote() -> (SocketAddr, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/mcp", post(remote_mcp))
        .with_state(recorded.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, recorded)
}

fn remote_adapter(addr: SocketAddr) -> AdapterResource {
    let mut adapter = AdapterResource::remote("remote", format!("http://{addr}"));
    adapter.authentication = Some(AuthRequirement {
        required: true,
        scheme: AuthScheme::Bearer {
            token: "secret".into(),
        },
    });
    adapter
}

#[tokio::test]
async fn test_remote_call_forwards_session_and_auth() {
    let (addr, recorded) = spawn_remote().await;
    let gw = TestGateway::start(vec![remote_adapter(addr)]);
    let session = gw.initialize("remote").await;

    let reply = gw.call_tool("remote", &session, 4, "echo", json!({})).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["id"], json!(4));
    assert_eq!(reply.tool_text(), "remote ok");

    let requests = recorded.requests.lock().unwrap().clone();
    let (headers, body) = requests
        .iter()
        .find(|(_, body)| body["method"] == json!("tools/call"))
        .expect("tools/call reached the remote");
    assert_eq!(body["params"]["name"], json!("echo"));
    assert_eq!(headers["authorization"], "Bearer secret");
    assert_eq!(headers["mcp-session-id"], "remote-1");
    assert_eq!(headers["mcp-protocol-version"], "2025-03-26");
    // The gateway session id is ours, not the remote's.
    assert_ne!(session, "remote-1");
    gw.gateway.shutdown();
}

#[tokio::test]
async fn test_remote_event_stream_becomes_sse_reply() {
    let (addr, _) = spawn_remote().await;
    let gw = TestGateway::start(vec![remote_adapter(addr)]);
    let session = gw.initialize("remote").await;

    let reply = gw
        .post(
            "remote",
            Some(&session),
            json!({
                "jsonrpc": "2.0",
                "id": 8,
                "method": "tools/call",
                "params": {"name": "stream", "_meta": {"progressToken": "p"}}
            }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.content_type.starts_with("text/event-stream"));
    let messages = reply.sse_messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["method"], json!("notifications/progress"));
    assert_eq!(messages[1]["id"], json!(8));
    assert_eq!(messages[1]["result"]["content"][0]["text"], json!("streamed"));
    gw.gateway.shutdown();
}

#[tokio::test]
async fn test_refused_connection_is_bad_gateway() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gw = TestGateway::start(vec![AdapterResource::remote("down", format!("http://{addr}"))]);
    let reply = gw.post("down", None, common::initialize_message(1)).await;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.error_code(), Some(-32000));
    assert!(gw.gateway.router().sessions().is_empty());
}

fn short_timeout() -> Config {
    Config {
        dispatch_timeout_secs: 1,
        ..Config::default()
    }
}

#[tokio::test]
async fn test_unanswered_remote_call_times_out() {
    let (addr, _) = spawn_remote().await;
    let gw = TestGateway::start_with(short_timeout(), vec![remote_adapter(addr)]);
    let session = gw.initialize("remote").await;

    let started = Instant::now();
    let reply = gw.call_tool("remote", &session, 5, "hang", json!({})).await;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.error_code(), Some(-32000));
    assert_eq!(reply.json()["id"], json!(5));
    assert!(started.elapsed() < Duration::from_secs(5));

    // A timeout does not end the binding.
    assert_eq!(gw.call_tool("remote", &session, 6, "echo", json!({})).await.tool_text(), "remote ok");
    gw.gateway.shutdown();
}

#[tokio::test]
async fn test_unanswered_remote_notification_times_out() {
    let (addr, _) = spawn_remote().await;
    let gw = TestGateway::start_with(short_timeout(), vec![remote_adapter(addr)]);
    let session = gw.initialize("remote").await;

    let notification = json!({"jsonrpc": "2.0", "method": "notifications/stall"});
    let reply = tokio::time::timeout(
        Duration::from_secs(5),
        gw.post("remote", Some(&session), notification),
    )
    .await
    .expect("notification delivery is bounded by the dispatch timeout");
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.error_code(), Some(-32000));
    gw.gateway.shutdown();
}

#[tokio::test]
async fn test_remote_error_status_is_bad_gateway() {
    let (addr, _) = spawn_remote().await;
    let gw = TestGateway::start(vec![remote_adapter(addr)]);
    let session = gw.initialize("remote").await;

    let reply = gw.call_tool("remote", &session, 9, "fail", json!({})).await;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.error_code(), Some(-32000));
    assert_eq!(reply.json()["id"], json!(9));
    gw.gateway.shutdown();
}
